//! Application settings and Telegram configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Directory holding one session file per source account.
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("sessions")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            session_dir: default_session_dir(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID` and `TG_API_HASH` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let session_dir =
            std::env::var("TG_SESSION_DIR").map_or_else(|_| default_session_dir(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            session_dir,
        })
    }

    /// Session file for an account. Its path is stored as the account's credential.
    #[must_use]
    pub fn session_path_for(&self, account_id: &str) -> PathBuf {
        self.session_dir.join(format!("{account_id}.session"))
    }

    /// Resolves a stored session reference into a path on disk.
    #[must_use]
    pub fn resolve_session(&self, session_ref: &str) -> PathBuf {
        let path = Path::new(session_ref);
        if path.is_absolute() || path.starts_with(&self.session_dir) {
            path.to_path_buf()
        } else {
            self.session_dir.join(path)
        }
    }
}

/// Worker and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// `SQLite` connection URL for the campaign store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Seconds between delivery ticks.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Minimum milliseconds between two sends on the same account (0 disables).
    #[serde(default = "default_min_send_interval_ms")]
    pub min_send_interval_ms: u64,

    /// Capacity of the queue between channel listeners and the reply watcher.
    #[serde(default = "default_reply_queue_capacity")]
    pub reply_queue_capacity: usize,

    /// Log level for the application.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_database_url() -> String {
    "sqlite://followup.db".to_owned()
}

fn default_tick_secs() -> u64 {
    30
}

fn default_min_send_interval_ms() -> u64 {
    1000
}

fn default_reply_queue_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            tick_secs: default_tick_secs(),
            min_send_interval_ms: default_min_send_interval_ms(),
            reply_queue_capacity: default_reply_queue_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl WorkerSettings {
    /// Creates worker settings from environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be used.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| default_database_url()),
            tick_secs: parse_env("WORKER_TICK")?.unwrap_or_else(default_tick_secs),
            min_send_interval_ms: parse_env("MIN_SEND_INTERVAL_MS")?
                .unwrap_or_else(default_min_send_interval_ms),
            reply_queue_capacity: parse_env("REPLY_QUEUE_CAPACITY")?
                .unwrap_or_else(default_reply_queue_capacity),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| default_log_level()),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first out-of-range setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "WORKER_TICK",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.reply_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: "REPLY_QUEUE_CAPACITY",
                reason: "must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }

    /// Tick period as a [`Duration`].
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    /// Per-account send spacing as a [`Duration`].
    #[must_use]
    pub const fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name,
                reason: format!("cannot parse '{raw}'"),
            }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}
