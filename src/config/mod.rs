//! Configuration module for the follow-up bot.
//!
//! Handles environment-driven settings (Telegram API credentials, worker
//! cadence, storage location) and campaign plan files.

mod plan;
mod settings;

pub use plan::{CampaignPlan, PlanError, PlanStep};
pub use settings::{ConfigError, TelegramConfig, WorkerSettings};

/// Maximum length of a single Telegram text message.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Default seconds between campaign messages (one day).
pub const DEFAULT_CAMPAIGN_INTERVAL_SECS: i64 = 86_400;

/// Longest wait allowed between two campaign messages (ten years).
pub const MAX_INTERVAL_SECS: i64 = 10 * 365 * 86_400;

/// Default number of messages in a new campaign.
pub const DEFAULT_MAX_STEPS: i64 = 3;
