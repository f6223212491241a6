//! Campaign store.
//!
//! Durable state for source accounts, campaigns, their steps, contacts
//! and the delivery log, kept in `SQLite` through an async `sqlx` pool.
//! The scheduler reads snapshots from here once per tick and writes back
//! only what a delivery or a reply changes.

mod accounts;
mod campaigns;
mod contacts;
mod deliveries;
mod models;
mod schema;

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info};

pub use deliveries::DeliveryOutcome;
pub use models::{
    AccountStatus, Campaign, CampaignStep, Contact, MessageLogEntry, NewCampaign, NewContact,
    SourceAccount,
};

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Already exists: {0}")]
    Duplicate(String),
}

impl StoreError {
    fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Maps unique-constraint violations to [`StoreError::Duplicate`].
    fn from_insert(err: sqlx::Error, what: impl FnOnce() -> String) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Duplicate(what()),
            _ => Self::Database(err),
        }
    }
}

/// Handle to the campaign store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if missing) the database at `database_url` and
    /// makes sure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialised.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Opening campaign store at {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Opens a private in-memory store. Everything is lost on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // A single never-recycled connection keeps the in-memory database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ready ({} statements)", schema::STATEMENTS.len());
        Ok(())
    }

    /// Closes the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared setup for tests that need populated stores.

    use super::*;

    pub async fn active_account(store: &Store) -> SourceAccount {
        let account = store
            .create_account("+15550001111", Some("Sales"), None)
            .await
            .unwrap();
        store
            .activate_account(&account.id, "acc.session")
            .await
            .unwrap()
    }

    pub async fn campaign(
        store: &Store,
        account_id: &str,
        interval_seconds: i64,
        messages: &[&str],
    ) -> Campaign {
        let campaign = store
            .create_campaign(NewCampaign {
                account_id: account_id.to_owned(),
                name: "Follow-up".to_owned(),
                interval_seconds,
                max_steps: i64::try_from(messages.len().max(1)).unwrap(),
                active: true,
            })
            .await
            .unwrap();
        for (i, message) in messages.iter().enumerate() {
            store
                .upsert_step(&campaign.id, i64::try_from(i).unwrap() + 1, message, None)
                .await
                .unwrap();
        }
        campaign
    }

    /// Writes a campaign interval directly, skipping validation, as a row
    /// from an older schema might hold.
    pub async fn force_interval(store: &Store, campaign_id: &str, interval_seconds: i64) {
        sqlx::query("UPDATE campaigns SET interval_seconds = ? WHERE id = ?")
            .bind(interval_seconds)
            .bind(campaign_id)
            .execute(&store.pool)
            .await
            .unwrap();
    }

    pub async fn contact(
        store: &Store,
        account_id: &str,
        campaign_id: &str,
        telegram_user_id: i64,
    ) -> Contact {
        store
            .create_contact(NewContact {
                account_id: account_id.to_owned(),
                campaign_id: Some(campaign_id.to_owned()),
                telegram_user_id,
                access_hash: Some(telegram_user_id * 7),
                name: None,
                tag: None,
            })
            .await
            .unwrap()
    }
}
