//! Delivery loop.
//!
//! One pass over every active account: connect (or reuse the cached
//! connection), make sure replies are being watched, then send the next
//! step to each due contact of each active campaign. Failures stay local.
//! A bad contact is skipped. An account whose session is revoked or that
//! is under a flood wait is left for the next tick. Only a store that
//! cannot list accounts aborts the pass.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::TickReport;
use super::due::{StepPlan, select_due};
use crate::store::{Campaign, DeliveryOutcome, SourceAccount, Store, StoreError};
use crate::telegram::{
    AccountConnection, ChannelError, ConnectionRegistry, Recipient, truncate_for_log,
};

/// Errors that abort a whole tick.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Why processing of one account stopped early.
#[derive(Debug, Error)]
enum AccountHalt {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sends due campaign steps for every active account.
#[derive(Debug, Clone)]
pub struct DeliveryLoop {
    store: Store,
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryLoop {
    /// Creates a delivery loop over `store`, sending through `registry`.
    #[must_use]
    pub const fn new(store: Store, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Runs one pass with `now` as the single reference time.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] only if the active accounts cannot be listed.
    /// Everything else is counted in the report and logged.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport, TickError> {
        let accounts = self.store.active_accounts().await?;
        let mut report = TickReport::default();

        for account in &accounts {
            report.accounts_processed += 1;

            if let Err(halt) = self.process_account(account, now, &mut report).await {
                report.accounts_failed += 1;
                match halt {
                    AccountHalt::Channel(e) => {
                        warn!(account_id = %account.id, "Skipping account this tick: {}", e);
                    }
                    AccountHalt::Store(e) => {
                        error!(account_id = %account.id, "Store error, skipping account: {}", e);
                    }
                }
            }
        }

        Ok(report)
    }

    async fn process_account(
        &self,
        account: &SourceAccount,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), AccountHalt> {
        let connection = self.registry.get_or_create(account).await?;

        if let Err(e) = self.registry.ensure_reply_watch(&connection).await {
            warn!(account_id = %account.id, "Could not watch replies: {}", e);
        }

        let campaigns = self.store.active_campaigns_for(&account.id).await?;
        debug!(
            account_id = %account.id,
            campaigns = campaigns.len(),
            "Processing account"
        );

        for campaign in &campaigns {
            if let Err(halt) = self
                .process_campaign(&connection, campaign, now, report)
                .await
            {
                if let AccountHalt::Channel(e) = &halt
                    && e.is_auth()
                {
                    self.registry.evict(&account.id).await;
                }
                return Err(halt);
            }
        }

        Ok(())
    }

    async fn process_campaign(
        &self,
        connection: &AccountConnection,
        campaign: &Campaign,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), AccountHalt> {
        let steps = self.store.steps_for(&campaign.id).await?;
        let contacts = self.store.contacts_for_campaign(&campaign.id).await?;
        let plan = StepPlan::new(campaign, &steps);

        for contact in select_due(now, campaign, &plan, &contacts) {
            let Some(text) = plan.message_for(contact.current_step) else {
                debug!(
                    campaign_id = %campaign.id,
                    contact_id = %contact.id,
                    step = contact.current_step,
                    "No message for step, skipping"
                );
                report.skipped_no_step += 1;
                continue;
            };

            match connection.send(Recipient::from(contact), text).await {
                Ok(()) => match self.store.record_delivery(contact, now).await {
                    Ok(DeliveryOutcome::Recorded(entry)) => {
                        report.sent += 1;
                        info!(
                            campaign_id = %campaign.id,
                            contact_id = %contact.id,
                            step = entry.step_number,
                            "Sent \"{}\"",
                            truncate_for_log(text, 30)
                        );
                    }
                    Ok(DeliveryOutcome::Stale(_)) => report.stale += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!(
                            contact_id = %contact.id,
                            step = contact.current_step,
                            "Message sent but not recorded: {}",
                            e
                        );
                    }
                },
                Err(e) if e.is_auth() || matches!(e, ChannelError::FloodWait(_)) => {
                    report.failed += 1;
                    return Err(e.into());
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        campaign_id = %campaign.id,
                        contact_id = %contact.id,
                        step = contact.current_step,
                        "Send failed: {}",
                        e
                    );
                }
            }
        }

        Ok(())
    }
}
