//! Reply detection.
//!
//! Consumes incoming-message events forwarded by every watched account and
//! flips the sender's contact to replied. This is the only writer of the
//! replied flag and it runs independently of the delivery loop.

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::store::{Store, StoreError};
use crate::telegram::IncomingEvent;

/// Marks contacts as replied when they message their source account.
#[derive(Debug, Clone)]
pub struct ReplyWatcher {
    store: Store,
}

impl ReplyWatcher {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Applies one incoming event. Returns whether a contact was flipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails.
    pub async fn handle(&self, event: &IncomingEvent) -> Result<bool, StoreError> {
        let flipped = self
            .store
            .mark_replied(&event.account_id, event.sender_id)
            .await?;
        if flipped {
            info!(
                account_id = %event.account_id,
                user_id = event.sender_id,
                "Contact replied, follow-ups stopped"
            );
        }
        Ok(flipped)
    }

    /// Processes events until every sender is dropped.
    pub async fn run(&self, mut rx: mpsc::Receiver<IncomingEvent>) {
        info!("Reply watcher started");

        while let Some(event) = rx.recv().await {
            if let Err(e) = self.handle(&event).await {
                error!(
                    account_id = %event.account_id,
                    user_id = event.sender_id,
                    "Failed to record reply: {}",
                    e
                );
            }
        }

        debug!("Reply watcher stopped");
    }
}
