//! Delivery bookkeeping: step advancement, the message log and reply marks.
//!
//! These are the only writes the scheduler performs. Each is a single
//! committed unit so a delivery and a concurrent reply never leave a
//! contact half-updated.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::models::new_id;
use super::{Contact, MessageLogEntry, Store, StoreError};

/// Result of committing a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Step advanced and log entry appended.
    Recorded(MessageLogEntry),
    /// The contact's step or campaign changed since the snapshot was taken.
    /// The send is logged but the step is left alone.
    Stale(MessageLogEntry),
}

impl Store {
    /// Commits a successful send for `contact` as seen in the tick snapshot.
    ///
    /// Increments `current_step` by one, sets `last_message_at` and appends a
    /// log entry for the step just sent, all in one transaction. The update
    /// is guarded on the snapshot's step and campaign so a send can never
    /// advance a contact twice. Every call stands for a message Telegram
    /// accepted, so the log entry is written either way.
    pub async fn record_delivery(
        &self,
        contact: &Contact,
        sent_at: DateTime<Utc>,
    ) -> Result<DeliveryOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE contacts SET current_step = current_step + 1, last_message_at = ?
             WHERE id = ? AND current_step = ? AND campaign_id IS ?",
        )
        .bind(sent_at)
        .bind(&contact.id)
        .bind(contact.current_step)
        .bind(&contact.campaign_id)
        .execute(&mut *tx)
        .await?;
        let advanced = result.rows_affected() > 0;

        let entry = MessageLogEntry {
            id: new_id(),
            account_id: contact.account_id.clone(),
            contact_id: contact.id.clone(),
            step_number: contact.current_step,
            sent_at,
        };

        sqlx::query(
            "INSERT INTO messages_sent (id, account_id, contact_id, step_number, sent_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.account_id)
        .bind(&entry.contact_id)
        .bind(entry.step_number)
        .bind(entry.sent_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if advanced {
            Ok(DeliveryOutcome::Recorded(entry))
        } else {
            warn!(
                contact_id = %contact.id,
                step = contact.current_step,
                "Contact changed while sending, step not advanced"
            );
            Ok(DeliveryOutcome::Stale(entry))
        }
    }

    /// Marks the contact behind an incoming message as replied.
    ///
    /// Returns `true` if a contact was flipped, `false` if the sender is not a
    /// contact of the account or had already replied.
    pub async fn mark_replied(
        &self,
        account_id: &str,
        telegram_user_id: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE contacts SET replied = 1
             WHERE account_id = ? AND telegram_user_id = ? AND replied = 0",
        )
        .bind(account_id)
        .bind(telegram_user_id)
        .execute(&self.pool)
        .await?;

        let flipped = result.rows_affected() > 0;
        debug!(account_id, telegram_user_id, flipped, "Processed incoming message");
        Ok(flipped)
    }

    /// Delivery history of one contact, oldest first.
    pub async fn message_log_for(
        &self,
        contact_id: &str,
    ) -> Result<Vec<MessageLogEntry>, StoreError> {
        Ok(sqlx::query_as::<_, MessageLogEntry>(
            "SELECT id, account_id, contact_id, step_number, sent_at
             FROM messages_sent WHERE contact_id = ? ORDER BY sent_at, step_number",
        )
        .bind(contact_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures;

    #[tokio::test]
    async fn test_delivery_advances_step_and_logs_once() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let campaign = fixtures::campaign(&store, &account.id, 60, &["a", "b"]).await;
        let contact = fixtures::contact(&store, &account.id, &campaign.id, 1).await;
        let now = Utc::now();

        let outcome = store.record_delivery(&contact, now).await.unwrap();
        let DeliveryOutcome::Recorded(entry) = outcome else {
            panic!("expected delivery to be recorded");
        };
        assert_eq!(entry.step_number, 1);

        let after = store.get_contact(&contact.id).await.unwrap();
        assert_eq!(after.current_step, 2);
        assert_eq!(after.last_message_at, Some(now));

        let log = store.message_log_for(&contact.id).await.unwrap();
        assert_eq!(log, vec![entry]);
    }

    #[tokio::test]
    async fn test_stale_snapshot_logs_without_advancing() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let campaign = fixtures::campaign(&store, &account.id, 60, &["a", "b"]).await;
        let contact = fixtures::contact(&store, &account.id, &campaign.id, 1).await;

        store.record_delivery(&contact, Utc::now()).await.unwrap();
        let second = store.record_delivery(&contact, Utc::now()).await.unwrap();

        assert!(matches!(second, DeliveryOutcome::Stale(ref e) if e.step_number == 1));
        assert_eq!(store.get_contact(&contact.id).await.unwrap().current_step, 2);
        assert_eq!(store.message_log_for(&contact.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_send_from_old_campaign_does_not_advance_new_one() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let first = fixtures::campaign(&store, &account.id, 60, &["a", "b"]).await;
        let second = fixtures::campaign(&store, &account.id, 60, &["x", "y"]).await;
        let snapshot = fixtures::contact(&store, &account.id, &first.id, 3).await;

        // Moved while the first campaign's step 1 was in flight.
        store
            .assign_contact(&snapshot.id, Some(&second.id))
            .await
            .unwrap();
        let outcome = store.record_delivery(&snapshot, Utc::now()).await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Stale(_)));
        let after = store.get_contact(&snapshot.id).await.unwrap();
        assert_eq!(after.current_step, 1);
        assert!(after.last_message_at.is_none());
        assert!(after.is_assigned_to(&second.id));
    }

    #[tokio::test]
    async fn test_mark_replied_only_flips_once() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let campaign = fixtures::campaign(&store, &account.id, 60, &["a"]).await;
        let contact = fixtures::contact(&store, &account.id, &campaign.id, 55).await;

        assert!(store.mark_replied(&account.id, 55).await.unwrap());
        assert!(!store.mark_replied(&account.id, 55).await.unwrap());
        assert!(!store.mark_replied(&account.id, 56).await.unwrap());
        assert!(store.get_contact(&contact.id).await.unwrap().replied);
    }

    #[tokio::test]
    async fn test_delivery_keeps_concurrent_reply() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let campaign = fixtures::campaign(&store, &account.id, 60, &["a", "b"]).await;
        let snapshot = fixtures::contact(&store, &account.id, &campaign.id, 8).await;

        // Reply lands between the tick's read and its commit.
        store.mark_replied(&account.id, 8).await.unwrap();
        store.record_delivery(&snapshot, Utc::now()).await.unwrap();

        let after = store.get_contact(&snapshot.id).await.unwrap();
        assert!(after.replied);
        assert_eq!(after.current_step, 2);
    }
}
