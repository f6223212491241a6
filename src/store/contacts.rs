//! Contact rows.

use tracing::info;

use super::models::new_id;
use super::{Contact, NewContact, Store, StoreError};

const COLUMNS: &str = "id, account_id, campaign_id, telegram_user_id, access_hash, name, tag, \
                       replied, current_step, last_message_at";

impl Store {
    /// Creates a contact at step 1, not yet messaged.
    pub async fn create_contact(&self, new: NewContact) -> Result<Contact, StoreError> {
        self.get_account(&new.account_id).await?;
        if let Some(campaign_id) = &new.campaign_id {
            self.ensure_campaign_owned_by(campaign_id, &new.account_id)
                .await?;
        }

        let contact = Contact {
            id: new_id(),
            account_id: new.account_id,
            campaign_id: new.campaign_id,
            telegram_user_id: new.telegram_user_id,
            access_hash: new.access_hash,
            name: new.name,
            tag: new.tag,
            replied: false,
            current_step: 1,
            last_message_at: None,
        };

        sqlx::query(
            "INSERT INTO contacts (id, account_id, campaign_id, telegram_user_id, access_hash,
                                   name, tag, replied, current_step, last_message_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&contact.id)
        .bind(&contact.account_id)
        .bind(&contact.campaign_id)
        .bind(contact.telegram_user_id)
        .bind(contact.access_hash)
        .bind(&contact.name)
        .bind(&contact.tag)
        .bind(contact.replied)
        .bind(contact.current_step)
        .bind(contact.last_message_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            StoreError::from_insert(e, || {
                format!(
                    "contact {} on account {}",
                    contact.telegram_user_id, contact.account_id
                )
            })
        })?;

        info!(
            contact_id = %contact.id,
            account_id = %contact.account_id,
            telegram_user_id = contact.telegram_user_id,
            "Contact created"
        );
        Ok(contact)
    }

    async fn ensure_campaign_owned_by(
        &self,
        campaign_id: &str,
        account_id: &str,
    ) -> Result<(), StoreError> {
        let campaign = self.get_campaign(campaign_id).await?;
        if campaign.account_id != account_id {
            return Err(StoreError::Invalid(format!(
                "campaign {campaign_id} belongs to a different account"
            )));
        }
        Ok(())
    }

    /// Fetches one contact.
    pub async fn get_contact(&self, id: &str) -> Result<Contact, StoreError> {
        sqlx::query_as::<_, Contact>(&format!("SELECT {COLUMNS} FROM contacts WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("Contact", id))
    }

    /// Finds the contact for an incoming user on an account.
    pub async fn find_contact(
        &self,
        account_id: &str,
        telegram_user_id: i64,
    ) -> Result<Option<Contact>, StoreError> {
        Ok(sqlx::query_as::<_, Contact>(&format!(
            "SELECT {COLUMNS} FROM contacts WHERE account_id = ? AND telegram_user_id = ?"
        ))
        .bind(account_id)
        .bind(telegram_user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Lists every contact.
    pub async fn list_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        Ok(
            sqlx::query_as::<_, Contact>(&format!(
                "SELECT {COLUMNS} FROM contacts ORDER BY account_id, telegram_user_id"
            ))
            .fetch_all(&self.pool)
            .await?,
        )
    }

    /// Lists contacts currently assigned to a campaign.
    pub async fn contacts_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<Contact>, StoreError> {
        Ok(sqlx::query_as::<_, Contact>(&format!(
            "SELECT {COLUMNS} FROM contacts WHERE campaign_id = ? ORDER BY telegram_user_id"
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Updates display name and tag. `None` leaves a field unchanged.
    pub async fn update_contact(
        &self,
        id: &str,
        name: Option<&str>,
        tag: Option<&str>,
    ) -> Result<Contact, StoreError> {
        let result = sqlx::query(
            "UPDATE contacts SET name = COALESCE(?, name), tag = COALESCE(?, tag) WHERE id = ?",
        )
        .bind(name)
        .bind(tag)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Contact", id));
        }
        self.get_contact(id).await
    }

    /// Moves a contact into a campaign (or out of any with `None`).
    ///
    /// Only a contact that has never been messaged can join a campaign, so
    /// `current_step` never goes backwards. Unassigning keeps the progress
    /// and the replied flag.
    pub async fn assign_contact(
        &self,
        id: &str,
        campaign_id: Option<&str>,
    ) -> Result<Contact, StoreError> {
        let contact = self.get_contact(id).await?;
        if contact.campaign_id.as_deref() == campaign_id {
            return Ok(contact);
        }

        let result = if let Some(campaign_id) = campaign_id {
            self.ensure_campaign_owned_by(campaign_id, &contact.account_id)
                .await?;
            sqlx::query(
                "UPDATE contacts SET campaign_id = ?
                 WHERE id = ? AND current_step = 1 AND last_message_at IS NULL",
            )
            .bind(campaign_id)
            .bind(id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query("UPDATE contacts SET campaign_id = NULL WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::Invalid(format!(
                "contact {id} has already been messaged; remove and re-add it to start over"
            )));
        }

        info!(contact_id = %id, campaign_id = ?campaign_id, "Contact reassigned");
        self.get_contact(id).await
    }

    /// Deletes a contact and its delivery history.
    pub async fn delete_contact(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages_sent WHERE contact_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM contacts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::not_found("Contact", id));
        }
        tx.commit().await?;
        Ok(())
    }
}
