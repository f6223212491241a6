//! Source account rows.

use chrono::Utc;
use tracing::info;

use super::models::new_id;
use super::{AccountStatus, SourceAccount, Store, StoreError};

const COLUMNS: &str = "id, phone, name, tag, status, session_ref, created_at, updated_at";

impl Store {
    /// Creates an account awaiting verification.
    pub async fn create_account(
        &self,
        phone: &str,
        name: Option<&str>,
        tag: Option<&str>,
    ) -> Result<SourceAccount, StoreError> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(StoreError::Invalid("phone number is empty".to_owned()));
        }

        let now = Utc::now();
        let account = SourceAccount {
            id: new_id(),
            phone: phone.to_owned(),
            name: name.map(str::to_owned),
            tag: tag.map(str::to_owned),
            status: AccountStatus::PendingVerification,
            session_ref: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO accounts (id, phone, name, tag, status, session_ref, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&account.id)
        .bind(&account.phone)
        .bind(&account.name)
        .bind(&account.tag)
        .bind(account.status)
        .bind(&account.session_ref)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        info!(account_id = %account.id, "Account created");
        Ok(account)
    }

    /// Fetches one account.
    pub async fn get_account(&self, id: &str) -> Result<SourceAccount, StoreError> {
        sqlx::query_as::<_, SourceAccount>(&format!("SELECT {COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("Account", id))
    }

    /// Lists all accounts, oldest first.
    pub async fn list_accounts(&self) -> Result<Vec<SourceAccount>, StoreError> {
        Ok(sqlx::query_as::<_, SourceAccount>(&format!(
            "SELECT {COLUMNS} FROM accounts ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?)
    }

    /// Lists accounts the scheduler may act on.
    pub async fn active_accounts(&self) -> Result<Vec<SourceAccount>, StoreError> {
        Ok(sqlx::query_as::<_, SourceAccount>(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE status = ? ORDER BY created_at"
        ))
        .bind(AccountStatus::Active)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Updates the display name and tag. `None` leaves a field unchanged.
    pub async fn update_account(
        &self,
        id: &str,
        name: Option<&str>,
        tag: Option<&str>,
    ) -> Result<SourceAccount, StoreError> {
        let result = sqlx::query(
            "UPDATE accounts
             SET name = COALESCE(?, name), tag = COALESCE(?, tag), updated_at = ?
             WHERE id = ?",
        )
        .bind(name)
        .bind(tag)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Account", id));
        }
        self.get_account(id).await
    }

    /// Stores the session reference and marks the account active.
    pub async fn activate_account(
        &self,
        id: &str,
        session_ref: &str,
    ) -> Result<SourceAccount, StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET session_ref = ?, status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(session_ref)
        .bind(AccountStatus::Active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Account", id));
        }
        info!(account_id = %id, "Account activated");
        self.get_account(id).await
    }

    /// Sets the account status.
    pub async fn set_account_status(
        &self,
        id: &str,
        status: AccountStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE accounts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Account", id));
        }
        Ok(())
    }

    /// Deletes an account together with its campaigns, steps, contacts and log.
    pub async fn delete_account(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages_sent WHERE account_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM contacts WHERE account_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM campaign_steps
             WHERE campaign_id IN (SELECT id FROM campaigns WHERE account_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM campaigns WHERE account_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::not_found("Account", id));
        }

        tx.commit().await?;
        info!(account_id = %id, "Account deleted");
        Ok(())
    }
}
