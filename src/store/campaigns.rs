//! Campaign and campaign step rows.

use tracing::info;

use super::models::new_id;
use super::{Campaign, CampaignStep, NewCampaign, Store, StoreError};
use crate::config::{CampaignPlan, MAX_INTERVAL_SECS, MAX_MESSAGE_LENGTH};

const COLUMNS: &str = "id, account_id, name, interval_seconds, max_steps, active";
const STEP_COLUMNS: &str = "id, campaign_id, step_number, message, interval_seconds";

fn validate_cadence(interval_seconds: i64, max_steps: i64) -> Result<(), StoreError> {
    if !(1..=MAX_INTERVAL_SECS).contains(&interval_seconds) {
        return Err(StoreError::Invalid(format!(
            "interval must be between 1 and {MAX_INTERVAL_SECS} seconds, got {interval_seconds}"
        )));
    }
    if max_steps < 1 {
        return Err(StoreError::Invalid(format!(
            "max_steps must be at least 1, got {max_steps}"
        )));
    }
    Ok(())
}

fn validate_step(
    step_number: i64,
    message: &str,
    interval_seconds: Option<i64>,
) -> Result<(), StoreError> {
    if step_number < 1 {
        return Err(StoreError::Invalid(format!(
            "step number must be at least 1, got {step_number}"
        )));
    }
    if message.trim().is_empty() {
        return Err(StoreError::Invalid(format!("step {step_number} has no message")));
    }
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(StoreError::Invalid(format!(
            "step {step_number} is longer than {MAX_MESSAGE_LENGTH} characters"
        )));
    }
    if let Some(seconds) = interval_seconds
        && !(1..=MAX_INTERVAL_SECS).contains(&seconds)
    {
        return Err(StoreError::Invalid(format!(
            "step {step_number} interval override must be between 1 and \
             {MAX_INTERVAL_SECS} seconds, got {seconds}"
        )));
    }
    Ok(())
}

impl Store {
    /// Creates a campaign for an existing account.
    pub async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign, StoreError> {
        validate_cadence(new.interval_seconds, new.max_steps)?;
        if new.name.trim().is_empty() {
            return Err(StoreError::Invalid("campaign name is empty".to_owned()));
        }
        // Surface a missing owner as NotFound rather than a constraint error.
        self.get_account(&new.account_id).await?;

        let campaign = Campaign {
            id: new_id(),
            account_id: new.account_id,
            name: new.name.trim().to_owned(),
            interval_seconds: new.interval_seconds,
            max_steps: new.max_steps,
            active: new.active,
        };

        sqlx::query(
            "INSERT INTO campaigns (id, account_id, name, interval_seconds, max_steps, active)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign.id)
        .bind(&campaign.account_id)
        .bind(&campaign.name)
        .bind(campaign.interval_seconds)
        .bind(campaign.max_steps)
        .bind(campaign.active)
        .execute(&self.pool)
        .await?;

        info!(campaign_id = %campaign.id, account_id = %campaign.account_id, "Campaign created");
        Ok(campaign)
    }

    /// Creates a campaign and all its steps from a validated plan, atomically.
    pub async fn import_plan(
        &self,
        account_id: &str,
        plan: &CampaignPlan,
    ) -> Result<Campaign, StoreError> {
        plan.validate()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        self.get_account(account_id).await?;

        let campaign = Campaign {
            id: new_id(),
            account_id: account_id.to_owned(),
            name: plan.name.trim().to_owned(),
            interval_seconds: plan.interval_seconds,
            max_steps: plan.effective_max_steps(),
            active: plan.active,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO campaigns (id, account_id, name, interval_seconds, max_steps, active)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign.id)
        .bind(&campaign.account_id)
        .bind(&campaign.name)
        .bind(campaign.interval_seconds)
        .bind(campaign.max_steps)
        .bind(campaign.active)
        .execute(&mut *tx)
        .await?;

        for step in &plan.steps {
            sqlx::query(
                "INSERT INTO campaign_steps (id, campaign_id, step_number, message, interval_seconds)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(new_id())
            .bind(&campaign.id)
            .bind(step.step_number)
            .bind(&step.message)
            .bind(step.interval_seconds)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            campaign_id = %campaign.id,
            steps = plan.steps.len(),
            "Campaign imported from plan"
        );
        Ok(campaign)
    }

    /// Fetches one campaign.
    pub async fn get_campaign(&self, id: &str) -> Result<Campaign, StoreError> {
        sqlx::query_as::<_, Campaign>(&format!("SELECT {COLUMNS} FROM campaigns WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("Campaign", id))
    }

    /// Lists every campaign.
    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>, StoreError> {
        Ok(
            sqlx::query_as::<_, Campaign>(&format!("SELECT {COLUMNS} FROM campaigns ORDER BY name"))
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Lists the active campaigns owned by an account.
    pub async fn active_campaigns_for(
        &self,
        account_id: &str,
    ) -> Result<Vec<Campaign>, StoreError> {
        Ok(sqlx::query_as::<_, Campaign>(&format!(
            "SELECT {COLUMNS} FROM campaigns WHERE account_id = ? AND active = 1 ORDER BY name"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Updates name, interval and step limit. `None` leaves a field unchanged.
    pub async fn update_campaign(
        &self,
        id: &str,
        name: Option<&str>,
        interval_seconds: Option<i64>,
        max_steps: Option<i64>,
    ) -> Result<Campaign, StoreError> {
        let current = self.get_campaign(id).await?;
        let interval_seconds = interval_seconds.unwrap_or(current.interval_seconds);
        let max_steps = max_steps.unwrap_or(current.max_steps);
        validate_cadence(interval_seconds, max_steps)?;

        sqlx::query(
            "UPDATE campaigns SET name = COALESCE(?, name), interval_seconds = ?, max_steps = ?
             WHERE id = ?",
        )
        .bind(name.map(str::trim).filter(|n| !n.is_empty()))
        .bind(interval_seconds)
        .bind(max_steps)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_campaign(id).await
    }

    /// Turns scheduling of a campaign on or off.
    pub async fn set_campaign_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE campaigns SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Campaign", id));
        }
        info!(campaign_id = %id, active, "Campaign activity changed");
        Ok(())
    }

    /// Deletes a campaign and its steps. Assigned contacts become unassigned.
    pub async fn delete_campaign(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM campaign_steps WHERE campaign_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE contacts SET campaign_id = NULL WHERE campaign_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::not_found("Campaign", id));
        }
        tx.commit().await?;
        info!(campaign_id = %id, "Campaign deleted");
        Ok(())
    }

    /// Adds a step, or replaces the message and override of an existing step number.
    pub async fn upsert_step(
        &self,
        campaign_id: &str,
        step_number: i64,
        message: &str,
        interval_seconds: Option<i64>,
    ) -> Result<CampaignStep, StoreError> {
        validate_step(step_number, message, interval_seconds)?;
        self.get_campaign(campaign_id).await?;

        sqlx::query(
            "INSERT INTO campaign_steps (id, campaign_id, step_number, message, interval_seconds)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (campaign_id, step_number)
             DO UPDATE SET message = excluded.message, interval_seconds = excluded.interval_seconds",
        )
        .bind(new_id())
        .bind(campaign_id)
        .bind(step_number)
        .bind(message)
        .bind(interval_seconds)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, CampaignStep>(&format!(
            "SELECT {STEP_COLUMNS} FROM campaign_steps WHERE campaign_id = ? AND step_number = ?"
        ))
        .bind(campaign_id)
        .bind(step_number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("Step", format!("{campaign_id}#{step_number}")))
    }

    /// Lists a campaign's steps in ascending step order.
    pub async fn steps_for(&self, campaign_id: &str) -> Result<Vec<CampaignStep>, StoreError> {
        Ok(sqlx::query_as::<_, CampaignStep>(&format!(
            "SELECT {STEP_COLUMNS} FROM campaign_steps WHERE campaign_id = ? ORDER BY step_number"
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Removes one step.
    pub async fn delete_step(&self, campaign_id: &str, step_number: i64) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM campaign_steps WHERE campaign_id = ? AND step_number = ?")
                .bind(campaign_id)
                .bind(step_number)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(
                "Step",
                format!("{campaign_id}#{step_number}"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlanStep;
    use crate::store::fixtures;

    #[tokio::test]
    async fn test_create_requires_account() {
        let store = Store::in_memory().await.unwrap();
        let result = store
            .create_campaign(NewCampaign {
                account_id: "missing".to_owned(),
                name: "x".to_owned(),
                interval_seconds: 60,
                max_steps: 1,
                active: true,
            })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { entity: "Account", .. })));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_cadence() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let result = store
            .create_campaign(NewCampaign {
                account_id: account.id.clone(),
                name: "x".to_owned(),
                interval_seconds: 0,
                max_steps: 1,
                active: true,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_intervals_past_the_cap_are_rejected() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let result = store
            .create_campaign(NewCampaign {
                account_id: account.id.clone(),
                name: "x".to_owned(),
                interval_seconds: 10_000_000_000_000,
                max_steps: 1,
                active: true,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));

        let campaign = fixtures::campaign(&store, &account.id, 60, &["a"]).await;
        let update = store
            .update_campaign(&campaign.id, None, Some(MAX_INTERVAL_SECS + 1), None)
            .await;
        assert!(matches!(update, Err(StoreError::Invalid(_))));
        let step = store
            .upsert_step(&campaign.id, 1, "a", Some(i64::MAX))
            .await;
        assert!(matches!(step, Err(StoreError::Invalid(_))));
        assert!(
            store
                .upsert_step(&campaign.id, 1, "a", Some(MAX_INTERVAL_SECS))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_steps_are_ordered_and_upserted() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let campaign = fixtures::campaign(&store, &account.id, 60, &[]).await;

        store.upsert_step(&campaign.id, 2, "second", Some(600)).await.unwrap();
        store.upsert_step(&campaign.id, 1, "first", None).await.unwrap();
        store.upsert_step(&campaign.id, 2, "second, edited", None).await.unwrap();

        let steps = store.steps_for(&campaign.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_number, 1);
        assert_eq!(steps[1].message, "second, edited");
        assert_eq!(steps[1].interval_seconds, None);
    }

    #[tokio::test]
    async fn test_step_override_must_be_positive() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let campaign = fixtures::campaign(&store, &account.id, 60, &[]).await;
        assert!(store.upsert_step(&campaign.id, 1, "hi", Some(0)).await.is_err());
        assert!(store.upsert_step(&campaign.id, 0, "hi", None).await.is_err());
        assert!(store.upsert_step(&campaign.id, 1, "  ", None).await.is_err());
    }

    #[tokio::test]
    async fn test_inactive_campaigns_are_not_listed_as_active() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let campaign = fixtures::campaign(&store, &account.id, 60, &["a"]).await;

        store.set_campaign_active(&campaign.id, false).await.unwrap();
        assert!(store.active_campaigns_for(&account.id).await.unwrap().is_empty());

        store.set_campaign_active(&campaign.id, true).await.unwrap();
        assert_eq!(store.active_campaigns_for(&account.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_plan() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let plan = CampaignPlan::example();

        let campaign = store.import_plan(&account.id, &plan).await.unwrap();
        assert_eq!(campaign.max_steps, 3);
        let steps = store.steps_for(&campaign.id).await.unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].interval_seconds, Some(3 * 86_400));
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_plan() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let mut plan = CampaignPlan::example();
        plan.steps.push(PlanStep::new(1, "duplicate"));

        assert!(matches!(
            store.import_plan(&account.id, &plan).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(store.list_campaigns().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unassigns_contacts() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let campaign = fixtures::campaign(&store, &account.id, 60, &["a"]).await;
        let contact = fixtures::contact(&store, &account.id, &campaign.id, 5).await;

        store.delete_campaign(&campaign.id).await.unwrap();

        let contact = store.get_contact(&contact.id).await.unwrap();
        assert_eq!(contact.campaign_id, None);
        assert!(store.steps_for(&campaign.id).await.unwrap().is_empty());
    }
}
