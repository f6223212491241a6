//! Command handler implementation.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::types::{
    AccountCommand, AddContactArgs, CampaignCommand, Command, CommandResult, ContactCommand,
    CreateCampaignArgs, StatusArgs, StepArgs,
};
use crate::config::CampaignPlan;
use crate::scheduler::{NextSend, StepPlan, next_send};
use crate::store::{
    Campaign, CampaignStep, Contact, NewCampaign, NewContact, SourceAccount, Store, StoreError,
};
use crate::telegram::{ConnectionRegistry, Recipient, UserInfo, mask_phone, truncate_for_log};

/// One line of the status dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    pub account_id: String,
    pub account: String,
    pub contact_id: String,
    pub contact: String,
    pub telegram_user_id: i64,
    pub campaign_id: Option<String>,
    pub campaign: Option<String>,
    pub current_step: i64,
    pub max_steps: Option<i64>,
    pub replied: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub next: NextSend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserInfo>,
}

/// Executes operator commands against the store.
pub struct CommandHandler {
    /// Campaign store.
    store: Store,

    /// Connections used to resolve contacts and look up profiles.
    registry: Arc<ConnectionRegistry>,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub const fn new(store: Store, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Executes a command and reports the outcome.
    pub async fn execute(&self, command: Command) -> CommandResult {
        debug!("Handling command: {}", command);

        if command.needs_terminal() {
            return CommandResult::error(format!(
                "'{command}' must be run from an interactive terminal"
            ));
        }

        let result = match command {
            Command::Run => CommandResult::error("The worker is started by the binary"),
            Command::Account(cmd) => self.handle_account(cmd).await,
            Command::Campaign(cmd) => self.handle_campaign(cmd).await,
            Command::Contact(cmd) => self.handle_contact(cmd).await,
            Command::Status(args) => self.handle_status(args).await,
        };

        info!("Command result: success={}", result.success);
        result
    }

    async fn handle_account(&self, command: AccountCommand) -> CommandResult {
        let outcome = match command {
            AccountCommand::List => self.list_accounts().await,
            AccountCommand::Update { id, name, tag } => self
                .store
                .update_account(&id, name.as_deref(), tag.as_deref())
                .await
                .map(|a| format!("✓ Updated account {}", a.label())),
            AccountCommand::Remove { id } => {
                self.registry.evict(&id).await;
                self.store
                    .delete_account(&id)
                    .await
                    .map(|()| format!("✓ Deleted account {id}"))
            }
            AccountCommand::Add(_) | AccountCommand::Login { .. } => {
                return CommandResult::error("Sign-in needs an interactive terminal");
            }
        };
        into_result(outcome)
    }

    async fn list_accounts(&self) -> Result<String, StoreError> {
        let accounts = self.store.list_accounts().await?;
        if accounts.is_empty() {
            return Ok("No accounts configured.".to_owned());
        }

        let mut lines = vec!["Accounts:".to_owned()];
        for account in &accounts {
            let marker = if account.is_active() { "▶ " } else { "  " };
            lines.push(format!(
                "{marker}{} {} [{}] {}{}",
                account.id,
                account.label(),
                account.status,
                mask_phone(&account.phone),
                account
                    .tag
                    .as_deref()
                    .map(|t| format!(" #{t}"))
                    .unwrap_or_default(),
            ));
        }
        Ok(lines.join("\n"))
    }

    async fn handle_campaign(&self, command: CampaignCommand) -> CommandResult {
        let outcome = match command {
            CampaignCommand::Create(args) => self.create_campaign(args).await,
            CampaignCommand::Import { account, file } => {
                let plan = match CampaignPlan::load_from_file(&file) {
                    Ok(plan) => plan,
                    Err(e) => {
                        return CommandResult::error(format!(
                            "✗ Could not read plan {}: {e}",
                            file.display()
                        ));
                    }
                };
                self.store.import_plan(&account, &plan).await.map(|c| {
                    format!(
                        "✓ Imported campaign {} '{}' with {} steps",
                        c.id,
                        c.name,
                        plan.steps.len()
                    )
                })
            }
            CampaignCommand::List { account } => self.list_campaigns(account.as_deref()).await,
            CampaignCommand::Show { id } => self.show_campaign(&id).await,
            CampaignCommand::Update {
                id,
                name,
                interval,
                max_steps,
            } => self
                .store
                .update_campaign(&id, name.as_deref(), interval, max_steps)
                .await
                .map(|c| format!("✓ Updated campaign {}: {}", c.id, describe_cadence(&c))),
            CampaignCommand::Step(args) => self.upsert_step(args).await,
            CampaignCommand::RemoveStep { campaign, number } => self
                .store
                .delete_step(&campaign, number)
                .await
                .map(|()| format!("✓ Removed step {number}")),
            CampaignCommand::Pause { id } => self
                .store
                .set_campaign_active(&id, false)
                .await
                .map(|()| format!("⏸ Campaign {id} paused")),
            CampaignCommand::Resume { id } => self
                .store
                .set_campaign_active(&id, true)
                .await
                .map(|()| format!("▶ Campaign {id} resumed")),
            CampaignCommand::Remove { id } => self
                .store
                .delete_campaign(&id)
                .await
                .map(|()| format!("✓ Deleted campaign {id}")),
        };
        into_result(outcome)
    }

    async fn create_campaign(&self, args: CreateCampaignArgs) -> Result<String, StoreError> {
        let campaign = self
            .store
            .create_campaign(NewCampaign {
                account_id: args.account,
                name: args.name,
                interval_seconds: args.interval,
                max_steps: args.max_steps,
                active: !args.paused,
            })
            .await?;

        Ok(format!(
            "✓ Created campaign {} '{}' ({})\nAdd messages with: campaign step {} <number> <text>",
            campaign.id,
            campaign.name,
            describe_cadence(&campaign),
            campaign.id
        ))
    }

    async fn list_campaigns(&self, account: Option<&str>) -> Result<String, StoreError> {
        let campaigns: Vec<Campaign> = self
            .store
            .list_campaigns()
            .await?
            .into_iter()
            .filter(|c| account.is_none_or(|a| c.account_id == a))
            .collect();

        if campaigns.is_empty() {
            return Ok("No campaigns configured.".to_owned());
        }

        let mut lines = vec!["Campaigns:".to_owned()];
        for campaign in &campaigns {
            let marker = if campaign.active { "▶ " } else { "⏸ " };
            let contacts = self.store.contacts_for_campaign(&campaign.id).await?;
            lines.push(format!(
                "{marker}{} '{}' ({}, {} contacts)",
                campaign.id,
                campaign.name,
                describe_cadence(campaign),
                contacts.len()
            ));
        }
        Ok(lines.join("\n"))
    }

    async fn show_campaign(&self, id: &str) -> Result<String, StoreError> {
        let campaign = self.store.get_campaign(id).await?;
        let steps = self.store.steps_for(id).await?;

        let mut out = format!(
            "Campaign [{}] '{}'\nAccount: {}\nStatus: {}\nCadence: {}\n",
            campaign.id,
            campaign.name,
            campaign.account_id,
            if campaign.active { "▶ Active" } else { "⏸ Paused" },
            describe_cadence(&campaign),
        );

        if steps.is_empty() {
            out.push_str("No steps defined.");
            return Ok(out);
        }

        for step in &steps {
            let wait = step.interval_seconds.filter(|s| *s > 0).map_or_else(
                || format_duration(campaign.interval_seconds),
                |s| format!("{} override", format_duration(s)),
            );
            let beyond = if step.step_number > campaign.max_steps {
                " (beyond max steps, never sent)"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "  {}. [{wait}] \"{}\"{beyond}",
                step.step_number,
                truncate_for_log(&step.message, 40)
            );
        }
        Ok(out.trim_end().to_owned())
    }

    async fn upsert_step(&self, args: StepArgs) -> Result<String, StoreError> {
        let campaign = self.store.get_campaign(&args.campaign).await?;
        let step = self
            .store
            .upsert_step(&campaign.id, args.number, &args.message, args.interval)
            .await?;

        let mut message = format!("✓ Step {} saved", step.step_number);
        if step.step_number > campaign.max_steps {
            let _ = write!(
                message,
                "\n⚠ Campaign sends {} steps; raise --max-steps to include it",
                campaign.max_steps
            );
        }
        Ok(message)
    }

    async fn handle_contact(&self, command: ContactCommand) -> CommandResult {
        let outcome = match command {
            ContactCommand::Add(args) => return self.add_contact(args).await,
            ContactCommand::Assign { id, campaign } => self
                .store
                .assign_contact(&id, campaign.as_deref())
                .await
                .map(|c| match &c.campaign_id {
                    Some(campaign_id) => {
                        format!("✓ {} now follows campaign {campaign_id}", c.label())
                    }
                    None => format!("✓ {} unassigned", c.label()),
                }),
            ContactCommand::Update { id, name, tag } => self
                .store
                .update_contact(&id, name.as_deref(), tag.as_deref())
                .await
                .map(|c| format!("✓ Updated contact {}", c.label())),
            ContactCommand::List { campaign } => self.list_contacts(campaign.as_deref()).await,
            ContactCommand::History { id } => self.contact_history(&id).await,
            ContactCommand::Remove { id } => self
                .store
                .delete_contact(&id)
                .await
                .map(|()| format!("✓ Deleted contact {id}")),
        };
        into_result(outcome)
    }

    async fn add_contact(&self, args: AddContactArgs) -> CommandResult {
        let account = match self.store.get_account(&args.account).await {
            Ok(account) => account,
            Err(e) => return CommandResult::error(format!("✗ {e}")),
        };
        if !account.is_active() {
            return CommandResult::error(format!(
                "✗ Account {} is {}; sign it in first",
                account.id, account.status
            ));
        }

        let resolved = match self.registry.get_or_create(&account).await {
            Ok(connection) => connection.resolve_identifier(&args.identifier).await,
            Err(e) => Err(e),
        };
        let resolved = match resolved {
            Ok(user) => user,
            Err(e) => {
                warn!(account_id = %account.id, "Could not resolve {}: {}", args.identifier, e);
                return CommandResult::error(format!("✗ {e}"));
            }
        };

        let created = self
            .store
            .create_contact(NewContact {
                account_id: account.id,
                campaign_id: args.campaign,
                telegram_user_id: resolved.user_id,
                access_hash: resolved.access_hash,
                name: args.name.or(resolved.display_name),
                tag: args.tag,
            })
            .await;

        into_result(created.map(|c| {
            format!(
                "✓ Added contact {} ({}, user id {})",
                c.id,
                c.label(),
                c.telegram_user_id
            )
        }))
    }

    async fn list_contacts(&self, campaign: Option<&str>) -> Result<String, StoreError> {
        let contacts = match campaign {
            Some(id) => self.store.contacts_for_campaign(id).await?,
            None => self.store.list_contacts().await?,
        };
        if contacts.is_empty() {
            return Ok("No contacts.".to_owned());
        }

        let mut lines = vec!["Contacts:".to_owned()];
        for contact in &contacts {
            let replied = if contact.replied { " ✉ replied" } else { "" };
            lines.push(format!(
                "  {} {} (user {}) step {} campaign {}{replied}",
                contact.id,
                contact.label(),
                contact.telegram_user_id,
                contact.current_step,
                contact.campaign_id.as_deref().unwrap_or("-"),
            ));
        }
        Ok(lines.join("\n"))
    }

    async fn contact_history(&self, id: &str) -> Result<String, StoreError> {
        let contact = self.store.get_contact(id).await?;
        let log = self.store.message_log_for(id).await?;

        if log.is_empty() {
            return Ok(format!("Nothing sent to {} yet.", contact.label()));
        }

        let mut lines = vec![format!("Messages sent to {}:", contact.label())];
        for entry in &log {
            lines.push(format!(
                "  step {} at {}",
                entry.step_number,
                entry.sent_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        Ok(lines.join("\n"))
    }

    async fn handle_status(&self, args: StatusArgs) -> CommandResult {
        let rows = match self.status_rows(args.profiles).await {
            Ok(rows) => rows,
            Err(e) => return CommandResult::error(format!("✗ {e}")),
        };

        if args.json {
            return match serde_json::to_string_pretty(&rows) {
                Ok(json) => CommandResult::success(json),
                Err(e) => CommandResult::error(format!("✗ Failed to encode status: {e}")),
            };
        }

        if rows.is_empty() {
            return CommandResult::success("No contacts.");
        }

        let now = Utc::now();
        let mut lines = vec!["Status:".to_owned()];
        for row in &rows {
            let marker = if row.next.is_due(now) { "→ " } else { "  " };
            let progress = row.max_steps.map_or_else(
                || "unassigned".to_owned(),
                |max| format!("step {}/{max}", row.current_step.min(max + 1)),
            );
            let who = row
                .profile
                .as_ref()
                .map_or_else(|| row.contact.clone(), |p| p.full_name.clone());
            lines.push(format!(
                "{marker}{} → {who} [{}] {progress}, next: {}",
                row.account,
                row.campaign.as_deref().unwrap_or("-"),
                row.next
            ));
        }
        CommandResult::success(lines.join("\n"))
    }

    /// Builds the dashboard rows, optionally with live profile lookups.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn status_rows(&self, with_profiles: bool) -> Result<Vec<StatusRow>, StoreError> {
        let accounts: HashMap<String, SourceAccount> = self
            .store
            .list_accounts()
            .await?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        let mut campaigns: HashMap<String, (Campaign, Vec<CampaignStep>)> = HashMap::new();
        for campaign in self.store.list_campaigns().await? {
            let steps = self.store.steps_for(&campaign.id).await?;
            campaigns.insert(campaign.id.clone(), (campaign, steps));
        }

        let contacts = self.store.list_contacts().await?;
        let mut rows = Vec::with_capacity(contacts.len());

        for contact in contacts {
            let campaign = contact
                .campaign_id
                .as_deref()
                .and_then(|id| campaigns.get(id));
            let next = campaign.map_or(NextSend::Finished, |(campaign, steps)| {
                next_send(campaign, &StepPlan::new(campaign, steps), &contact)
            });

            let account = accounts.get(&contact.account_id);
            let profile = match account {
                Some(account) if with_profiles => Some(self.profile_of(account, &contact).await),
                _ => None,
            };

            rows.push(StatusRow {
                account_id: contact.account_id.clone(),
                account: account.map_or_else(|| contact.account_id.clone(), SourceAccount::label),
                contact_id: contact.id.clone(),
                contact: contact.label(),
                telegram_user_id: contact.telegram_user_id,
                campaign_id: contact.campaign_id.clone(),
                campaign: campaign.map(|(c, _)| c.name.clone()),
                current_step: contact.current_step,
                max_steps: campaign.map(|(c, _)| c.max_steps),
                replied: contact.replied,
                last_message_at: contact.last_message_at,
                next,
                profile,
            });
        }

        Ok(rows)
    }

    async fn profile_of(&self, account: &SourceAccount, contact: &Contact) -> UserInfo {
        if !account.is_active() {
            return UserInfo::unknown(contact.telegram_user_id);
        }
        match self.registry.get_or_create(account).await {
            Ok(connection) => {
                connection
                    .user_info_or_placeholder(Recipient::from(contact))
                    .await
            }
            Err(e) => {
                debug!(account_id = %account.id, "No connection for profile lookup: {}", e);
                UserInfo::unknown(contact.telegram_user_id)
            }
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler").finish_non_exhaustive()
    }
}

fn into_result(outcome: Result<String, StoreError>) -> CommandResult {
    match outcome {
        Ok(message) => CommandResult::success(message),
        Err(e) => CommandResult::error(format!("✗ {e}")),
    }
}

fn describe_cadence(campaign: &Campaign) -> String {
    format!(
        "every {}, {} steps",
        format_duration(campaign.interval_seconds),
        campaign.max_steps
    )
}

/// Formats a duration in seconds to a human-readable string.
fn format_duration(secs: i64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    } else {
        let days = secs / 86_400;
        let hours = (secs % 86_400) / 3600;
        if hours == 0 {
            format!("{days}d")
        } else {
            format!("{days}d {hours}h")
        }
    }
}
