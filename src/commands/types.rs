//! Command types and definitions.

use std::fmt;
use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::config::{DEFAULT_CAMPAIGN_INTERVAL_SECS, DEFAULT_MAX_STEPS};

/// Top-level operator commands.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the scheduler worker until Ctrl+C.
    Run,

    /// Manage source accounts.
    #[command(subcommand)]
    Account(AccountCommand),

    /// Manage campaigns and their steps.
    #[command(subcommand)]
    Campaign(CampaignCommand),

    /// Manage contacts.
    #[command(subcommand)]
    Contact(ContactCommand),

    /// Show every contact with its next scheduled message.
    Status(StatusArgs),
}

impl Command {
    /// Whether the command needs an interactive terminal (login prompts or
    /// the long-running worker) instead of the command handler.
    #[must_use]
    pub const fn needs_terminal(&self) -> bool {
        matches!(
            self,
            Self::Run | Self::Account(AccountCommand::Add(_) | AccountCommand::Login { .. })
        )
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Account(cmd) => match cmd {
                AccountCommand::Add(_) => "account add",
                AccountCommand::Login { .. } => "account login",
                AccountCommand::List => "account list",
                AccountCommand::Update { .. } => "account update",
                AccountCommand::Remove { .. } => "account remove",
            },
            Self::Campaign(cmd) => match cmd {
                CampaignCommand::Create(_) => "campaign create",
                CampaignCommand::Import { .. } => "campaign import",
                CampaignCommand::List { .. } => "campaign list",
                CampaignCommand::Show { .. } => "campaign show",
                CampaignCommand::Update { .. } => "campaign update",
                CampaignCommand::Step(_) => "campaign step",
                CampaignCommand::RemoveStep { .. } => "campaign remove-step",
                CampaignCommand::Pause { .. } => "campaign pause",
                CampaignCommand::Resume { .. } => "campaign resume",
                CampaignCommand::Remove { .. } => "campaign remove",
            },
            Self::Contact(cmd) => match cmd {
                ContactCommand::Add(_) => "contact add",
                ContactCommand::Assign { .. } => "contact assign",
                ContactCommand::Update { .. } => "contact update",
                ContactCommand::List { .. } => "contact list",
                ContactCommand::History { .. } => "contact history",
                ContactCommand::Remove { .. } => "contact remove",
            },
            Self::Status(_) => "status",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments for onboarding a new source account.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct AddAccountArgs {
    /// Phone number with country code.
    #[arg(long)]
    pub phone: String,

    /// Display name.
    #[arg(long)]
    pub name: Option<String>,

    /// Free-form tag.
    #[arg(long)]
    pub tag: Option<String>,
}

/// Source account commands.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum AccountCommand {
    /// Create an account and sign it in.
    Add(AddAccountArgs),

    /// Sign an existing account in again.
    Login {
        /// Account id.
        id: String,
    },

    /// List accounts.
    #[command(alias = "ls")]
    List,

    /// Change name or tag.
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },

    /// Delete an account with its campaigns, contacts and history.
    #[command(alias = "rm")]
    Remove { id: String },
}

/// Arguments for creating an empty campaign.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct CreateCampaignArgs {
    /// Owning account id.
    #[arg(long)]
    pub account: String,

    /// Campaign name.
    #[arg(long)]
    pub name: String,

    /// Default seconds between messages.
    #[arg(long, default_value_t = DEFAULT_CAMPAIGN_INTERVAL_SECS)]
    pub interval: i64,

    /// Number of steps to send.
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    pub max_steps: i64,

    /// Create the campaign paused.
    #[arg(long)]
    pub paused: bool,
}

/// Arguments for adding or replacing a campaign step.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct StepArgs {
    /// Campaign id.
    pub campaign: String,

    /// 1-based step number.
    pub number: i64,

    /// Message text.
    pub message: String,

    /// Seconds to wait before this step instead of the campaign default.
    #[arg(long)]
    pub interval: Option<i64>,
}

/// Campaign commands.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum CampaignCommand {
    /// Create an empty campaign.
    Create(CreateCampaignArgs),

    /// Create a campaign with its steps from a JSON plan file.
    Import {
        /// Owning account id.
        #[arg(long)]
        account: String,

        /// Plan file.
        file: PathBuf,
    },

    /// List campaigns.
    #[command(alias = "ls")]
    List {
        /// Only campaigns of this account.
        #[arg(long)]
        account: Option<String>,
    },

    /// Show a campaign with its steps.
    Show { id: String },

    /// Change name, interval or step limit.
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        interval: Option<i64>,
        #[arg(long)]
        max_steps: Option<i64>,
    },

    /// Add a step or replace an existing one.
    Step(StepArgs),

    /// Delete one step.
    RemoveStep { campaign: String, number: i64 },

    /// Stop scheduling a campaign.
    Pause { id: String },

    /// Resume scheduling a campaign.
    Resume { id: String },

    /// Delete a campaign; its contacts become unassigned.
    #[command(alias = "rm")]
    Remove { id: String },
}

/// Arguments for adding a contact.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct AddContactArgs {
    /// Account the contact is messaged from.
    #[arg(long)]
    pub account: String,

    /// `@username`, `+phone` or numeric user id.
    #[arg(long)]
    pub identifier: String,

    /// Campaign to enroll the contact in.
    #[arg(long)]
    pub campaign: Option<String>,

    /// Display name; defaults to the Telegram name.
    #[arg(long)]
    pub name: Option<String>,

    /// Free-form tag.
    #[arg(long)]
    pub tag: Option<String>,
}

/// Contact commands.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ContactCommand {
    /// Resolve a Telegram user and add them as a contact.
    Add(AddContactArgs),

    /// Move a contact to another campaign (omit `--campaign` to unassign).
    Assign {
        id: String,
        #[arg(long)]
        campaign: Option<String>,
    },

    /// Change name or tag.
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },

    /// List contacts.
    #[command(alias = "ls")]
    List {
        /// Only contacts of this campaign.
        #[arg(long)]
        campaign: Option<String>,
    },

    /// Show messages sent to a contact.
    History { id: String },

    /// Delete a contact and its history.
    #[command(alias = "rm")]
    Remove { id: String },
}

/// Arguments for the status dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
pub struct StatusArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,

    /// Look up each contact's Telegram profile.
    #[arg(long)]
    pub profiles: bool,
}

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> Option<Command> {
        Cli::try_parse_from(std::iter::once("followup_bot").chain(args.iter().copied()))
            .ok()
            .map(|cli| cli.command)
    }

    #[test]
    fn test_parse_run() {
        assert_eq!(parse(&["run"]), Some(Command::Run));
    }

    #[test]
    fn test_parse_campaign_create_defaults() {
        assert_eq!(
            parse(&["campaign", "create", "--account", "a1", "--name", "Webinar"]),
            Some(Command::Campaign(CampaignCommand::Create(CreateCampaignArgs {
                account: "a1".to_owned(),
                name: "Webinar".to_owned(),
                interval: 86_400,
                max_steps: 3,
                paused: false,
            })))
        );
    }

    #[test]
    fn test_parse_step_with_override() {
        assert_eq!(
            parse(&["campaign", "step", "c1", "2", "Any news?", "--interval", "600"]),
            Some(Command::Campaign(CampaignCommand::Step(StepArgs {
                campaign: "c1".to_owned(),
                number: 2,
                message: "Any news?".to_owned(),
                interval: Some(600),
            })))
        );
    }

    #[test]
    fn test_parse_assign_without_campaign_unassigns() {
        assert_eq!(
            parse(&["contact", "assign", "k1"]),
            Some(Command::Contact(ContactCommand::Assign {
                id: "k1".to_owned(),
                campaign: None,
            }))
        );
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(parse(&["account", "ls"]), Some(Command::Account(AccountCommand::List)));
        assert_eq!(
            parse(&["contact", "rm", "k1"]),
            Some(Command::Contact(ContactCommand::Remove { id: "k1".to_owned() }))
        );
    }

    #[test]
    fn test_parse_status_flags() {
        assert_eq!(
            parse(&["status", "--json"]),
            Some(Command::Status(StatusArgs {
                json: true,
                profiles: false,
            }))
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse(&["campaign", "step", "c1", "two", "hi"]), None);
        assert_eq!(parse(&["contact", "add", "--account", "a1"]), None);
        assert_eq!(parse(&["unknown"]), None);
    }

    #[test]
    fn test_needs_terminal() {
        assert!(Command::Run.needs_terminal());
        assert!(Command::Account(AccountCommand::Login { id: "a".to_owned() }).needs_terminal());
        assert!(!Command::Account(AccountCommand::List).needs_terminal());
        assert_eq!(Command::Status(StatusArgs::default()).to_string(), "status");
    }
}
