//! Command handling module.
//!
//! The operator surface of the bot: typed subcommands for accounts,
//! campaigns and contacts, executed against the campaign store.

mod handler;
mod types;

pub use handler::{CommandHandler, StatusRow};
pub use types::{
    AccountCommand, AddAccountArgs, AddContactArgs, CampaignCommand, Command, CommandResult,
    ContactCommand, CreateCampaignArgs, StatusArgs, StepArgs,
};
