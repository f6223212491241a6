//! Follow-up campaign scheduler module.
//!
//! Selects due contacts, delivers the next campaign step to each of them,
//! watches for replies and drives the whole thing on a fixed period.

mod delivery;
mod due;
mod reply;
mod runner;
mod state;

pub use delivery::{DeliveryLoop, TickError};
pub use due::{NextSend, StepPlan, next_send, select_due};
pub use reply::ReplyWatcher;
pub use runner::{CampaignScheduler, SchedulerMessage};
pub use state::{Phase, SchedulerState, TickReport};
