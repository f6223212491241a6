//! Telegram client wrapper module.
//!
//! Provides the messaging channel the scheduler sends through, its
//! grammers-backed implementation, login helpers for onboarding, per-account
//! send pacing and the connection registry.

mod channel;
mod client;
mod rate_limiter;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{
    ChannelConnector, ChannelError, IncomingEvent, MessagingChannel, Recipient, ResolvedUser,
    UserInfo,
};
pub use client::{GrammersConnector, TelegramBot, mask_phone, truncate_for_log};
pub use grammers_client::client::{LoginToken, PasswordToken};
pub use rate_limiter::RateLimiter;
pub use registry::{AccountConnection, ConnectionRegistry};
