//! Follow-up User Bot Library
//!
//! A Telegram userbot that sends multi-step follow-up campaigns from one or
//! more personal accounts and stops as soon as a contact replies.
//!
//! This crate provides the core functionality for:
//! - Loading environment settings and campaign plans
//! - Persisting accounts, campaigns, contacts and the delivery log in `SQLite`
//! - Connecting to Telegram via `MTProto`, one cached connection per account
//! - Selecting due contacts and delivering the next step on a fixed tick
//! - Detecting replies and handling operator commands

pub mod commands;
pub mod config;
pub mod scheduler;
pub mod store;
pub mod telegram;
