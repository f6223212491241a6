//! Messaging channel contract.
//!
//! The scheduler only needs a handful of capabilities from Telegram:
//! send a direct message, resolve an identifier, look up a profile and
//! report incoming messages. Everything behind these traits is opaque.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::store::{Contact, SourceAccount};

/// Errors that can occur during channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Password required for 2FA")]
    PasswordRequired(grammers_client::client::PasswordToken),

    #[error("Invalid password")]
    InvalidPassword(grammers_client::client::PasswordToken),
}

impl ChannelError {
    /// Whether the error means the account's credential is unusable.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Address of a Telegram user as stored on a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: i64,
    pub access_hash: Option<i64>,
}

impl From<&Contact> for Recipient {
    fn from(contact: &Contact) -> Self {
        Self {
            user_id: contact.telegram_user_id,
            access_hash: contact.access_hash,
        }
    }
}

/// Result of resolving a username, phone number or numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    pub user_id: i64,
    pub access_hash: Option<i64>,
    pub display_name: Option<String>,
}

/// Public profile details of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub is_bot: bool,
    pub is_verified: bool,
    pub full_name: String,
}

impl UserInfo {
    /// Placeholder used when a profile cannot be fetched.
    #[must_use]
    pub fn unknown(id: i64) -> Self {
        Self {
            id,
            full_name: format!("User {id}"),
            ..Self::default()
        }
    }

    /// Joins first and last name, falling back to the username or id.
    #[must_use]
    pub fn compose_full_name(
        id: i64,
        first_name: Option<&str>,
        last_name: Option<&str>,
        username: Option<&str>,
    ) -> String {
        let joined = [first_name, last_name]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            joined
        } else if let Some(username) = username {
            format!("@{username}")
        } else {
            format!("User {id}")
        }
    }
}

/// An incoming direct message, reduced to what reply detection needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEvent {
    pub account_id: String,
    pub sender_id: i64,
}

/// One live, authenticated connection for a source account.
///
/// Implementations must tolerate concurrent use for unrelated operations
/// (sending while listening).
#[async_trait]
pub trait MessagingChannel: Send + Sync + fmt::Debug {
    /// Delivers one text message.
    async fn send_message(&self, recipient: Recipient, text: &str) -> Result<(), ChannelError>;

    /// Resolves `@username`, `+phone` or a numeric id to a user.
    async fn resolve_identifier(&self, identifier: &str) -> Result<ResolvedUser, ChannelError>;

    /// Fetches profile details of a user.
    async fn user_info(&self, recipient: Recipient) -> Result<UserInfo, ChannelError>;

    /// Starts forwarding incoming messages to `sink`, tagged with `account_id`.
    ///
    /// Calling this more than once per connection is a caller error; the
    /// registry guarantees a single installation.
    fn watch_incoming(
        &self,
        account_id: &str,
        sink: mpsc::Sender<IncomingEvent>,
    ) -> Result<(), ChannelError>;

    /// Closes the connection.
    fn disconnect(&self);
}

/// Opens connections from stored account credentials.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Establishes a connection using the account's stored credential.
    ///
    /// Fails with [`ChannelError::Auth`] if the credential is missing,
    /// invalid or expired.
    async fn connect(
        &self,
        account: &SourceAccount,
    ) -> Result<Arc<dyn MessagingChannel>, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_composition() {
        assert_eq!(
            UserInfo::compose_full_name(1, Some("Ada"), Some("Lovelace"), None),
            "Ada Lovelace"
        );
        assert_eq!(UserInfo::compose_full_name(1, Some("Ada"), None, None), "Ada");
        assert_eq!(UserInfo::compose_full_name(1, None, None, Some("ada")), "@ada");
        assert_eq!(UserInfo::compose_full_name(7, Some(""), None, None), "User 7");
    }

    #[test]
    fn test_unknown_user() {
        let info = UserInfo::unknown(42);
        assert_eq!(info.full_name, "User 42");
        assert!(info.username.is_none());
    }
}
