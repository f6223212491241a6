//! Row types persisted by the campaign store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a source account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Created, waiting for the login code handshake.
    PendingVerification,
    /// Signed in; eligible for scheduling.
    Active,
    /// Verification failed.
    Error,
}

impl AccountStatus {
    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingVerification => "pending_verification",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One authenticated Telegram identity that campaigns are sent from.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SourceAccount {
    pub id: String,
    pub phone: String,
    pub name: Option<String>,
    pub tag: Option<String>,
    pub status: AccountStatus,
    /// Opaque credential material: the account's session file reference.
    pub session_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceAccount {
    /// Whether the scheduler may act on this account.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Name for display, falling back to the masked phone number.
    #[must_use]
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| crate::telegram::mask_phone(&self.phone))
    }
}

/// An ordered outreach program owned by one source account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct Campaign {
    pub id: String,
    pub account_id: String,
    pub name: String,
    /// Default seconds between messages.
    pub interval_seconds: i64,
    /// Highest step number that will be sent.
    pub max_steps: i64,
    pub active: bool,
}

/// One message of a campaign at a 1-based position.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignStep {
    pub id: String,
    pub campaign_id: String,
    pub step_number: i64,
    pub message: String,
    /// Overrides the campaign interval when set and positive.
    pub interval_seconds: Option<i64>,
}

/// A target user bound to one source account and optionally one campaign.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub account_id: String,
    pub campaign_id: Option<String>,
    pub telegram_user_id: i64,
    /// MTProto access hash captured at resolution time.
    pub access_hash: Option<i64>,
    pub name: Option<String>,
    pub tag: Option<String>,
    pub replied: bool,
    pub current_step: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// Whether the contact is assigned to the given campaign.
    #[must_use]
    pub fn is_assigned_to(&self, campaign_id: &str) -> bool {
        self.campaign_id.as_deref() == Some(campaign_id)
    }

    /// Name for display, falling back to the numeric user id.
    #[must_use]
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("User {}", self.telegram_user_id))
    }
}

/// Immutable record of one successful send.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageLogEntry {
    pub id: String,
    pub account_id: String,
    pub contact_id: String,
    pub step_number: i64,
    pub sent_at: DateTime<Utc>,
}

/// Fields for a new campaign.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub account_id: String,
    pub name: String,
    pub interval_seconds: i64,
    pub max_steps: i64,
    pub active: bool,
}

/// Fields for a new contact.
#[derive(Debug, Clone)]
pub struct NewContact {
    pub account_id: String,
    pub campaign_id: Option<String>,
    pub telegram_user_id: i64,
    pub access_hash: Option<i64>,
    pub name: Option<String>,
    pub tag: Option<String>,
}

/// Generates a fresh row id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(AccountStatus::PendingVerification.as_str(), "pending_verification");
        assert_eq!(AccountStatus::Active.to_string(), "active");
    }

    #[test]
    fn test_contact_assignment() {
        let contact = Contact {
            id: "c".to_owned(),
            account_id: "a".to_owned(),
            campaign_id: Some("camp".to_owned()),
            telegram_user_id: 42,
            access_hash: None,
            name: None,
            tag: None,
            replied: false,
            current_step: 1,
            last_message_at: None,
        };
        assert!(contact.is_assigned_to("camp"));
        assert!(!contact.is_assigned_to("other"));
        assert_eq!(contact.label(), "User 42");
    }
}
