//! Due-set selection.
//!
//! Pure functions over a snapshot of one campaign: given a single `now`,
//! decide which contacts get their next message this tick and when the
//! others will. Nothing here reads the clock or the store.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::store::{Campaign, CampaignStep, Contact};

/// Step number lookup for one campaign.
#[derive(Debug, Clone)]
pub struct StepPlan<'a> {
    default_interval: i64,
    steps: HashMap<i64, &'a CampaignStep>,
}

impl<'a> StepPlan<'a> {
    /// Indexes `steps` by step number.
    #[must_use]
    pub fn new(campaign: &Campaign, steps: &'a [CampaignStep]) -> Self {
        Self {
            default_interval: campaign.interval_seconds,
            steps: steps.iter().map(|s| (s.step_number, s)).collect(),
        }
    }

    /// Message text for a step, if the step is defined.
    #[must_use]
    pub fn message_for(&self, step_number: i64) -> Option<&'a str> {
        self.steps
            .get(&step_number)
            .copied()
            .map(|s| s.message.as_str())
    }

    /// Seconds to wait after the previous send before sending `step_number`.
    ///
    /// A positive per-step override wins over the campaign default.
    #[must_use]
    pub fn interval_for(&self, step_number: i64) -> i64 {
        self.steps
            .get(&step_number)
            .and_then(|s| s.interval_seconds)
            .filter(|secs| *secs > 0)
            .unwrap_or(self.default_interval)
    }
}

/// When a contact's next message is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum NextSend {
    /// Never messaged; goes out on the next tick.
    Now,
    /// Goes out on the first tick at or after this instant.
    At(DateTime<Utc>),
    /// Will not be messaged again by this campaign.
    Finished,
}

impl NextSend {
    /// Whether a tick at `now` would send.
    #[must_use]
    pub fn is_due(self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Now => true,
            Self::At(at) => now >= at,
            Self::Finished => false,
        }
    }
}

impl std::fmt::Display for NextSend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Now => f.write_str("now"),
            Self::At(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            Self::Finished => f.write_str("finished"),
        }
    }
}

/// Computes when `contact` is next messaged by `campaign`.
#[must_use]
pub fn next_send(campaign: &Campaign, plan: &StepPlan<'_>, contact: &Contact) -> NextSend {
    if !campaign.active
        || !contact.is_assigned_to(&campaign.id)
        || contact.replied
        || contact.current_step > campaign.max_steps
    {
        return NextSend::Finished;
    }

    match contact.last_message_at {
        None => NextSend::Now,
        Some(last) => {
            // Out-of-range intervals push the send past any reachable tick.
            let at = TimeDelta::try_seconds(plan.interval_for(contact.current_step))
                .and_then(|wait| last.checked_add_signed(wait))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            NextSend::At(at)
        }
    }
}

/// Returns the contacts of `campaign` that are due at `now`.
///
/// Every contact is evaluated once against the same `now`; the result keeps
/// the input order.
#[must_use]
pub fn select_due<'c>(
    now: DateTime<Utc>,
    campaign: &Campaign,
    plan: &StepPlan<'_>,
    contacts: &'c [Contact],
) -> Vec<&'c Contact> {
    contacts
        .iter()
        .filter(|contact| next_send(campaign, plan, contact).is_due(now))
        .collect()
}
