//! Campaign plan files and their validation.
//!
//! A plan is the JSON form of a campaign: its cadence and the ordered
//! list of messages. Plans are imported into the store with
//! `followup_bot campaign import` and linted offline by `validate_campaign`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{DEFAULT_CAMPAIGN_INTERVAL_SECS, MAX_INTERVAL_SECS, MAX_MESSAGE_LENGTH};

/// Errors that can occur during plan validation.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Step {step_number} exceeds maximum message length: {length} > {max_length}")]
    TooLong {
        step_number: i64,
        length: usize,
        max_length: usize,
    },

    #[error("Step {step_number} has an empty message")]
    Empty { step_number: i64 },

    #[error("Duplicate step number found: {step_number}")]
    DuplicateStep { step_number: i64 },

    #[error("Invalid step number: {step_number} (must be >= 1)")]
    InvalidStepNumber { step_number: i64 },

    #[error(
        "Step {step_number} has invalid interval override: {interval_seconds} seconds \
         (must be 1..={max})",
        max = MAX_INTERVAL_SECS
    )]
    InvalidStepInterval {
        step_number: i64,
        interval_seconds: i64,
    },

    #[error("Campaign has invalid interval: {0} seconds (must be 1..={max})", max = MAX_INTERVAL_SECS)]
    InvalidInterval(i64),

    #[error("Campaign max_steps is {max_steps} but no message is defined for step {missing}")]
    MissingStep { max_steps: i64, missing: i64 },

    #[error("Campaign name is empty")]
    EmptyName,

    #[error("No steps configured")]
    NoSteps,

    #[error("Failed to read plan file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse plan file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// A single message in a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanStep {
    /// 1-based position of the message in the sequence.
    pub step_number: i64,

    /// The message text.
    pub message: String,

    /// Seconds to wait after the previous message before sending this one.
    /// Falls back to the campaign interval when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i64>,
}

impl PlanStep {
    /// Creates a new plan step without an interval override.
    #[must_use]
    pub fn new(step_number: i64, message: impl Into<String>) -> Self {
        Self {
            step_number,
            message: message.into(),
            interval_seconds: None,
        }
    }

    /// Sets the interval override for this step.
    #[must_use]
    pub const fn with_interval(mut self, seconds: i64) -> Self {
        self.interval_seconds = Some(seconds);
        self
    }

    /// Returns the character count of the message.
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.message.chars().count()
    }
}

/// A campaign definition loaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPlan {
    /// Human readable campaign name.
    pub name: String,

    /// Default seconds between messages.
    #[serde(default = "default_interval")]
    pub interval_seconds: i64,

    /// Maximum number of steps to send. Defaults to the highest step number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<i64>,

    /// Whether the campaign starts active.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Messages to send, in any order.
    pub steps: Vec<PlanStep>,
}

fn default_interval() -> i64 {
    DEFAULT_CAMPAIGN_INTERVAL_SECS
}

fn default_active() -> bool {
    true
}

impl CampaignPlan {
    /// Loads a plan from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    /// Saves the plan to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), PlanError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Effective step limit: explicit `max_steps`, else the highest step number.
    #[must_use]
    pub fn effective_max_steps(&self) -> i64 {
        self.max_steps.unwrap_or_else(|| {
            self.steps
                .iter()
                .map(|s| s.step_number)
                .max()
                .unwrap_or(0)
        })
    }

    /// Validates the plan.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<(), PlanError> {
        self.validate_all().into_iter().collect()
    }

    /// Returns every validation problem found, in file order.
    #[must_use]
    pub fn validate_all(&self) -> Vec<Result<(), PlanError>> {
        let mut results = Vec::new();

        if self.name.trim().is_empty() {
            results.push(Err(PlanError::EmptyName));
        }
        if !(1..=MAX_INTERVAL_SECS).contains(&self.interval_seconds) {
            results.push(Err(PlanError::InvalidInterval(self.interval_seconds)));
        }
        if self.steps.is_empty() {
            results.push(Err(PlanError::NoSteps));
            return results;
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            results.push(validate_step(step, &mut seen));
        }

        // Every step up to the limit must have a message, otherwise contacts stall there.
        for n in 1..=self.effective_max_steps() {
            if !seen.contains(&n) {
                results.push(Err(PlanError::MissingStep {
                    max_steps: self.effective_max_steps(),
                    missing: n,
                }));
            }
        }

        results
    }

    /// Creates an example plan for users to reference.
    #[must_use]
    pub fn example() -> Self {
        Self {
            name: "Webinar follow-up".to_owned(),
            interval_seconds: 86_400,
            max_steps: None,
            active: true,
            steps: vec![
                PlanStep::new(1, "Hi! Thanks for joining the webinar yesterday."),
                PlanStep::new(2, "Did you get a chance to look at the slides?")
                    .with_interval(3 * 86_400),
                PlanStep::new(3, "Last ping from me, happy to answer any questions."),
            ],
        }
    }
}

fn validate_step(
    step: &PlanStep,
    seen: &mut std::collections::HashSet<i64>,
) -> Result<(), PlanError> {
    let step_number = step.step_number;

    if step_number < 1 {
        return Err(PlanError::InvalidStepNumber { step_number });
    }
    if !seen.insert(step_number) {
        return Err(PlanError::DuplicateStep { step_number });
    }
    if step.message.trim().is_empty() {
        return Err(PlanError::Empty { step_number });
    }

    let length = step.char_count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(PlanError::TooLong {
            step_number,
            length,
            max_length: MAX_MESSAGE_LENGTH,
        });
    }

    if let Some(interval_seconds) = step.interval_seconds
        && !(1..=MAX_INTERVAL_SECS).contains(&interval_seconds)
    {
        return Err(PlanError::InvalidStepInterval {
            step_number,
            interval_seconds,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(steps: Vec<PlanStep>) -> CampaignPlan {
        CampaignPlan {
            name: "test".to_owned(),
            interval_seconds: 60,
            max_steps: None,
            active: true,
            steps,
        }
    }

    #[test]
    fn test_example_is_valid() {
        assert!(CampaignPlan::example().validate().is_ok());
    }

    #[test]
    fn test_char_count_unicode() {
        let step = PlanStep::new(1, "Hello 👋🌍");
        assert_eq!(step.char_count(), 8);
    }

    #[test]
    fn test_validation_no_steps() {
        assert!(matches!(plan(vec![]).validate(), Err(PlanError::NoSteps)));
    }

    #[test]
    fn test_validation_duplicate_step() {
        let p = plan(vec![PlanStep::new(1, "a"), PlanStep::new(1, "b")]);
        assert!(matches!(
            p.validate(),
            Err(PlanError::DuplicateStep { step_number: 1 })
        ));
    }

    #[test]
    fn test_validation_zero_step_number() {
        let p = plan(vec![PlanStep::new(0, "a")]);
        assert!(matches!(
            p.validate(),
            Err(PlanError::InvalidStepNumber { step_number: 0 })
        ));
    }

    #[test]
    fn test_validation_too_long() {
        let p = plan(vec![PlanStep::new(1, "a".repeat(MAX_MESSAGE_LENGTH + 1))]);
        assert!(matches!(p.validate(), Err(PlanError::TooLong { .. })));
    }

    #[test]
    fn test_validation_gap_below_max_steps() {
        let mut p = plan(vec![PlanStep::new(1, "a"), PlanStep::new(3, "c")]);
        p.max_steps = Some(3);
        assert!(matches!(
            p.validate(),
            Err(PlanError::MissingStep { missing: 2, .. })
        ));
    }

    #[test]
    fn test_validation_negative_override() {
        let p = plan(vec![PlanStep::new(1, "a").with_interval(-5)]);
        assert!(matches!(
            p.validate(),
            Err(PlanError::InvalidStepInterval { .. })
        ));
    }

    #[test]
    fn test_validation_interval_too_long() {
        let mut p = plan(vec![PlanStep::new(1, "a").with_interval(MAX_INTERVAL_SECS + 1)]);
        assert!(matches!(
            p.validate(),
            Err(PlanError::InvalidStepInterval { .. })
        ));

        p.steps[0].interval_seconds = None;
        p.interval_seconds = 10_000_000_000_000;
        assert!(matches!(p.validate(), Err(PlanError::InvalidInterval(_))));
    }

    #[test]
    fn test_effective_max_steps_defaults_to_highest_step() {
        let p = plan(vec![PlanStep::new(2, "b"), PlanStep::new(1, "a")]);
        assert_eq!(p.effective_max_steps(), 2);
    }

    #[test]
    fn test_parse_defaults() {
        let json = r#"{"name":"x","steps":[{"step_number":1,"message":"hi"}]}"#;
        let p: CampaignPlan = serde_json::from_str(json).unwrap();
        assert_eq!(p.interval_seconds, DEFAULT_CAMPAIGN_INTERVAL_SECS);
        assert!(p.active);
        assert_eq!(p.steps[0].interval_seconds, None);
    }
}
