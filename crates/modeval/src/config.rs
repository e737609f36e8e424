//! Session configuration.

use serde::{Deserialize, Serialize};

/// Which declared rules take part in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Only rules whose field is present in the data; absent fields are
    /// never required.
    #[default]
    Relaxed,
    /// Every declared rule, so missing required fields fail.
    Strict,
}

/// What a `[field]` placeholder becomes when the field has no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderPolicy {
    /// Substitute a literal token.
    Sentinel(String),
    /// Substitute the empty string.
    Empty,
    /// Fail resolution with [`ValidationError::RuleResolution`](crate::ValidationError::RuleResolution).
    Reject,
}

impl PlaceholderPolicy {
    /// Sentinel understood by `unique` as "no exclusion".
    pub const NULL: &'static str = "NULL";
}

impl Default for PlaceholderPolicy {
    fn default() -> Self {
        Self::Sentinel(Self::NULL.to_string())
    }
}

/// How a failed run is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStyle {
    /// `validate` returns `Ok(false)`; errors are read from the session.
    #[default]
    Boolean,
    /// `validate` returns `Err(ValidationError::Failed(..))`.
    Raise,
}

/// Configuration for a [`ValidationSession`](crate::ValidationSession).
///
/// ```rust
/// use modeval::{FailureStyle, PlaceholderPolicy, SelectionPolicy, ValidatorConfig};
///
/// let config = ValidatorConfig::new()
///     .selection(SelectionPolicy::Strict)
///     .placeholders(PlaceholderPolicy::Empty)
///     .failure_style(FailureStyle::Raise);
///
/// assert_eq!(config.selection, SelectionPolicy::Strict);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Rule selection (default: relaxed)
    pub selection: SelectionPolicy,
    /// Missing placeholder handling (default: `NULL` sentinel)
    pub placeholders: PlaceholderPolicy,
    /// Failure reporting (default: boolean)
    pub failure_style: FailureStyle,
}

impl ValidatorConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the selection policy.
    pub fn selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Set the placeholder policy.
    pub fn placeholders(mut self, policy: PlaceholderPolicy) -> Self {
        self.placeholders = policy;
        self
    }

    /// Set the failure style.
    pub fn failure_style(mut self, style: FailureStyle) -> Self {
        self.failure_style = style;
        self
    }

    /// Load a config from JSON. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
