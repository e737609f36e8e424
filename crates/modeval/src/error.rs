//! Error bag and error types.
//!
//! [`ErrorBag`] is the canonical, user-facing result of a failed run: an
//! ordered map of field key to the messages recorded for that field.
//! [`ValidationError`] covers everything that can go wrong around a run,
//! including the typed [`ValidationFailed`] signal.

use crate::engine::EngineError;
use crate::session::Mode;
use http::StatusCode;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

static PARAM_REGEX: OnceLock<Regex> = OnceLock::new();

fn param_regex() -> &'static Regex {
    PARAM_REGEX.get_or_init(|| Regex::new(r"\{(\w+)\}").unwrap())
}

/// Result type alias for validator operations.
pub type Result<T, E = ValidationError> = std::result::Result<T, E>;

/// A single failure recorded against a field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleError {
    /// The rule that failed (e.g. "required", "email", "unique")
    pub code: String,
    /// Human-readable message, rendered as recorded
    pub message: String,
    /// Rule parameters, available for message formatting
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, serde_json::Value>,
}

impl RuleError {
    /// Create a new rule error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            params: HashMap::new(),
        }
    }

    /// Add a parameter to the error.
    pub fn param(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.params.insert(key.into(), v);
        }
        self
    }

    /// Replace `{param}` placeholders in the message with parameter values.
    ///
    /// The message is scanned once, so parameter values are never
    /// interpolated themselves. Unknown placeholders are left as they are.
    pub fn interpolate_message(&self) -> String {
        param_regex()
            .replace_all(&self.message, |caps: &regex::Captures<'_>| {
                match self.params.get(&caps[1]) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Bake the parameters into the message.
    pub fn interpolated(mut self) -> Self {
        self.message = self.interpolate_message();
        self
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Ordered per-field collection of validation failures.
///
/// Keys keep the order in which they were first recorded and messages keep
/// their insertion order within a field. Merging never de-duplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorBag {
    #[serde(flatten)]
    fields: IndexMap<String, Vec<RuleError>>,
}

impl ErrorBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error for a field.
    pub fn add(&mut self, field: impl Into<String>, error: RuleError) {
        self.fields.entry(field.into()).or_default().push(error);
    }

    /// Record a bare message for a field.
    pub fn add_message(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.add(field, RuleError::new("custom", message));
    }

    /// Append every error of `other`, key by key, after the existing ones.
    pub fn merge(&mut self, other: ErrorBag) {
        for (field, errors) in other.fields {
            self.fields.entry(field).or_default().extend(errors);
        }
    }

    /// Errors recorded for a field.
    pub fn get(&self, field: &str) -> Option<&[RuleError]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    /// Messages recorded for a field, in order.
    pub fn messages(&self, field: &str) -> Vec<String> {
        self.fields
            .get(field)
            .map(|errors| errors.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    /// First message recorded for a field.
    pub fn first(&self, field: &str) -> Option<String> {
        self.fields
            .get(field)
            .and_then(|errors| errors.first())
            .map(|e| e.message.clone())
    }

    /// Whether any error is recorded for a field.
    pub fn has(&self, field: &str) -> bool {
        self.fields.get(field).is_some_and(|e| !e.is_empty())
    }

    /// Field keys with errors, in first-recorded order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Every message, in key order then insertion order.
    pub fn all(&self) -> Vec<String> {
        self.fields
            .values()
            .flatten()
            .map(|e| e.message.clone())
            .collect()
    }

    /// All messages joined with a single space.
    pub fn flatten(&self) -> String {
        self.all().join(" ")
    }

    /// All messages joined with `". "`, as a single sentence list.
    pub fn summary(&self) -> String {
        self.all().join(". ")
    }

    /// All messages as an HTML list.
    ///
    /// ```rust
    /// use modeval::ErrorBag;
    ///
    /// let mut bag = ErrorBag::new();
    /// bag.add_message("name", "The name field is required.");
    ///
    /// assert_eq!(
    ///     bag.to_html(),
    ///     "<ul class='validation-msgs'><li>The name field is required.</li></ul>"
    /// );
    /// ```
    pub fn to_html(&self) -> String {
        let items: Vec<String> = self.all().iter().map(|m| escape_html(m)).collect();
        format!(
            "<ul class='validation-msgs'><li>{}</li></ul>",
            items.join("</li><li>")
        )
    }

    /// Move every key under `namespace`.
    ///
    /// `email` becomes `profile.email`, and each mention of `email` inside
    /// its messages becomes `profile email` (or `email profile` when
    /// `append` is set).
    pub fn remap(&self, namespace: &str, append: bool) -> ErrorBag {
        let mut remapped = ErrorBag::new();
        for (key, errors) in &self.fields {
            let replacement = if append {
                format!("{key} {namespace}")
            } else {
                format!("{namespace} {key}")
            };
            let new_key = format!("{namespace}.{key}");
            for error in errors {
                let mut error = error.clone();
                error.message = error.message.replace(key.as_str(), &replacement);
                remapped.add(new_key.clone(), error);
            }
        }
        remapped
    }

    /// Total number of recorded errors.
    pub fn len(&self) -> usize {
        self.fields.values().map(Vec::len).sum()
    }

    /// Whether the bag holds no errors.
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(Vec::is_empty)
    }

    /// `Ok` if empty, the bag itself otherwise.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Convert to the JSON error body used by API layers.
    pub fn to_api_error(&self) -> ApiValidationError {
        let fields = self
            .fields
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| FieldErrorResponse {
                    field: field.clone(),
                    code: e.code.clone(),
                    message: e.message.clone(),
                })
            })
            .collect();

        ApiValidationError {
            error: ErrorBody {
                error_type: "validation_error".to_string(),
                message: "Validation failed".to_string(),
                fields,
            },
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

impl fmt::Display for ErrorBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed: {} error(s)", self.len())
    }
}

/// JSON error body for validation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiValidationError {
    pub error: ErrorBody,
}

/// Error body in [`ApiValidationError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub fields: Vec<FieldErrorResponse>,
}

/// Single field entry in [`ErrorBody`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldErrorResponse {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// Typed validation failure, one variant per mode.
#[derive(Debug, Clone, Error)]
pub enum ValidationFailed {
    #[error("insert {0}")]
    Insert(ErrorBag),
    #[error("update {0}")]
    Update(ErrorBag),
    #[error("delete {0}")]
    Delete(ErrorBag),
    #[error("{0}")]
    Generic(ErrorBag),
}

impl ValidationFailed {
    /// Build the variant matching `mode`.
    pub fn new(mode: Mode, bag: ErrorBag) -> Self {
        match mode {
            Mode::Insert => Self::Insert(bag),
            Mode::Update => Self::Update(bag),
            Mode::Delete => Self::Delete(bag),
            Mode::None => Self::Generic(bag),
        }
    }

    /// The mode the failed run was in.
    pub fn mode(&self) -> Mode {
        match self {
            Self::Insert(_) => Mode::Insert,
            Self::Update(_) => Mode::Update,
            Self::Delete(_) => Mode::Delete,
            Self::Generic(_) => Mode::None,
        }
    }

    /// The errors of the failed run.
    pub fn bag(&self) -> &ErrorBag {
        match self {
            Self::Insert(bag) | Self::Update(bag) | Self::Delete(bag) | Self::Generic(bag) => bag,
        }
    }

    /// Take the errors out of the failure.
    pub fn into_bag(self) -> ErrorBag {
        match self {
            Self::Insert(bag) | Self::Update(bag) | Self::Delete(bag) | Self::Generic(bag) => bag,
        }
    }

    /// Messages of the failure joined with `". "`.
    pub fn message(&self) -> String {
        self.bag().summary()
    }

    /// Messages of the failure as an HTML list.
    pub fn to_html(&self) -> String {
        self.bag().to_html()
    }

    /// Status code for surfacing the failure over HTTP.
    pub fn status(&self) -> StatusCode {
        StatusCode::FORBIDDEN
    }
}

/// Everything that can go wrong around a validation run.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unsupported data shape: {0}")]
    UnsupportedDataShape(String),

    #[error("Placeholder [{placeholder}] in rule for '{field}' has no value")]
    RuleResolution { field: String, placeholder: String },

    #[error("No '{rule}' rule declared for '{field}'")]
    MissingRule { field: String, rule: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Failed(#[from] ValidationFailed),
}

impl ValidationError {
    /// The error bag, if this is a validation failure.
    pub fn bag(&self) -> Option<&ErrorBag> {
        match self {
            Self::Failed(failed) => Some(failed.bag()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(entries: &[(&str, &str)]) -> ErrorBag {
        let mut bag = ErrorBag::new();
        for (field, message) in entries {
            bag.add_message(*field, *message);
        }
        bag
    }

    #[test]
    fn rule_error_with_params() {
        let error = RuleError::new("between", "Must be between {min} and {max}")
            .param("min", 3)
            .param("max", 50);

        assert_eq!(error.interpolate_message(), "Must be between 3 and 50");
    }

    #[test]
    fn interpolation_is_single_pass() {
        let error = RuleError::new("in", "Pick one of {0} or {1}, not {2}.")
            .param("0", "{1}")
            .param("1", "b");

        assert_eq!(error.interpolate_message(), "Pick one of {1} or b, not {2}.");
    }

    #[test]
    fn recorded_messages_are_not_reinterpolated() {
        let mut errors = ErrorBag::new();
        errors.add(
            "f",
            RuleError::new("in", "Pick one of {0} or {1}.")
                .param("0", "{1}")
                .param("1", "b")
                .interpolated(),
        );

        assert_eq!(errors.messages("f"), vec!["Pick one of {1} or b."]);
        assert_eq!(errors.first("f").as_deref(), Some("Pick one of {1} or b."));
        assert_eq!(errors.all(), vec!["Pick one of {1} or b."]);
        let json = serde_json::to_value(errors.to_api_error()).unwrap();
        assert_eq!(json["error"]["fields"][0]["message"], "Pick one of {1} or b.");
    }

    #[test]
    fn merge_appends_per_key() {
        let mut errors = bag(&[("a", "x")]);
        errors.merge(bag(&[("a", "y")]));

        assert_eq!(errors.messages("a"), vec!["x", "y"]);
    }

    #[test]
    fn merge_keeps_duplicates() {
        let mut errors = bag(&[("a", "x")]);
        errors.merge(bag(&[("a", "x"), ("b", "z")]));

        assert_eq!(errors.messages("a"), vec!["x", "x"]);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn remap_prefixes_keys_and_messages() {
        let errors = bag(&[("email", "The email field is required.")]);
        let remapped = errors.remap("profile", false);

        assert!(!remapped.has("email"));
        assert_eq!(
            remapped.messages("profile.email"),
            vec!["The profile email field is required."]
        );
    }

    #[test]
    fn remap_append_mode() {
        let errors = bag(&[("email", "The email field is required.")]);
        let remapped = errors.remap("profile", true);

        assert_eq!(
            remapped.first("profile.email").as_deref(),
            Some("The email profile field is required.")
        );
    }

    #[test]
    fn flatten_joins_in_key_order() {
        let errors = bag(&[("b", "second."), ("a", "third."), ("b", "more.")]);
        assert_eq!(errors.flatten(), "second. more. third.");
    }

    #[test]
    fn summary_and_html() {
        let errors = bag(&[("name", "Name is required"), ("age", "Age must be <18")]);

        assert_eq!(errors.summary(), "Name is required. Age must be <18");
        assert_eq!(
            errors.to_html(),
            "<ul class='validation-msgs'><li>Name is required</li><li>Age must be &lt;18</li></ul>"
        );

        let failed = ValidationFailed::new(Mode::Delete, errors);
        assert_eq!(failed.message(), "Name is required. Age must be <18");
        assert!(failed.to_html().starts_with("<ul class='validation-msgs'>"));
    }

    #[test]
    fn into_result() {
        assert!(ErrorBag::new().into_result().is_ok());
        assert!(bag(&[("a", "x")]).into_result().is_err());
    }

    #[test]
    fn api_error_body() {
        let errors = bag(&[("email", "Invalid email")]);
        let json = serde_json::to_value(errors.to_api_error()).unwrap();

        assert_eq!(json["error"]["type"], "validation_error");
        assert_eq!(json["error"]["fields"][0]["field"], "email");
    }

    #[test]
    fn failure_variant_follows_mode() {
        let failed = ValidationFailed::new(Mode::Update, bag(&[("a", "x")]));

        assert!(matches!(failed, ValidationFailed::Update(_)));
        assert_eq!(failed.mode(), Mode::Update);
        assert_eq!(failed.bag().len(), 1);
        assert_eq!(failed.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn display() {
        let errors = bag(&[("a", "x"), ("b", "y")]);
        assert_eq!(errors.to_string(), "Validation failed: 2 error(s)");
        let failed = ValidationFailed::new(Mode::Insert, errors);
        assert_eq!(failed.to_string(), "insert Validation failed: 2 error(s)");
    }
}
