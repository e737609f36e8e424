//! Rule engine contract.
//!
//! A session compiles its declarations into [`ResolvedRules`] and hands them,
//! with the data and custom messages, to an engine built by an injected
//! [`RuleEngineFactory`]. Engines evaluate rules through their own catalog
//! but must consult every registered [`RuleInterceptor`] first, which is how
//! dynamic rules join the same failure path as built-in ones.

use crate::data::DataRecord;
use crate::error::{ErrorBag, RuleError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Message used when a rule fails and neither a custom nor a built-in
/// message applies.
pub const DEFAULT_FAILURE_MESSAGE: &str = "The {field} field failed the {rule} check.";

/// Custom message templates, keyed by `"field.rule"` or `"rule"`.
pub type CustomMessages = IndexMap<String, String>;

/// Errors raised by a rule engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Unknown rule '{rule}' on field '{field}'")]
    UnknownRule { field: String, rule: String },

    #[error("Malformed rule '{0}'")]
    MalformedRule(String),

    #[error("Rule '{rule}' expects at least {expected} parameter(s)")]
    MissingParameters { rule: String, expected: usize },

    #[error("Record store error: {0}")]
    Store(String),
}

/// One parsed `name:param,param` rule segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

impl RuleSpec {
    /// Parse a single segment.
    ///
    /// `regex` and `not_regex` keep their pattern whole, commas included.
    pub fn parse(segment: &str) -> Result<Self, EngineError> {
        let segment = segment.trim();
        let (name, params) = match segment.split_once(':') {
            Some((name, params)) => (name.trim(), Some(params)),
            None => (segment, None),
        };

        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(EngineError::MalformedRule(segment.to_string()));
        }

        let parameters = match params {
            None => Vec::new(),
            Some(pattern) if name == "regex" || name == "not_regex" => vec![pattern.to_string()],
            Some(params) => params.split(',').map(|p| p.trim().to_string()).collect(),
        };

        Ok(Self {
            name: name.to_string(),
            parameters,
        })
    }

    /// Parameter at `index`, or a [`EngineError::MissingParameters`] error.
    pub fn parameter(&self, index: usize) -> Result<&str, EngineError> {
        self.parameters
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| EngineError::MissingParameters {
                rule: self.name.clone(),
                expected: index + 1,
            })
    }
}

/// Split a pipe-delimited rule string into its segments.
///
/// Empty segments are skipped.
pub fn parse_rules(rule: &str) -> Result<Vec<RuleSpec>, EngineError> {
    rule.split('|')
        .filter(|segment| !segment.trim().is_empty())
        .map(RuleSpec::parse)
        .collect()
}

/// Compiled rules for one run: field key to pipe-delimited rule string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedRules {
    rules: IndexMap<String, String>,
}

impl ResolvedRules {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rule for a field, replacing any existing one.
    pub fn insert(&mut self, field: impl Into<String>, rule: impl Into<String>) {
        self.rules.insert(field.into(), rule.into());
    }

    /// Append rule segments to a field, keeping existing ones.
    pub fn add(&mut self, field: impl Into<String>, rule: impl AsRef<str>) {
        let rule = rule.as_ref();
        let entry = self.rules.entry(field.into()).or_default();
        if entry.is_empty() {
            entry.push_str(rule);
        } else if !rule.is_empty() {
            entry.push('|');
            entry.push_str(rule);
        }
    }

    /// Append every rule of `other`.
    pub fn extend(&mut self, other: ResolvedRules) {
        for (field, rule) in other.rules {
            self.add(field, rule);
        }
    }

    /// Rule string for a field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.rules.get(field).map(String::as_str)
    }

    /// Mutable rule string for a field.
    pub fn get_mut(&mut self, field: &str) -> Option<&mut String> {
        self.rules.get_mut(field)
    }

    /// Whether a rule is declared for a field.
    pub fn contains(&self, field: &str) -> bool {
        self.rules.contains_key(field)
    }

    /// Whether the field's rule has a segment named `rule`.
    pub fn has_rule(&self, field: &str, rule: &str) -> bool {
        self.get(field).is_some_and(|r| {
            r.split('|')
                .any(|segment| segment.split(':').next().map(str::trim) == Some(rule))
        })
    }

    /// Remove the rule for a field.
    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.rules.shift_remove(field)
    }

    /// Keep only the fields for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.rules.retain(|field, rule| keep(field, rule));
    }

    /// Parsed segments for a field.
    pub fn specs(&self, field: &str) -> Result<Vec<RuleSpec>, EngineError> {
        self.get(field).map(parse_rules).unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Fields with rules, in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// `(field, rule)` pairs, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Mutable `(field, rule)` pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut String)> {
        self.rules.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields with rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are set.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResolvedRules {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            rules: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Read-only view of the engine handed to interceptors and predicates.
#[derive(Debug, Clone, Copy)]
pub struct EngineContext<'a> {
    pub data: &'a DataRecord,
    pub rules: &'a ResolvedRules,
}

/// Hook evaluated before the engine's built-in catalog.
pub trait RuleInterceptor: Send + Sync {
    /// `Some(passed)` to take over the `(field, rule)` pair, `None` to let
    /// the engine evaluate it.
    fn intercept(
        &self,
        field: &str,
        rule: &RuleSpec,
        value: Option<&Value>,
        ctx: &EngineContext<'_>,
    ) -> Option<bool>;
}

/// A rule engine bound to one run.
pub trait RuleEngine {
    /// Evaluate every rule. Errors are recorded in [`messages`](Self::messages).
    fn passes(&mut self) -> Result<bool, EngineError>;

    /// Inverse of [`passes`](Self::passes).
    fn fails(&mut self) -> Result<bool, EngineError> {
        self.passes().map(|passed| !passed)
    }

    /// Errors of the last evaluation.
    fn messages(&self) -> &ErrorBag;

    /// Append rules, keeping existing segments.
    fn add_rules(&mut self, extra: ResolvedRules);

    /// Rules the engine evaluates.
    fn rules(&self) -> &ResolvedRules;

    /// Data the engine evaluates.
    fn data(&self) -> &DataRecord;

    /// Merge custom message templates; incoming keys win.
    fn set_custom_messages(&mut self, messages: CustomMessages);

    /// Register a hook evaluated before built-in rules.
    fn add_interceptor(&mut self, interceptor: Arc<dyn RuleInterceptor>);
}

/// Builds an engine for one run.
pub trait RuleEngineFactory: Send + Sync {
    fn make(
        &self,
        data: DataRecord,
        rules: ResolvedRules,
        messages: CustomMessages,
    ) -> Box<dyn RuleEngine>;
}

impl<F> RuleEngineFactory for F
where
    F: Fn(DataRecord, ResolvedRules, CustomMessages) -> Box<dyn RuleEngine> + Send + Sync,
{
    fn make(
        &self,
        data: DataRecord,
        rules: ResolvedRules,
        messages: CustomMessages,
    ) -> Box<dyn RuleEngine> {
        self(data, rules, messages)
    }
}

/// Custom template for a failing `(field, rule)`, `"field.rule"` first.
pub fn custom_message<'a>(messages: &'a CustomMessages, field: &str, rule: &str) -> Option<&'a str> {
    messages
        .get(&format!("{field}.{rule}"))
        .or_else(|| messages.get(rule))
        .map(String::as_str)
}

/// Build the error recorded for a failing rule.
///
/// `{field}`, `{rule}` and positional `{0}`, `{1}`, ... are interpolated
/// once into the final message; the values stay available as params.
pub fn failure(field: &str, rule: &RuleSpec, template: &str) -> RuleError {
    let mut error = RuleError::new(rule.name.as_str(), template)
        .param("field", field)
        .param("rule", rule.name.as_str());
    for (index, parameter) in rule.parameters.iter().enumerate() {
        error = error.param(index.to_string(), parameter);
    }
    error.interpolated()
}
