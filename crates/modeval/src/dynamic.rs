//! Predicate-backed rules.
//!
//! A dynamic rule is a closure attached to a `(field, rule)` pair. The
//! registry is installed on the engine as a [`RuleInterceptor`], so a
//! dynamic rule fails through the same path as a built-in one.

use crate::engine::{CustomMessages, EngineContext, ResolvedRules, RuleInterceptor, RuleSpec};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Predicate signature: `(field, value, parameters, context) -> passed`.
pub type Predicate =
    dyn Fn(&str, Option<&Value>, &[String], &EngineContext<'_>) -> bool + Send + Sync;

/// A registered dynamic rule.
#[derive(Clone)]
pub struct DynamicRule {
    pub field: String,
    pub rule: String,
    pub message: Option<String>,
    predicate: Arc<Predicate>,
}

impl DynamicRule {
    /// Run the predicate.
    pub fn evaluate(
        &self,
        value: Option<&Value>,
        parameters: &[String],
        ctx: &EngineContext<'_>,
    ) -> bool {
        (self.predicate)(&self.field, value, parameters, ctx)
    }
}

impl fmt::Debug for DynamicRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicRule")
            .field("field", &self.field)
            .field("rule", &self.rule)
            .field("message", &self.message)
            .finish()
    }
}

/// Dynamic rules of a session, keyed by `(field, rule)`.
///
/// ```rust
/// use modeval::DynamicRuleRegistry;
///
/// let mut registry = DynamicRuleRegistry::new();
/// registry.register(
///     "age",
///     "adult",
///     |_, value, _, _| value.and_then(|v| v.as_u64()).is_some_and(|age| age >= 18),
///     Some("You must be an adult.".to_string()),
/// );
///
/// assert!(registry.contains("age", "adult"));
/// ```
#[derive(Clone, Default, Debug)]
pub struct DynamicRuleRegistry {
    rules: IndexMap<(String, String), DynamicRule>,
}

impl DynamicRuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate for `(field, rule)`, replacing any previous one.
    pub fn register<F>(
        &mut self,
        field: impl Into<String>,
        rule: impl Into<String>,
        predicate: F,
        message: Option<String>,
    ) where
        F: Fn(&str, Option<&Value>, &[String], &EngineContext<'_>) -> bool + Send + Sync + 'static,
    {
        let field = field.into();
        let rule = rule.into();
        tracing::debug!(field = %field, rule = %rule, "dynamic rule registered");
        self.rules.insert(
            (field.clone(), rule.clone()),
            DynamicRule {
                field,
                rule,
                message,
                predicate: Arc::new(predicate),
            },
        );
    }

    /// Whether `(field, rule)` is registered.
    pub fn contains(&self, field: &str, rule: &str) -> bool {
        self.get(field, rule).is_some()
    }

    /// Registered rule for `(field, rule)`.
    pub fn get(&self, field: &str, rule: &str) -> Option<&DynamicRule> {
        self.rules.get(&(field.to_string(), rule.to_string()))
    }

    /// Evaluate `(field, rule)`; `None` when not registered.
    pub fn evaluate(
        &self,
        field: &str,
        rule: &str,
        value: Option<&Value>,
        parameters: &[String],
        ctx: &EngineContext<'_>,
    ) -> Option<bool> {
        self.get(field, rule)
            .map(|dynamic| dynamic.evaluate(value, parameters, ctx))
    }

    /// Rules to append to a run so every registered pair is evaluated.
    ///
    /// Pairs whose rule is already part of `existing` for that field are
    /// skipped, so each pair is evaluated once.
    pub fn rules(&self, existing: &ResolvedRules) -> ResolvedRules {
        let mut extra = ResolvedRules::new();
        for dynamic in self.rules.values() {
            if !existing.has_rule(&dynamic.field, &dynamic.rule) {
                extra.add(dynamic.field.as_str(), dynamic.rule.as_str());
            }
        }
        extra
    }

    /// Custom messages of the registered rules, keyed `"field.rule"`.
    pub fn custom_messages(&self) -> CustomMessages {
        self.rules
            .values()
            .filter_map(|dynamic| {
                dynamic
                    .message
                    .as_ref()
                    .map(|m| (format!("{}.{}", dynamic.field, dynamic.rule), m.clone()))
            })
            .collect()
    }

    /// Registered rules, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &DynamicRule> {
        self.rules.values()
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleInterceptor for DynamicRuleRegistry {
    fn intercept(
        &self,
        field: &str,
        rule: &RuleSpec,
        value: Option<&Value>,
        ctx: &EngineContext<'_>,
    ) -> Option<bool> {
        let passed = self.evaluate(field, &rule.name, value, &rule.parameters, ctx)?;
        if !passed {
            tracing::debug!(field, rule = %rule.name, "dynamic rule failed");
        }
        Some(passed)
    }
}
