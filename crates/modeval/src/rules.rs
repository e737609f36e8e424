//! Rule declarations, selection and placeholder substitution.
//!
//! Rules are declared as pipe-delimited strings per field, with optional
//! insert/update/delete overlays. A run first [`select`]s the rules that
//! apply, then [`resolve`]s `[field]` placeholders against the current data.
//! The two steps are separate so lifecycle hooks can change the data, or
//! the selected rules, in between.

use crate::config::{PlaceholderPolicy, SelectionPolicy};
use crate::data::DataRecord;
use crate::engine::{CustomMessages, ResolvedRules};
use crate::error::{Result, ValidationError};
use crate::session::Mode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Declared rules: field key to rule string, placeholders unresolved.
pub type RuleDeclaration = ResolvedRules;

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"\[(\w+)\]").unwrap())
}

/// Value appended to a `unique` rule to exclude the current record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueValue {
    /// The record's `id`, read when the rule is resolved.
    Id,
    /// Another field of the record, read when the rule is resolved.
    Field(String),
    /// A fixed value.
    Literal(String),
}

impl UniqueValue {
    fn token(&self) -> String {
        match self {
            Self::Id => "[id]".to_string(),
            Self::Field(field) => format!("[{field}]"),
            Self::Literal(value) => value.clone(),
        }
    }
}

/// Declared rules of a validator.
///
/// ```rust
/// use modeval::RuleSet;
///
/// let rules = RuleSet::new()
///     .rule("email", "required|email")
///     .rule("name", "required|max:50")
///     .on_insert("name", "required|max:50|unique:users,name")
///     .message("email.required", "We need your email address.");
///
/// assert_eq!(rules.rules.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Rules applied in every mode
    pub rules: RuleDeclaration,
    /// Overlay merged in insert mode
    pub insert_rules: RuleDeclaration,
    /// Overlay merged in update mode
    pub update_rules: RuleDeclaration,
    /// Overlay merged in delete mode
    pub delete_rules: RuleDeclaration,
    /// Custom message templates
    pub messages: CustomMessages,
    /// Fields excluded from the next runs
    pub ignored: Vec<String>,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the base rule for a field.
    pub fn rule(mut self, field: impl Into<String>, rule: impl Into<String>) -> Self {
        self.rules.insert(field, rule);
        self
    }

    /// Declare the insert-mode rule for a field.
    pub fn on_insert(mut self, field: impl Into<String>, rule: impl Into<String>) -> Self {
        self.insert_rules.insert(field, rule);
        self
    }

    /// Declare the update-mode rule for a field.
    pub fn on_update(mut self, field: impl Into<String>, rule: impl Into<String>) -> Self {
        self.update_rules.insert(field, rule);
        self
    }

    /// Declare the delete-mode rule for a field.
    pub fn on_delete(mut self, field: impl Into<String>, rule: impl Into<String>) -> Self {
        self.delete_rules.insert(field, rule);
        self
    }

    /// Set a custom message template for `"field.rule"` or `"rule"`.
    pub fn message(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.messages.insert(key.into(), message.into());
        self
    }

    /// Overlay for a mode, if any.
    pub fn overlay(&self, mode: Mode) -> Option<&RuleDeclaration> {
        match mode {
            Mode::None => None,
            Mode::Insert => Some(&self.insert_rules),
            Mode::Update => Some(&self.update_rules),
            Mode::Delete => Some(&self.delete_rules),
        }
    }

    /// Merge base rules; incoming rules replace existing ones.
    pub fn add_rules(&mut self, rules: RuleDeclaration) {
        for (field, rule) in rules.iter() {
            self.rules.insert(field, rule);
        }
    }

    /// Append an exclusion value to the `rule_name` segment of `key`'s rule
    /// in the base rules and every overlay that declares it.
    pub fn set_unique(&mut self, key: &str, value: &UniqueValue, rule_name: &str) -> Result<()> {
        let mut applied = false;
        for rules in [
            &mut self.rules,
            &mut self.insert_rules,
            &mut self.update_rules,
            &mut self.delete_rules,
        ] {
            if rules.has_rule(key, rule_name) {
                set_unique(rules, key, value, rule_name)?;
                applied = true;
            }
        }

        if applied {
            Ok(())
        } else {
            Err(ValidationError::MissingRule {
                field: key.to_string(),
                rule: rule_name.to_string(),
            })
        }
    }
}

/// Append an exclusion value to the `rule_name` segment of `key`'s rule.
///
/// `unique:users,name` becomes `unique:users,name,[id]` for
/// [`UniqueValue::Id`]; the placeholder is resolved with the rest of the
/// rule, so an id set by a lifecycle hook is picked up.
pub fn set_unique(
    rules: &mut ResolvedRules,
    key: &str,
    value: &UniqueValue,
    rule_name: &str,
) -> Result<()> {
    let missing = || ValidationError::MissingRule {
        field: key.to_string(),
        rule: rule_name.to_string(),
    };

    let rule = rules.get_mut(key).ok_or_else(missing)?;
    let mut found = false;
    let segments: Vec<String> = rule
        .split('|')
        .map(|segment| {
            let name = segment.split(':').next().unwrap_or_default().trim();
            if found || name != rule_name {
                return segment.to_string();
            }
            found = true;
            if segment.contains(':') {
                format!("{},{}", segment.trim_end_matches(','), value.token())
            } else {
                format!("{}:{}", segment, value.token())
            }
        })
        .collect();

    if !found {
        return Err(missing());
    }
    *rule = segments.join("|");
    Ok(())
}

/// Pick the rules that apply to a run.
///
/// The mode overlay wins over the declared rule, ignored fields are
/// dropped, and under [`SelectionPolicy::Relaxed`] only fields present in
/// `data` are kept.
pub fn select(
    declared: &RuleDeclaration,
    overlay: Option<&RuleDeclaration>,
    ignore: &[String],
    policy: SelectionPolicy,
    data: &DataRecord,
) -> ResolvedRules {
    let mut rules = declared.clone();
    if let Some(overlay) = overlay {
        for (field, rule) in overlay.iter() {
            rules.insert(field, rule);
        }
    }

    rules.retain(|field, _| !ignore.iter().any(|ignored| ignored == field));

    if policy == SelectionPolicy::Relaxed {
        rules.retain(|field, _| data.contains(field));
    }

    tracing::trace!(
        declared = declared.len(),
        selected = rules.len(),
        ?policy,
        "rules selected"
    );
    rules
}

/// Replace every `[identifier]` in `rule` with the current value of that
/// field.
pub fn substitute(
    field: &str,
    rule: &str,
    data: &DataRecord,
    policy: &PlaceholderPolicy,
) -> Result<String> {
    let mut resolved = String::with_capacity(rule.len());
    let mut last = 0;

    for captures in placeholder_regex().captures_iter(rule) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        resolved.push_str(&rule[last..whole.start()]);

        match data.get(name.as_str()).and_then(stringify) {
            Some(value) => resolved.push_str(&value),
            None => match policy {
                PlaceholderPolicy::Sentinel(sentinel) => resolved.push_str(sentinel),
                PlaceholderPolicy::Empty => {}
                PlaceholderPolicy::Reject => {
                    return Err(ValidationError::RuleResolution {
                        field: field.to_string(),
                        placeholder: name.as_str().to_string(),
                    })
                }
            },
        }
        last = whole.end();
    }

    resolved.push_str(&rule[last..]);
    Ok(resolved)
}

/// [`substitute`] every rule of a set.
pub fn resolve(
    rules: &ResolvedRules,
    data: &DataRecord,
    policy: &PlaceholderPolicy,
) -> Result<ResolvedRules> {
    rules
        .iter()
        .map(|(field, rule)| Ok((field, substitute(field, rule, data, policy)?)))
        .collect()
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
