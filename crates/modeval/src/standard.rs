//! Reference rule engine.
//!
//! A small catalog of string rules (`required|email|max:255`) so sessions
//! work without an external engine. Applications with their own catalog
//! plug in through [`RuleEngineFactory`] instead.
//!
//! Rules other than `required` and `present` are skipped when the value is
//! absent or an empty string. `nullable` also skips them for `null`,
//! `sometimes` skips the whole field when it is absent and `bail` stops at
//! the first failure of a field.

use crate::config::PlaceholderPolicy;
use crate::data::DataRecord;
use crate::engine::{
    custom_message, failure, parse_rules, CustomMessages, EngineContext, EngineError,
    ResolvedRules, RuleEngine, RuleEngineFactory, RuleInterceptor, RuleSpec,
    DEFAULT_FAILURE_MESSAGE,
};
use crate::error::ErrorBag;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use validator::{ValidateEmail, ValidateUrl};

const IMPLICIT_RULES: &[&str] = &["required", "present"];
const MODIFIERS: &[&str] = &["nullable", "sometimes", "bail"];

/// Lookups behind the `unique` and `exists` rules.
pub trait RecordStore: Send + Sync {
    /// Whether no row of `table` has `value` in `column`, ignoring the row
    /// whose `except.0` column equals `except.1`.
    fn is_unique(
        &self,
        table: &str,
        column: &str,
        value: &str,
        except: Option<(&str, &str)>,
    ) -> Result<bool, String>;

    /// Whether a row of `table` has `value` in `column`.
    fn exists(&self, table: &str, column: &str, value: &str) -> Result<bool, String>;
}

/// Builds [`StandardEngine`]s.
#[derive(Clone, Default)]
pub struct StandardEngineFactory {
    store: Option<Arc<dyn RecordStore>>,
}

impl StandardEngineFactory {
    /// Create a factory without a record store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `store` for `unique` and `exists`.
    pub fn with_store(mut self, store: impl RecordStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Use a shared store for `unique` and `exists`.
    pub fn with_store_arc(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }
}

impl fmt::Debug for StandardEngineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardEngineFactory")
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl RuleEngineFactory for StandardEngineFactory {
    fn make(
        &self,
        data: DataRecord,
        rules: ResolvedRules,
        messages: CustomMessages,
    ) -> Box<dyn RuleEngine> {
        let mut engine = StandardEngine::new(data, rules, messages);
        engine.store = self.store.clone();
        Box::new(engine)
    }
}

/// How `min`, `max` and `between` measure a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeKind {
    Numeric,
    Characters,
    Items,
}

/// Engine evaluating the built-in catalog.
pub struct StandardEngine {
    data: DataRecord,
    rules: ResolvedRules,
    messages: CustomMessages,
    store: Option<Arc<dyn RecordStore>>,
    interceptors: Vec<Arc<dyn RuleInterceptor>>,
    errors: ErrorBag,
}

impl StandardEngine {
    /// Create an engine without a record store.
    pub fn new(data: DataRecord, rules: ResolvedRules, messages: CustomMessages) -> Self {
        Self {
            data,
            rules,
            messages,
            store: None,
            interceptors: Vec::new(),
            errors: ErrorBag::new(),
        }
    }

    fn validate_field(
        &self,
        field: &str,
        rule: &str,
        errors: &mut ErrorBag,
    ) -> Result<(), EngineError> {
        let specs = parse_rules(rule)?;
        let has = |name: &str| specs.iter().any(|spec| spec.name == name);
        let value = self.data.get(field);

        if has("sometimes") && value.is_none() {
            return Ok(());
        }
        let nullable = has("nullable");
        let bail = has("bail");
        let numeric = has("numeric") || has("integer");
        let ctx = EngineContext {
            data: &self.data,
            rules: &self.rules,
        };

        for spec in specs
            .iter()
            .filter(|spec| !MODIFIERS.contains(&spec.name.as_str()))
        {
            let intercepted = self
                .interceptors
                .iter()
                .find_map(|interceptor| interceptor.intercept(field, spec, value, &ctx));

            let passed = match intercepted {
                Some(passed) => passed,
                None if !is_validatable(spec, value, nullable) => continue,
                None => self.evaluate(field, spec, value, numeric)?,
            };
            if passed {
                continue;
            }

            let template = match custom_message(&self.messages, field, &spec.name) {
                Some(template) => template,
                None if intercepted.is_some() => DEFAULT_FAILURE_MESSAGE,
                None => default_message(&spec.name, size_kind(value, numeric)),
            };
            tracing::trace!(field, rule = %spec.name, "rule failed");
            errors.add(field, failure(field, spec, template));

            if bail {
                break;
            }
        }
        Ok(())
    }

    fn evaluate(
        &self,
        field: &str,
        spec: &RuleSpec,
        value: Option<&Value>,
        numeric: bool,
    ) -> Result<bool, EngineError> {
        let v = value.unwrap_or(&Value::Null);
        let passed = match spec.name.as_str() {
            "required" => is_filled(value),
            "present" => value.is_some(),
            "email" => v.as_str().is_some_and(|s| s.to_string().validate_email()),
            "url" => v.as_str().is_some_and(|s| s.to_string().validate_url()),
            "regex" => {
                let regex = compile_pattern(spec.parameter(0)?)?;
                scalar_text(v).is_some_and(|s| regex.is_match(&s))
            }
            "not_regex" => {
                let regex = compile_pattern(spec.parameter(0)?)?;
                scalar_text(v).is_some_and(|s| !regex.is_match(&s))
            }
            "numeric" => as_number(v).is_some(),
            "integer" => is_integer(v),
            "string" => v.is_string(),
            "boolean" => is_boolean(v),
            "array" => v.is_array() || v.is_object(),
            "min" => size(v, numeric) >= number_parameter(spec, 0)?,
            "max" => size(v, numeric) <= number_parameter(spec, 0)?,
            "between" => {
                let size = size(v, numeric);
                size >= number_parameter(spec, 0)? && size <= number_parameter(spec, 1)?
            }
            "in" => scalar_text(v).is_some_and(|s| spec.parameters.contains(&s)),
            "not_in" => !scalar_text(v).is_some_and(|s| spec.parameters.contains(&s)),
            "same" => value == self.data.get(spec.parameter(0)?),
            "different" => value != self.data.get(spec.parameter(0)?),
            "confirmed" => value == self.data.get(&format!("{field}_confirmation")),
            "unique" => self.check_unique(field, spec, v)?,
            "exists" => self.check_exists(field, spec, v)?,
            other => {
                return Err(EngineError::UnknownRule {
                    field: field.to_string(),
                    rule: other.to_string(),
                })
            }
        };
        Ok(passed)
    }

    fn store(&self) -> Result<&Arc<dyn RecordStore>, EngineError> {
        self.store
            .as_ref()
            .ok_or_else(|| EngineError::Store("no record store configured".to_string()))
    }

    // unique:table[,column[,except[,id_column]]]
    fn check_unique(&self, field: &str, spec: &RuleSpec, value: &Value) -> Result<bool, EngineError> {
        let store = self.store()?;
        let table = spec.parameter(0)?;
        let column = optional_parameter(spec, 1).unwrap_or(field);
        let except = optional_parameter(spec, 2).filter(|id| *id != PlaceholderPolicy::NULL);
        let id_column = optional_parameter(spec, 3).unwrap_or("id");
        let text = scalar_text(value).unwrap_or_default();

        store
            .is_unique(table, column, &text, except.map(|id| (id_column, id)))
            .map_err(EngineError::Store)
    }

    // exists:table[,column]
    fn check_exists(&self, field: &str, spec: &RuleSpec, value: &Value) -> Result<bool, EngineError> {
        let store = self.store()?;
        let table = spec.parameter(0)?;
        let column = optional_parameter(spec, 1).unwrap_or(field);
        let text = scalar_text(value).unwrap_or_default();

        store.exists(table, column, &text).map_err(EngineError::Store)
    }
}

impl fmt::Debug for StandardEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardEngine")
            .field("rules", &self.rules)
            .field("interceptors", &self.interceptors.len())
            .field("errors", &self.errors)
            .finish()
    }
}

impl RuleEngine for StandardEngine {
    fn passes(&mut self) -> Result<bool, EngineError> {
        let mut errors = ErrorBag::new();
        for (field, rule) in self.rules.iter() {
            self.validate_field(field, rule, &mut errors)?;
        }

        let passed = errors.is_empty();
        self.errors = errors;
        Ok(passed)
    }

    fn messages(&self) -> &ErrorBag {
        &self.errors
    }

    fn add_rules(&mut self, extra: ResolvedRules) {
        self.rules.extend(extra);
    }

    fn rules(&self) -> &ResolvedRules {
        &self.rules
    }

    fn data(&self) -> &DataRecord {
        &self.data
    }

    fn set_custom_messages(&mut self, messages: CustomMessages) {
        self.messages.extend(messages);
    }

    fn add_interceptor(&mut self, interceptor: Arc<dyn RuleInterceptor>) {
        self.interceptors.push(interceptor);
    }
}

fn is_validatable(spec: &RuleSpec, value: Option<&Value>, nullable: bool) -> bool {
    if IMPLICIT_RULES.contains(&spec.name.as_str()) {
        return true;
    }
    match value {
        None => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) => !nullable,
        Some(_) => true,
    }
}

fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::String(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    }
}

fn is_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::Number(n) => matches!(n.as_i64(), Some(0 | 1)),
        Value::String(s) => matches!(s.as_str(), "0" | "1" | "true" | "false"),
        _ => false,
    }
}

fn size_kind(value: Option<&Value>, numeric: bool) -> SizeKind {
    match value {
        Some(Value::Number(_)) => SizeKind::Numeric,
        Some(v @ Value::String(_)) if numeric && as_number(v).is_some() => SizeKind::Numeric,
        Some(Value::Array(_) | Value::Object(_)) => SizeKind::Items,
        _ => SizeKind::Characters,
    }
}

fn size(value: &Value, numeric: bool) -> f64 {
    match (size_kind(Some(value), numeric), value) {
        (SizeKind::Numeric, v) => as_number(v).unwrap_or_default(),
        (SizeKind::Items, Value::Array(items)) => items.len() as f64,
        (SizeKind::Items, Value::Object(map)) => map.len() as f64,
        (_, Value::String(s)) => s.chars().count() as f64,
        (_, Value::Null) => 0.0,
        (_, other) => other.to_string().chars().count() as f64,
    }
}

fn number_parameter(spec: &RuleSpec, index: usize) -> Result<f64, EngineError> {
    let parameter = spec.parameter(index)?;
    parameter
        .parse::<f64>()
        .map_err(|_| EngineError::MalformedRule(format!("{}:{}", spec.name, parameter)))
}

fn optional_parameter(spec: &RuleSpec, index: usize) -> Option<&str> {
    spec.parameters
        .get(index)
        .map(String::as_str)
        .filter(|p| !p.is_empty())
}

/// Compile a `regex:` pattern, accepting `/pattern/flags` delimiters.
fn compile_pattern(pattern: &str) -> Result<Regex, EngineError> {
    let source = match (pattern.strip_prefix('/'), pattern.rfind('/')) {
        (Some(_), Some(end)) if end > 0 => {
            let body = &pattern[1..end];
            let flags: String = pattern[end + 1..]
                .chars()
                .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
                .collect();
            if flags.is_empty() {
                body.to_string()
            } else {
                format!("(?{flags}){body}")
            }
        }
        _ => pattern.to_string(),
    };

    Regex::new(&source).map_err(|_| EngineError::MalformedRule(format!("regex:{pattern}")))
}

fn default_message(rule: &str, kind: SizeKind) -> &'static str {
    match (rule, kind) {
        ("required", _) => "The {field} field is required.",
        ("present", _) => "The {field} field must be present.",
        ("email", _) => "The {field} must be a valid email address.",
        ("url" | "regex" | "not_regex", _) => "The {field} format is invalid.",
        ("numeric", _) => "The {field} must be a number.",
        ("integer", _) => "The {field} must be an integer.",
        ("string", _) => "The {field} must be a string.",
        ("boolean", _) => "The {field} field must be true or false.",
        ("array", _) => "The {field} must be an array.",
        ("min", SizeKind::Numeric) => "The {field} must be at least {0}.",
        ("min", SizeKind::Characters) => "The {field} must be at least {0} characters.",
        ("min", SizeKind::Items) => "The {field} must have at least {0} items.",
        ("max", SizeKind::Numeric) => "The {field} may not be greater than {0}.",
        ("max", SizeKind::Characters) => "The {field} may not be greater than {0} characters.",
        ("max", SizeKind::Items) => "The {field} may not have more than {0} items.",
        ("between", SizeKind::Numeric) => "The {field} must be between {0} and {1}.",
        ("between", SizeKind::Characters) => "The {field} must be between {0} and {1} characters.",
        ("between", SizeKind::Items) => "The {field} must have between {0} and {1} items.",
        ("in" | "not_in" | "exists", _) => "The selected {field} is invalid.",
        ("same", _) => "The {field} and {0} must match.",
        ("different", _) => "The {field} and {0} must be different.",
        ("confirmed", _) => "The {field} confirmation does not match.",
        ("unique", _) => "The {field} has already been taken.",
        _ => DEFAULT_FAILURE_MESSAGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    struct Users(HashSet<(String, String)>);

    impl RecordStore for Users {
        fn is_unique(
            &self,
            _table: &str,
            column: &str,
            value: &str,
            except: Option<(&str, &str)>,
        ) -> Result<bool, String> {
            // rows are (id, name); only the name column is indexed
            if column != "name" {
                return Err(format!("unknown column {column}"));
            }
            Ok(!self
                .0
                .iter()
                .any(|(id, name)| name == value && except.map_or(true, |(_, ex)| ex != id.as_str())))
        }

        fn exists(&self, _table: &str, _column: &str, value: &str) -> Result<bool, String> {
            Ok(self.0.iter().any(|(id, _)| id == value))
        }
    }

    fn users() -> Users {
        Users(HashSet::from([("7".to_string(), "Bob".to_string())]))
    }

    fn engine(data: Value, rules: &[(&str, &str)]) -> StandardEngine {
        let Value::Object(map) = data else {
            panic!("test data must be an object");
        };
        let mut engine = StandardEngine::new(
            DataRecord::from(map),
            rules.iter().copied().collect(),
            CustomMessages::new(),
        );
        engine.store = Some(Arc::new(users()));
        engine
    }

    fn run(data: Value, rules: &[(&str, &str)]) -> ErrorBag {
        let mut engine = engine(data, rules);
        engine.passes().unwrap();
        engine.messages().clone()
    }

    #[test]
    fn required_and_email() {
        let errors = run(json!({"email": ""}), &[("email", "required|email")]);
        assert_eq!(errors.messages("email"), vec!["The email field is required."]);

        let errors = run(json!({"email": "nope"}), &[("email", "required|email")]);
        assert_eq!(
            errors.messages("email"),
            vec!["The email must be a valid email address."]
        );

        let errors = run(json!({"email": "a@example.com"}), &[("email", "required|email")]);
        assert!(errors.is_empty());
    }

    #[test]
    fn optional_rules_skip_missing_values() {
        let errors = run(json!({}), &[("email", "email|max:3")]);
        assert!(errors.is_empty());

        let errors = run(json!({}), &[("email", "required|email")]);
        assert_eq!(errors.messages("email").len(), 1);
    }

    #[test]
    fn nullable_and_sometimes() {
        assert!(run(json!({"age": null}), &[("age", "nullable|integer")]).is_empty());
        assert!(!run(json!({"age": null}), &[("age", "integer")]).is_empty());
        assert!(run(json!({}), &[("age", "sometimes|required")]).is_empty());
        assert!(!run(json!({"age": ""}), &[("age", "sometimes|required")]).is_empty());
    }

    #[test]
    fn bail_stops_at_first_failure() {
        let errors = run(json!({"code": "x"}), &[("code", "bail|integer|min:5")]);
        assert_eq!(errors.messages("code").len(), 1);

        let errors = run(json!({"code": "x"}), &[("code", "integer|min:5")]);
        assert_eq!(errors.messages("code").len(), 2);
    }

    #[test]
    fn sizes_follow_value_kind() {
        assert!(run(json!({"age": 18}), &[("age", "min:18")]).is_empty());
        assert!(!run(json!({"age": "9"}), &[("age", "numeric|min:18")]).is_empty());
        assert!(run(json!({"name": "Bob"}), &[("name", "between:2,3")]).is_empty());
        assert!(!run(json!({"tags": [1, 2, 3]}), &[("tags", "max:2")]).is_empty());

        let errors = run(json!({"name": "Bo"}), &[("name", "min:3")]);
        assert_eq!(
            errors.first("name").as_deref(),
            Some("The name must be at least 3 characters.")
        );
    }

    #[test]
    fn membership_and_comparison() {
        assert!(run(json!({"role": "admin"}), &[("role", "in:admin,editor")]).is_empty());
        assert!(!run(json!({"role": "root"}), &[("role", "in:admin,editor")]).is_empty());
        assert!(!run(json!({"role": "root"}), &[("role", "not_in:root")]).is_empty());
        assert!(run(
            json!({"password": "x", "password_confirmation": "x"}),
            &[("password", "confirmed")]
        )
        .is_empty());
        assert!(!run(json!({"a": 1, "b": 2}), &[("a", "same:b")]).is_empty());
        assert!(run(json!({"a": 1, "b": 2}), &[("a", "different:b")]).is_empty());
    }

    #[test]
    fn regex_with_delimiters() {
        assert!(run(json!({"zip": "1234"}), &[("zip", r"regex:/^\d{4,5}$/")]).is_empty());
        assert!(!run(json!({"zip": "12"}), &[("zip", r"regex:/^\d{4,5}$/")]).is_empty());
        assert!(run(json!({"code": "ABC"}), &[("code", "regex:/^[a-z]+$/i")]).is_empty());
    }

    #[test]
    fn unique_honours_exclusion() {
        assert!(!run(json!({"name": "Bob"}), &[("name", "unique:users,name")]).is_empty());
        assert!(run(json!({"name": "Bob"}), &[("name", "unique:users,name,7")]).is_empty());
        assert!(!run(json!({"name": "Bob"}), &[("name", "unique:users,name,NULL")]).is_empty());
        assert!(run(json!({"name": "Ann"}), &[("name", "unique:users")]).is_empty());
    }

    #[test]
    fn exists_uses_store() {
        assert!(run(json!({"user_id": 7}), &[("user_id", "exists:users,id")]).is_empty());
        assert!(!run(json!({"user_id": 8}), &[("user_id", "exists:users,id")]).is_empty());
    }

    #[test]
    fn engine_errors_propagate() {
        let mut unknown = engine(json!({"a": 1}), &[("a", "frobnicate")]);
        assert_eq!(
            unknown.passes(),
            Err(EngineError::UnknownRule {
                field: "a".into(),
                rule: "frobnicate".into()
            })
        );

        let mut malformed = engine(json!({"a": 1}), &[("a", "min:abc")]);
        assert!(matches!(malformed.passes(), Err(EngineError::MalformedRule(_))));

        let mut store_error = engine(json!({"email": "x"}), &[("email", "unique:users")]);
        assert!(matches!(store_error.passes(), Err(EngineError::Store(_))));
    }

    #[test]
    fn custom_messages_override_defaults() {
        let mut engine = engine(json!({"name": ""}), &[("name", "required")]);
        let mut messages = CustomMessages::new();
        messages.insert("name.required".into(), "Tell us who {field} is.".into());
        engine.set_custom_messages(messages);

        assert!(!engine.passes().unwrap());
        assert_eq!(
            engine.messages().first("name").as_deref(),
            Some("Tell us who name is.")
        );
    }

    struct RejectAll;

    impl RuleInterceptor for RejectAll {
        fn intercept(
            &self,
            _field: &str,
            rule: &RuleSpec,
            _value: Option<&Value>,
            _ctx: &EngineContext<'_>,
        ) -> Option<bool> {
            (rule.name == "vip").then_some(false)
        }
    }

    #[test]
    fn interceptor_runs_before_catalog() {
        let mut engine = engine(json!({}), &[("name", "vip")]);
        engine.add_interceptor(Arc::new(RejectAll));

        assert!(!engine.passes().unwrap());
        assert_eq!(
            engine.messages().messages("name"),
            vec!["The name field failed the vip check."]
        );
    }

    #[test]
    fn add_rules_appends() {
        let mut engine = engine(json!({"name": ""}), &[("name", "string")]);
        engine.add_rules([("name", "required")].into_iter().collect());

        assert_eq!(engine.rules().get("name"), Some("string|required"));
        assert!(!engine.passes().unwrap());
    }
}
