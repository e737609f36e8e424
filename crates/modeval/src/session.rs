//! Validation sessions.
//!
//! A [`ValidationSession`] owns the data, declared rules and accumulated
//! errors of a validator and drives one run at a time through
//! [`SessionState`]:
//!
//! ```text
//! Idle -> DataBound -> RulesResolved -> PreValidated -> Executed -> Passed | Failed
//! ```
//!
//! Rules are selected before the lifecycle hooks run and placeholders are
//! substituted after them, so a hook that sets a value (an id, say) is seen
//! by every `[field]` placeholder of the run.

use crate::config::{FailureStyle, SelectionPolicy, ValidatorConfig};
use crate::data::{normalize, DataRecord, DataSource};
use crate::dynamic::DynamicRuleRegistry;
use crate::engine::{CustomMessages, EngineContext, ResolvedRules, RuleEngine, RuleEngineFactory};
use crate::error::{ErrorBag, Result, ValidationFailed};
use crate::rules::{resolve, select, set_unique, RuleDeclaration, RuleSet, UniqueValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Operation a run validates for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// No operation; only base rules and the generic hook apply.
    #[default]
    None,
    /// Creating a record.
    Insert,
    /// Updating a record.
    Update,
    /// Deleting a record.
    Delete,
}

impl Mode {
    /// Get the mode name.
    pub fn name(&self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Insert => "insert",
            Mode::Update => "update",
            Mode::Delete => "delete",
        }
    }

    /// Mode-specific pre-validation hook, if any.
    fn hook<H: ValidatorHooks>(self) -> Option<HookFn<H>> {
        match self {
            Mode::None => None,
            Mode::Insert => Some(H::pre_validate_on_insert as HookFn<H>),
            Mode::Update => Some(H::pre_validate_on_update as HookFn<H>),
            Mode::Delete => Some(H::pre_validate_on_delete as HookFn<H>),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where a session is in its run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    DataBound,
    RulesResolved,
    PreValidated,
    Executed,
    Passed,
    Failed,
}

type HookFn<H> = fn(&mut H, &mut HookContext<'_>) -> Result<()>;

/// Mutable view of a run handed to lifecycle hooks.
///
/// Hooks may change the data and the rules selected for the run. Changes to
/// the rules only affect the current run.
pub struct HookContext<'a> {
    mode: Mode,
    data: &'a mut DataRecord,
    rules: &'a mut ResolvedRules,
}

impl<'a> HookContext<'a> {
    /// Mode of the run.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Data of the run.
    pub fn data(&self) -> &DataRecord {
        &*self.data
    }

    /// Value at a dot path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.data.get(path)
    }

    /// Whether the value at a dot path is present and truthy.
    pub fn has(&self, path: &str) -> bool {
        self.data.has(path)
    }

    /// Set a value at a dot path.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        self.data.set(path, value);
        self
    }

    /// Merge data into the run.
    pub fn merge(&mut self, data: impl Into<DataRecord>) -> &mut Self {
        self.data.merge(data);
        self
    }

    /// Rules selected for the run, placeholders unresolved.
    pub fn rules(&self) -> &ResolvedRules {
        &*self.rules
    }

    /// Mutable rules of the run.
    pub fn rules_mut(&mut self) -> &mut ResolvedRules {
        &mut *self.rules
    }

    /// Append rules to the run.
    pub fn add_rules(&mut self, rules: ResolvedRules) -> &mut Self {
        self.rules.extend(rules);
        self
    }

    /// Drop a field's rule from the run.
    pub fn ignore(&mut self, field: &str) -> &mut Self {
        self.rules.remove(field);
        self
    }

    /// Append an exclusion value to the `unique` rule of `key` for this run.
    pub fn set_unique(&mut self, key: &str, value: UniqueValue) -> Result<&mut Self> {
        set_unique(self.rules, key, &value, "unique")?;
        Ok(self)
    }
}

/// Lifecycle hooks of a session.
///
/// Every hook defaults to a no-op. `pre_validate` runs first, then the hook
/// of the run's mode; `post_validate` runs once the engine has reported.
pub trait ValidatorHooks {
    fn pre_validate(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn pre_validate_on_insert(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn pre_validate_on_update(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn pre_validate_on_delete(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn post_validate(&mut self, _mode: Mode, _passed: bool, _errors: &ErrorBag) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ValidatorHooks for NoHooks {}

type ErrorCallback<H> = dyn FnMut(&ErrorBag, &ValidationSession<H>);

/// A validator bound to a rule engine factory, declared rules and hooks.
///
/// ```rust
/// use modeval::{Mode, RuleSet, StandardEngineFactory, ValidationSession};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let rules = RuleSet::new().rule("email", "required|email");
/// let mut session = ValidationSession::new(Arc::new(StandardEngineFactory::new()), rules);
///
/// session.set_data(json!({"email": "not-an-email"})).unwrap();
/// assert!(!session.validate(Mode::Insert).unwrap());
/// assert!(session.errors().has("email"));
/// ```
pub struct ValidationSession<H = NoHooks> {
    factory: Arc<dyn RuleEngineFactory>,
    hooks: H,
    rules: RuleSet,
    config: ValidatorConfig,
    dynamic: DynamicRuleRegistry,
    source: Option<DataSource>,
    /// Mode the record was normalized with.
    bound_mode: Mode,
    data: DataRecord,
    working_rules: ResolvedRules,
    errors: ErrorBag,
    engine: Option<Box<dyn RuleEngine>>,
    error_callback: Option<Box<ErrorCallback<H>>>,
    mode: Mode,
    state: SessionState,
}

impl ValidationSession<NoHooks> {
    /// Create a session without lifecycle hooks.
    pub fn new(factory: Arc<dyn RuleEngineFactory>, rules: RuleSet) -> Self {
        Self::with_hooks(factory, rules, NoHooks)
    }
}

impl<H: ValidatorHooks> ValidationSession<H> {
    /// Create a session with lifecycle hooks.
    pub fn with_hooks(factory: Arc<dyn RuleEngineFactory>, rules: RuleSet, hooks: H) -> Self {
        Self {
            factory,
            hooks,
            rules,
            config: ValidatorConfig::default(),
            dynamic: DynamicRuleRegistry::new(),
            source: None,
            bound_mode: Mode::None,
            data: DataRecord::new(),
            working_rules: ResolvedRules::new(),
            errors: ErrorBag::new(),
            engine: None,
            error_callback: None,
            mode: Mode::None,
            state: SessionState::Idle,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the callback invoked once per failed run, after errors are merged.
    pub fn on_error<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&ErrorBag, &ValidationSession<H>) + 'static,
    {
        self.error_callback = Some(Box::new(callback));
        self
    }

    // --- data ---

    /// Bind the data for the next run.
    ///
    /// A [`DataSource::ChangeSet`] is read for the session's current mode.
    /// A later run in a mode that reads it differently (update versus any
    /// other mode) normalizes it again, discarding edits made to the record.
    pub fn set_data(&mut self, source: impl Into<DataSource>) -> Result<&mut Self> {
        let source = source.into();
        self.data = normalize(&source, self.mode)?;
        self.source = Some(source);
        self.bound_mode = self.mode;
        self.transition(SessionState::DataBound);
        Ok(self)
    }

    /// Merge data into the bound record.
    pub fn add_data(&mut self, data: impl Into<DataRecord>) -> &mut Self {
        self.data.merge(data);
        if self.state == SessionState::Idle {
            self.transition(SessionState::DataBound);
        }
        self
    }

    /// Value at a dot path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.data.get(path)
    }

    /// Value at a dot path, or `default`.
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.data.get_or(path, default)
    }

    /// Whether the value at a dot path is present and truthy.
    pub fn has(&self, path: &str) -> bool {
        self.data.has(path)
    }

    /// Set a value at a dot path.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        self.data.set(path, value);
        self
    }

    /// Clear the data and return to [`SessionState::Idle`].
    ///
    /// Errors are kept; see [`reset_errors`](Self::reset_errors).
    pub fn reset_data(&mut self) -> &mut Self {
        self.data = DataRecord::new();
        self.source = None;
        self.bound_mode = Mode::None;
        self.working_rules = ResolvedRules::new();
        self.engine = None;
        self.mode = Mode::None;
        self.transition(SessionState::Idle);
        self
    }

    /// The bound record.
    pub fn data(&self) -> &DataRecord {
        &self.data
    }

    /// The source the record was normalized from.
    pub fn source(&self) -> Option<&DataSource> {
        self.source.as_ref()
    }

    // --- rules ---

    /// Validate every declared rule, present or not.
    pub fn strict(&mut self) -> &mut Self {
        self.config.selection = SelectionPolicy::Strict;
        self
    }

    /// Validate only fields present in the data.
    pub fn relaxed(&mut self) -> &mut Self {
        self.config.selection = SelectionPolicy::Relaxed;
        self
    }

    /// Exclude fields from the next runs, replacing the previous list.
    pub fn ignore<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.ignored = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Merge base rules; incoming rules replace existing ones.
    pub fn add_rules(&mut self, rules: RuleDeclaration) -> &mut Self {
        self.rules.add_rules(rules);
        self
    }

    /// Append an exclusion value to the declared `unique` rule of `key`.
    ///
    /// The change is permanent for the session; call it once.
    pub fn set_unique(&mut self, key: &str, value: UniqueValue) -> Result<&mut Self> {
        self.set_unique_rule(key, value, "unique")
    }

    /// [`set_unique`](Self::set_unique) for a rule other than `unique`.
    pub fn set_unique_rule(
        &mut self,
        key: &str,
        value: UniqueValue,
        rule_name: &str,
    ) -> Result<&mut Self> {
        self.rules.set_unique(key, &value, rule_name)?;
        Ok(self)
    }

    /// Register a predicate-backed rule for `field`.
    pub fn add_dynamic<F>(
        &mut self,
        field: impl Into<String>,
        rule: impl Into<String>,
        predicate: F,
        message: Option<String>,
    ) -> &mut Self
    where
        F: Fn(&str, Option<&Value>, &[String], &EngineContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.dynamic.register(field, rule, predicate, message);
        self
    }

    /// Declared rules.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Rules of the last run, placeholders resolved.
    pub fn working_rules(&self) -> &ResolvedRules {
        &self.working_rules
    }

    /// Custom message templates.
    pub fn messages(&self) -> &CustomMessages {
        &self.rules.messages
    }

    /// Registered dynamic rules.
    pub fn dynamic_rules(&self) -> &DynamicRuleRegistry {
        &self.dynamic
    }

    // --- state ---

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Mode of the current or last run.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the last run passed.
    pub fn passes(&self) -> bool {
        self.state == SessionState::Passed
    }

    /// Whether the last run failed.
    pub fn fails(&self) -> bool {
        self.state == SessionState::Failed
    }

    /// Engine of the last run.
    pub fn engine(&self) -> Option<&dyn RuleEngine> {
        self.engine.as_deref()
    }

    // --- errors ---

    /// Errors accumulated across runs.
    pub fn errors(&self) -> &ErrorBag {
        &self.errors
    }

    /// Every error message, space-joined.
    pub fn error_message(&self) -> String {
        self.errors.flatten()
    }

    pub fn reset_errors(&mut self) -> &mut Self {
        self.errors = ErrorBag::new();
        self
    }

    // --- runs ---

    /// Bind `source` and validate it in insert mode.
    pub fn valid_for_insert(&mut self, source: impl Into<DataSource>) -> Result<bool> {
        self.run_with(Mode::Insert, source)
    }

    /// Bind `source` and validate it in update mode.
    pub fn valid_for_update(&mut self, source: impl Into<DataSource>) -> Result<bool> {
        self.run_with(Mode::Update, source)
    }

    /// Bind `source` and validate it in delete mode.
    pub fn valid_for_delete(&mut self, source: impl Into<DataSource>) -> Result<bool> {
        self.run_with(Mode::Delete, source)
    }

    /// Bind `source` and validate it without a mode.
    pub fn is_valid(&mut self, source: impl Into<DataSource>) -> Result<bool> {
        self.run_with(Mode::None, source)
    }

    fn run_with(&mut self, mode: Mode, source: impl Into<DataSource>) -> Result<bool> {
        self.mode = mode;
        self.set_data(source)?;
        self.validate(mode)
    }

    /// Validate the bound data in `mode`.
    ///
    /// Returns `Ok(false)` on failure, or [`ValidationFailed`] under
    /// [`FailureStyle::Raise`]. Normalization, resolution, hook and engine
    /// errors are returned as they are.
    pub fn validate(&mut self, mode: Mode) -> Result<bool> {
        self.validate_with(mode, ResolvedRules::new())
    }

    /// [`validate`](Self::validate) with extra rules appended to the run.
    pub fn validate_with(&mut self, mode: Mode, extra: ResolvedRules) -> Result<bool> {
        self.mode = mode;
        self.engine = None;
        self.working_rules = ResolvedRules::new();
        self.rebind(mode)?;

        let mut rules = select(
            &self.rules.rules,
            self.rules.overlay(mode),
            &self.rules.ignored,
            self.config.selection,
            &self.data,
        );
        rules.extend(extra);
        self.transition(SessionState::RulesResolved);

        {
            let mut ctx = HookContext {
                mode,
                data: &mut self.data,
                rules: &mut rules,
            };
            self.hooks.pre_validate(&mut ctx)?;
            if let Some(hook) = mode.hook::<H>() {
                hook(&mut self.hooks, &mut ctx)?;
            }
        }
        self.transition(SessionState::PreValidated);

        let mut resolved = resolve(&rules, &self.data, &self.config.placeholders)?;
        resolved.extend(self.dynamic.rules(&resolved));
        self.working_rules = resolved.clone();

        let mut engine =
            self.factory
                .make(self.data.clone(), resolved, self.dynamic.custom_messages());
        engine.set_custom_messages(self.rules.messages.clone());
        if !self.dynamic.is_empty() {
            engine.add_interceptor(Arc::new(self.dynamic.clone()));
        }

        let passed = engine.passes()?;
        self.transition(SessionState::Executed);
        self.hooks.post_validate(mode, passed, engine.messages());

        let bag = engine.messages().clone();
        self.engine = Some(engine);

        if passed {
            self.transition(SessionState::Passed);
            return Ok(true);
        }

        tracing::debug!(%mode, fields = bag.len(), "validation failed");
        self.errors.merge(bag);
        if let Some(mut callback) = self.error_callback.take() {
            callback(&self.errors, self);
            self.error_callback = Some(callback);
        }
        self.transition(SessionState::Failed);

        match self.config.failure_style {
            FailureStyle::Boolean => Ok(false),
            FailureStyle::Raise => Err(ValidationFailed::new(mode, self.errors.clone()).into()),
        }
    }

    /// Validate in `mode`, returning the failure as an error whatever the
    /// configured [`FailureStyle`].
    pub fn check(&mut self, mode: Mode) -> Result<()> {
        if self.validate(mode)? {
            Ok(())
        } else {
            Err(ValidationFailed::new(mode, self.errors.clone()).into())
        }
    }

    /// Normalize a change-set source again when the run's mode selects a
    /// different view of it than the one it was bound with.
    fn rebind(&mut self, mode: Mode) -> Result<()> {
        if (self.bound_mode == Mode::Update) == (mode == Mode::Update) {
            return Ok(());
        }
        if let Some(source @ DataSource::ChangeSet(_)) = &self.source {
            self.data = normalize(source, mode)?;
            self.bound_mode = mode;
            tracing::trace!(%mode, "change set normalized again");
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(from = ?self.state, to = ?next, mode = %self.mode, "session state changed");
        self.state = next;
    }
}

impl<H: fmt::Debug> fmt::Debug for ValidationSession<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationSession")
            .field("hooks", &self.hooks)
            .field("rules", &self.rules)
            .field("config", &self.config)
            .field("dynamic", &self.dynamic)
            .field("data", &self.data)
            .field("errors", &self.errors)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaceholderPolicy;
    use crate::error::ValidationError;
    use crate::standard::StandardEngineFactory;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn session(rules: RuleSet) -> ValidationSession {
        ValidationSession::new(Arc::new(StandardEngineFactory::new()), rules)
    }

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Vec<&'static str>,
    }

    impl ValidatorHooks for Recorder {
        fn pre_validate(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
            self.calls.push("pre");
            Ok(())
        }

        fn pre_validate_on_insert(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
            self.calls.push("insert");
            Ok(())
        }

        fn pre_validate_on_update(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
            self.calls.push("update");
            Ok(())
        }

        fn pre_validate_on_delete(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
            self.calls.push("delete");
            Ok(())
        }

        fn post_validate(&mut self, _mode: Mode, _passed: bool, _errors: &ErrorBag) {
            self.calls.push("post");
        }
    }

    #[test]
    fn hooks_follow_mode_table() {
        let mut session = ValidationSession::with_hooks(
            Arc::new(StandardEngineFactory::new()),
            RuleSet::new(),
            Recorder::default(),
        );

        session.is_valid(json!({})).unwrap();
        session.valid_for_insert(json!({})).unwrap();
        session.valid_for_update(json!({})).unwrap();
        session.valid_for_delete(json!({})).unwrap();

        assert_eq!(
            session.hooks().calls,
            vec![
                "pre", "post", "pre", "insert", "post", "pre", "update", "post", "pre", "delete",
                "post"
            ]
        );
    }

    #[test]
    fn state_machine() {
        let mut session = session(RuleSet::new().rule("name", "required"));
        assert_eq!(session.state(), SessionState::Idle);

        session.set_data(json!({"name": "Bob"})).unwrap();
        assert_eq!(session.state(), SessionState::DataBound);

        assert!(session.validate(Mode::None).unwrap());
        assert_eq!(session.state(), SessionState::Passed);
        assert!(session.passes());

        session.set("name", "");
        assert!(!session.validate(Mode::None).unwrap());
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.fails());

        session.reset_data();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.data().is_empty());
        assert!(session.working_rules().is_empty());
        assert!(session.errors().has("name"));
    }

    struct StampId;

    impl ValidatorHooks for StampId {
        fn pre_validate_on_update(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
            ctx.set("id", 42);
            ctx.set_unique("name", UniqueValue::Id)?;
            Ok(())
        }
    }

    #[test]
    fn placeholders_see_hook_changes() {
        let rules = RuleSet::new().rule("name", "required|different:[id]|unique:users,name");
        let mut session =
            ValidationSession::with_hooks(Arc::new(StandardEngineFactory::new()), rules, StampId);
        session.set_data(json!({"name": "Bob"})).unwrap();

        // no store configured, so unique fails the run with an engine error
        let err = session.validate(Mode::Update).unwrap_err();
        assert!(matches!(err, ValidationError::Engine(_)));
        assert_eq!(
            session.working_rules().get("name"),
            Some("required|different:42|unique:users,name,42")
        );
        // rule changes made by hooks only last for the run
        assert_eq!(
            session.rules().rules.get("name"),
            Some("required|different:[id]|unique:users,name")
        );
    }

    #[test]
    fn failures_merge_across_runs() {
        let mut session = session(RuleSet::new().rule("a", "integer").rule("b", "integer"));

        session.set_data(json!({"a": "x"})).unwrap();
        assert!(!session.validate(Mode::None).unwrap());
        session.set_data(json!({"a": "y", "b": "z"})).unwrap();
        assert!(!session.validate(Mode::None).unwrap());

        assert_eq!(session.errors().messages("a").len(), 2);
        assert_eq!(session.errors().messages("b").len(), 1);

        session.reset_errors();
        assert!(session.errors().is_empty());
    }

    #[test]
    fn raise_style_returns_mode_variant() {
        let mut session = session(RuleSet::new().rule("email", "required|email"))
            .with_config(ValidatorConfig::new().failure_style(FailureStyle::Raise));

        let err = session.valid_for_update(json!({"email": "nope"})).unwrap_err();
        match err {
            ValidationError::Failed(ValidationFailed::Update(bag)) => assert!(bag.has("email")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn check_ignores_failure_style() {
        let mut session = session(RuleSet::new().rule("email", "email"));
        session.set_data(json!({"email": "nope"})).unwrap();

        let err = session.check(Mode::Delete).unwrap_err();
        assert!(matches!(err, ValidationError::Failed(ValidationFailed::Delete(_))));

        session.set_data(json!({"email": "a@example.com"})).unwrap();
        assert!(session.check(Mode::Delete).is_ok());
    }

    #[test]
    fn error_callback_runs_once_per_failure() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut session = session(RuleSet::new().rule("age", "integer"));
        let sink = Rc::clone(&seen);
        session.on_error(move |bag, session| {
            sink.borrow_mut().push((bag.len(), session.state()));
        });

        session.is_valid(json!({"age": 3})).unwrap();
        session.is_valid(json!({"age": "old"})).unwrap();

        assert_eq!(*seen.borrow(), vec![(1, SessionState::Executed)]);
    }

    #[test]
    fn strict_and_ignore() {
        let mut session = session(RuleSet::new().rule("name", "required").rule("email", "required"));
        session.set_data(json!({"name": "Bob"})).unwrap();
        assert!(session.validate(Mode::None).unwrap());

        session.strict();
        assert!(!session.validate(Mode::None).unwrap());

        session.reset_errors().ignore(["email"]);
        assert!(session.validate(Mode::None).unwrap());

        session.relaxed().ignore(Vec::<String>::new());
        assert!(session.validate(Mode::None).unwrap());
    }

    #[test]
    fn change_set_in_update_mode() {
        use crate::data::SourceObject;
        use serde_json::Map;

        struct User;

        impl SourceObject for User {
            fn to_map(&self) -> Option<Map<String, Value>> {
                json!({"name": "", "email": "bob@example.com"}).as_object().cloned()
            }

            fn changed_attributes(&self) -> Option<Map<String, Value>> {
                json!({"email": "bob@example.com"}).as_object().cloned()
            }
        }

        let rules = RuleSet::new().rule("name", "required").rule("email", "email");
        let mut session = session(rules);

        assert!(session.valid_for_update(DataSource::changes(User)).unwrap());
        assert!(!session.valid_for_insert(DataSource::changes(User)).unwrap());
        assert!(session.source().is_some());
    }

    #[test]
    fn change_set_follows_the_run_mode() {
        use crate::data::SourceObject;
        use serde_json::Map;

        struct Post;

        impl SourceObject for Post {
            fn to_map(&self) -> Option<Map<String, Value>> {
                json!({"title": "", "body": "text"}).as_object().cloned()
            }

            fn changed_attributes(&self) -> Option<Map<String, Value>> {
                json!({"body": "edited"}).as_object().cloned()
            }
        }

        let rules = RuleSet::new().rule("title", "required").rule("body", "required");

        let mut fresh = session(rules.clone());
        fresh.set_data(DataSource::changes(Post)).unwrap();
        assert!(fresh.validate(Mode::Update).unwrap());
        assert!(!fresh.has("title"));
        assert_eq!(fresh.get("body"), Some(&json!("edited")));

        let mut reused = session(rules);
        assert!(reused.valid_for_update(DataSource::changes(Post)).unwrap());
        reused.set_data(DataSource::changes(Post)).unwrap();
        assert!(!reused.validate(Mode::Insert).unwrap());
        assert!(reused.errors().has("title"));
        assert_eq!(reused.get("body"), Some(&json!("text")));
    }

    #[test]
    fn failed_resolution_clears_working_rules() {
        let rules = RuleSet::new().rule("name", "in:[code],x");
        let mut session = session(rules)
            .with_config(ValidatorConfig::new().placeholders(PlaceholderPolicy::Reject));

        assert!(session.is_valid(json!({"name": "x", "code": "y"})).unwrap());
        assert_eq!(session.working_rules().get("name"), Some("in:y,x"));

        session.set_data(json!({"name": "x"})).unwrap();
        let err = session.validate(Mode::Insert).unwrap_err();

        assert!(matches!(err, ValidationError::RuleResolution { .. }));
        assert!(session.working_rules().is_empty());
    }

    #[test]
    fn dynamic_rule_failure_uses_message() {
        let mut session = session(RuleSet::new());
        session.add_dynamic(
            "age",
            "adult",
            |_, value, _, _| value.and_then(Value::as_u64).is_some_and(|age| age >= 18),
            Some("Adults only.".to_string()),
        );

        assert!(!session.is_valid(json!({"age": 12})).unwrap());
        assert_eq!(session.errors().messages("age"), vec!["Adults only."]);
        assert_eq!(session.working_rules().get("age"), Some("adult"));
    }

    #[test]
    fn accessors() {
        let mut session = session(RuleSet::new().message("required", "Need {field}."));
        session.add_data(json!({"user": {"name": "Bob"}}).as_object().cloned().unwrap_or_default());
        assert_eq!(session.state(), SessionState::DataBound);

        session.set("user.active", true);
        assert!(session.has("user.active"));
        assert_eq!(session.get("user.name"), Some(&json!("Bob")));
        assert_eq!(session.get_or("user.age", json!(0)), json!(0));
        assert_eq!(session.messages().get("required").map(String::as_str), Some("Need {field}."));

        session.add_rules([("user.name", "required")].into_iter().collect());
        session.strict();
        session.set("user.name", "");
        assert!(!session.validate(Mode::None).unwrap());
        assert_eq!(session.error_message(), "Need user.name.");
        assert!(session.engine().is_some());
    }
}
