//! # modeval
//!
//! Mode-aware data validation driven by rule strings. Rules are declared
//! per field as pipe-delimited strings, optionally overridden per operation
//! (insert, update, delete), and evaluated by a pluggable rule engine.
//!
//! ## Example
//!
//! ```rust
//! use modeval::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let rules = RuleSet::new()
//!     .rule("email", "required|email")
//!     .rule("name", "required|max:50")
//!     .on_update("name", "sometimes|max:50");
//!
//! let mut session = ValidationSession::new(Arc::new(StandardEngineFactory::new()), rules);
//!
//! assert!(!session.valid_for_insert(json!({"email": "", "name": "Bob"})).unwrap());
//! assert!(session.errors().has("email"));
//! ```
//!
//! ## Rule strings
//!
//! - `required|email|max:255` - segments separated by `|`, parameters by `,`
//! - `unique:users,name,[id]` - `[field]` placeholders take the field's
//!   current value when the run starts
//! - `regex:/^\d+$/` - the pattern is kept whole
//!
//! ## Error Format
//!
//! [`ErrorBag::to_api_error`] renders failures as:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "Validation failed",
//!     "fields": [
//!       {"field": "email", "code": "required", "message": "The email field is required."}
//!     ]
//!   }
//! }
//! ```

mod config;
mod data;
mod dynamic;
mod engine;
mod error;
mod rules;
mod session;
mod standard;

pub use config::{FailureStyle, PlaceholderPolicy, SelectionPolicy, ValidatorConfig};
pub use data::{normalize, DataRecord, DataSource, SourceObject};
pub use dynamic::{DynamicRule, DynamicRuleRegistry, Predicate};
pub use engine::{
    custom_message, failure, parse_rules, CustomMessages, EngineContext, EngineError,
    ResolvedRules, RuleEngine, RuleEngineFactory, RuleInterceptor, RuleSpec,
    DEFAULT_FAILURE_MESSAGE,
};
pub use error::{
    ApiValidationError, ErrorBag, ErrorBody, FieldErrorResponse, Result, RuleError,
    ValidationError, ValidationFailed,
};
pub use rules::{resolve, select, set_unique, substitute, RuleDeclaration, RuleSet, UniqueValue};
pub use session::{HookContext, Mode, NoHooks, SessionState, ValidationSession, ValidatorHooks};
pub use standard::{RecordStore, StandardEngine, StandardEngineFactory};

/// Prelude module for validation
pub mod prelude {
    pub use crate::config::{FailureStyle, PlaceholderPolicy, SelectionPolicy, ValidatorConfig};
    pub use crate::data::{DataRecord, DataSource, SourceObject};
    pub use crate::engine::{EngineContext, RuleEngineFactory};
    pub use crate::error::{ErrorBag, ValidationError, ValidationFailed};
    pub use crate::rules::{RuleSet, UniqueValue};
    pub use crate::session::{HookContext, Mode, ValidationSession, ValidatorHooks};
    pub use crate::standard::{RecordStore, StandardEngineFactory};
}
