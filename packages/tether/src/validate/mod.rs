//! Validation and normalization of tagged payloads.
//!
//! Every validator takes untrusted JSON and either returns the normalized
//! typed value or a structured [`ValidationError`]. They are pure: the same
//! input is always accepted or rejected the same way, and no validator reads
//! runtime state.
//!
//! | Input    | Validate              | Normalize               |
//! |----------|-----------------------|-------------------------|
//! | Setting  | [`validate_setting`]  | [`sanitize_setting`]    |
//! | Task     | [`validate_task`]     | returns [`Task`]        |
//! | Step     | [`validate_step`]     | returns [`Step`]        |
//! | Action   | [`validate_action`]   | returns [`Action`]      |
//! | Key      | [`validate_key`]      | returns [`Validated<Key>`] |
//!
//! Keys are the one shape with a forgiving default: a missing `enabled`
//! becomes `true` and is reported as a [`ValidationWarning`] instead of a
//! failure. The warning travels with the value so the caller decides whether
//! to log it.
//!
//! [`Task`]: crate::model::Task
//! [`Step`]: crate::model::Step
//! [`Action`]: crate::model::Action

mod action;
mod reader;
mod setting;
mod task;

use std::fmt;

pub use action::{validate_action, validate_key};
pub use setting::{sanitize_setting, validate_setting, validate_setting_value};
pub use task::{validate_step, validate_task};

/// A value that passed validation, plus any soft defaults that were applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated<T> {
    pub value: T,
    pub warnings: Vec<ValidationWarning>,
}

impl<T> Validated<T> {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Emit each warning through `tracing` and return the value.
    pub fn log_warnings(self) -> T {
        for warning in &self.warnings {
            tracing::warn!(id = %warning.id, field = warning.field, "{}", warning.message);
        }
        self.value
    }
}

/// A soft default applied during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub id: String,
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.id, self.field, self.message)
    }
}
