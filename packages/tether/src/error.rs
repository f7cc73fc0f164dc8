//! Structured error types for tether.
//!
//! # The Error Boundary Rule
//!
//! > **Only [`ValidationError`] escapes a public entry point.**
//!
//! - `ValidationError` is raised synchronously when a setting, task, step,
//!   action, or key has the wrong shape. Callers must handle it before the
//!   payload crosses the transport.
//! - `TransportError` is logged and degraded to a no-op by the runtime.
//! - Timeouts are not errors at all: correlated reads resolve to `None`.
//! - Handler failures are caught at the notify boundary and logged.
//!
//! # Example
//!
//! ```ignore
//! use tether::{TetherError, ValidationError};
//!
//! match runtime.actions().register_key(json!({ "id": "play" })).await {
//!     Ok(key) => tracing::info!(key_id = %key.id, "key registered"),
//!     Err(TetherError::Validation(ValidationError::MissingField { field, .. })) => {
//!         eprintln!("key is missing {field}");
//!     }
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

use std::fmt;

use thiserror::Error;

// =============================================================================
// Entity Kind
// =============================================================================

/// The kind of tagged payload a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Setting,
    SettingOption,
    Task,
    Step,
    Action,
    Key,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Setting => write!(f, "setting"),
            EntityKind::SettingOption => write!(f, "setting option"),
            EntityKind::Task => write!(f, "task"),
            EntityKind::Step => write!(f, "step"),
            EntityKind::Action => write!(f, "action"),
            EntityKind::Key => write!(f, "key"),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// A malformed setting, task, step, action, or key.
///
/// Each variant carries the entity kind and, where one could be read, the id
/// of the offending object so the caller can report it precisely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The value is not a JSON object.
    #[error("{kind} must be an object")]
    NotAnObject { kind: EntityKind },

    /// A required field is absent.
    #[error("{kind} {id:?} is missing required field `{field}`")]
    MissingField {
        kind: EntityKind,
        id: Option<String>,
        field: &'static str,
    },

    /// A field is present but has the wrong type or an illegal value.
    #[error("{kind} {id:?} has invalid `{field}`: {reason}")]
    InvalidField {
        kind: EntityKind,
        id: Option<String>,
        field: &'static str,
        reason: String,
    },

    /// The `type` discriminator is not one of the known variants.
    #[error("{kind} {id:?} has unknown type {tag:?}")]
    UnknownVariant {
        kind: EntityKind,
        id: Option<String>,
        tag: String,
    },

    /// A collection that must be non-empty is empty.
    #[error("{kind} {id:?} requires at least one entry in `{field}`")]
    EmptyCollection {
        kind: EntityKind,
        id: Option<String>,
        field: &'static str,
    },

    /// The input could not be classified as any known shape at all.
    #[error("cannot classify {kind} input: {reason}")]
    Unclassifiable { kind: EntityKind, reason: String },
}

impl ValidationError {
    /// The id of the object that failed, if one could be read.
    pub fn id(&self) -> Option<&str> {
        match self {
            ValidationError::MissingField { id, .. }
            | ValidationError::InvalidField { id, .. }
            | ValidationError::UnknownVariant { id, .. }
            | ValidationError::EmptyCollection { id, .. } => id.as_deref(),
            ValidationError::NotAnObject { .. } | ValidationError::Unclassifiable { .. } => None,
        }
    }

    /// Returns true if the whole batch must be rejected, not just this entry.
    pub fn is_unclassifiable(&self) -> bool {
        matches!(self, ValidationError::Unclassifiable { .. })
    }
}

// =============================================================================
// Transport Error
// =============================================================================

/// Failure to hand an envelope to the host.
///
/// Never returned from a public entry point; the runtime logs it and turns
/// the operation into a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No transport has been attached (runtime not started, or purged).
    #[error("transport not attached")]
    NotAttached,

    /// The underlying channel was closed by the host.
    #[error("transport channel closed")]
    Closed,

    /// The transport refused the envelope.
    #[error("transport rejected envelope: {0}")]
    Rejected(String),
}

// =============================================================================
// Tether Error
// =============================================================================

/// Top-level error for public operations.
#[derive(Debug, Error)]
pub enum TetherError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
