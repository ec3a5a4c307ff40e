//! Error types for the lifecycle engine
//!
//! Every error carries a stable kind tag (for callers that dispatch on
//! error class) plus a human-readable message via thiserror. Validation
//! errors keep row/field context so they can be surfaced to users as-is.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Main error type for transition requests
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("no transition for action '{action}' from state '{state}'")]
    InvalidTransition { state: String, action: String },

    #[error("actor '{actor}' may not perform '{action}': {reason}")]
    Unauthorized {
        actor: String,
        action: String,
        reason: String,
    },

    #[error("guard not satisfied: {condition}")]
    GuardNotSatisfied { condition: String },

    #[error("state '{state}' is terminal, no further transitions")]
    TerminalState { state: String },

    #[error("version conflict on document {document_id}: expected {expected}, found {actual}")]
    VersionConflict {
        document_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("side effect '{effect}' failed after commit: {detail}")]
    SideEffect { effect: String, detail: String },

    #[error("document {document_id} not found")]
    NotFound { document_id: Uuid },

    #[error("document {document_id} is locked by another transition")]
    Busy { document_id: Uuid },

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl EngineError {
    /// Stable kind tag for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::GuardNotSatisfied { .. } => ErrorKind::GuardNotSatisfied,
            Self::TerminalState { .. } => ErrorKind::TerminalState,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::SideEffect { .. } => ErrorKind::SideEffect,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Stable error kind tags exposed at the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InvalidTransition,
    Unauthorized,
    GuardNotSatisfied,
    TerminalState,
    VersionConflict,
    Configuration,
    SideEffect,
    NotFound,
    Busy,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::InvalidTransition => "invalid_transition",
            Self::Unauthorized => "unauthorized",
            Self::GuardNotSatisfied => "guard_not_satisfied",
            Self::TerminalState => "terminal_state",
            Self::VersionConflict => "version_conflict",
            Self::Configuration => "configuration",
            Self::SideEffect => "side_effect",
            Self::NotFound => "not_found",
            Self::Busy => "busy",
            Self::Storage => "storage",
        }
    }

    /// Whether the caller can retry the same request verbatim
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict | Self::Busy | Self::Storage)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input-data validation errors with row/field context
///
/// Row numbers are 1-based, matching the numbering users see on the
/// document itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("row {row}: quantity must be greater than zero (got {value})")]
    NonPositiveQuantity { row: usize, value: Decimal },

    #[error("row {row}: rate must not be negative (got {value})")]
    NegativeRate { row: usize, value: Decimal },

    #[error("document requires at least one line item")]
    NoLineItems,

    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("conversion rate must be greater than zero (got {value})")]
    NonPositiveConversionRate { value: Decimal },
}

/// Result type aliases for convenience
pub type EngineResult<T> = Result<T, EngineError>;
pub type ValidationResult<T> = Result<T, ValidationError>;
