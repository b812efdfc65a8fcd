//! Error types for the CRU filtering core.
//!
//! Three failure families exist here:
//! - Configuration errors: caught at model construction, before any
//!   forward pass.
//! - Input-contract violations: malformed sequences (negative gaps,
//!   mismatched shapes) rejected at the call boundary, before any state
//!   mutation.
//! - Numerical errors: raised only when local regularization (jitter,
//!   symmetrization, eigenvalue floor) fails to restore validity.
//!   Recovered guard activations are counted in diagnostics, not raised.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for CRU operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Model configuration errors (dimensions, dataset/task selection).
    Config,
    /// Malformed forward-pass input.
    InputContract,
    /// Numerical failure that regularization could not absorb.
    Numerical,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::InputContract => write!(f, "input_contract"),
            ErrorCategory::Numerical => write!(f, "numerical"),
        }
    }
}

/// Unified error type for the CRU core.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    #[error("unknown registry name: {0}")]
    UnknownName(String),

    // Input-contract violations (20-29)
    #[error("negative time gap at step {step}: {gap}")]
    NegativeTimeGap { step: usize, gap: f64 },

    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("sequence must contain at least one time step")]
    EmptySequence,

    #[error("non-finite input at step {step}")]
    NonFiniteInput { step: usize },

    // Numerical errors (30-39)
    #[error("numerical instability: {0}")]
    Numerical(String),
}

impl Error {
    /// Stable error code, grouped by category:
    /// - 10-19: configuration
    /// - 20-29: input contract
    /// - 30-39: numerical
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidValue { .. } => 11,
            Error::UnknownName(_) => 12,
            Error::NegativeTimeGap { .. } => 20,
            Error::ShapeMismatch { .. } => 21,
            Error::EmptySequence => 22,
            Error::NonFiniteInput { .. } => 23,
            Error::Numerical(_) => 30,
        }
    }

    /// Category for grouping.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidValue { .. } | Error::UnknownName(_) => {
                ErrorCategory::Config
            }
            Error::NegativeTimeGap { .. }
            | Error::ShapeMismatch { .. }
            | Error::EmptySequence
            | Error::NonFiniteInput { .. } => ErrorCategory::InputContract,
            Error::Numerical(_) => ErrorCategory::Numerical,
        }
    }

    /// Whether the caller can plausibly recover. Configuration and input
    /// errors are fixable by the caller; an exhausted regularizer is not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Numerical(_))
    }
}

impl From<cru_math::MathError> for Error {
    fn from(err: cru_math::MathError) -> Self {
        Error::Numerical(err.to_string())
    }
}

/// Structured error form for machine-parseable reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,
    /// Error category.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
    /// Whether the error is recoverable by the caller.
    pub recoverable: bool,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

impl StructuredError {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}
