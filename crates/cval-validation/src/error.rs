#![forbid(unsafe_code)]

//! Error types.

use std::any::Any;
use std::fmt;

/// A constraint could not be constructed.
///
/// Raised immediately to the caller; never produced by the engine at runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// `ConstraintBuilder::build` was called without a validator.
    #[error("constraint has no validator")]
    MissingValidator,

    /// A pattern constraint was given a malformed regular expression.
    #[error("invalid pattern `{pattern}`: {message}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Parser message.
        message: String,
    },
}

/// A validator did not produce a result.
///
/// The engine recovers from every failure locally: the constraint reports
/// invalid without a diagnostic and the failure is logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidatorFailure {
    /// The validator reported an error.
    #[error("validator error: {0}")]
    Error(String),

    /// The validator panicked.
    #[error("validator panicked: {0}")]
    Panicked(String),

    /// The pending result was dropped without being completed.
    #[error("pending result abandoned before completion")]
    Abandoned,
}

impl ValidatorFailure {
    /// Wrap any displayable error.
    pub fn error(err: impl fmt::Display) -> Self {
        Self::Error(err.to_string())
    }

    /// Build a failure from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}
