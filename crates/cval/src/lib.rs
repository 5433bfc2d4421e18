#![forbid(unsafe_code)]

//! Constrained values: public facade crate.
//!
//! Re-exports the observable layer from `cval-core` and the constraint
//! engine from `cval-validation`, plus a prelude for day-to-day usage.
//!
//! ```
//! use cval::prelude::*;
//!
//! let name = Observable::new(String::new());
//! let helper = ValidationHelper::new(
//!     &name,
//!     [constraints::not_blank_with(|_: &String| "required")],
//! );
//! assert!(helper.is_invalid());
//! assert_eq!(helper.errors(), vec!["required"]);
//!
//! name.set("Ada".to_string());
//! assert!(helper.is_valid());
//! ```

use std::fmt;

// --- Core re-exports -------------------------------------------------------

pub use cval_core::{
    Dependency, Executor, InlineExecutor, Observable, ObservableId, QueueExecutor, Subscription,
    Task, ThreadExecutor, WorkerPool,
};

// --- Validation re-exports -------------------------------------------------

pub use cval_validation::{
    AsyncValidator, Binding, CancellationToken, ChangeKind, Completer, ConfigurationError,
    ConstrainedProperty, ConstrainedView, Constraint, ConstraintBuilder, Diagnostic,
    DiagnosticList, FnAsyncValidator, FnValidator, Generation, HelperConfig, Pending, RoundCause,
    StateFlags, SyncAdapter, TryFnValidator, ValidationChange, ValidationEvent, ValidationHelper,
    ValidationResult, ValidationState, ValidationTrace, Validator, ValidatorFailure,
    ValidatorKind, constraints,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for cval setup code.
#[derive(Debug)]
pub enum Error {
    /// A constraint was configured incorrectly.
    Configuration(ConfigurationError),
    /// Spawning executor threads failed.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Configuration(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Standard result type for cval setup APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        CancellationToken, ConstrainedProperty, Constraint, Error, HelperConfig, Observable,
        Pending, QueueExecutor, Result, ValidationHelper, ValidationResult, WorkerPool,
        constraints,
    };

    pub use crate::{core, validation};
}

pub use cval_core as core;
pub use cval_validation as validation;
