#![forbid(unsafe_code)]

//! Constraint model and validation engine.
//!
//! # Overview
//!
//! - [`Constraint`]: a validator plus the observables it reads and the
//!   executors it runs on
//! - [`constraints`]: built-in constraints (presence, patterns, ranges)
//! - [`ValidationHelper`]: runs constraints whenever the value or a
//!   dependency changes and publishes aggregate state
//! - [`ConstrainedProperty`]: a value bundled with its helper
//!
//! Validators may complete on any thread. Results are applied on the
//! constraint's completion executor, the helper's default one, or inline.
//! Superseded and duplicated results are discarded.

pub mod config;
pub mod constraint;
pub mod constraints;
pub mod diagnostics;
pub mod error;
pub mod helper;
pub mod pending;
pub mod property;
pub mod result;
pub mod trace;
pub mod validator;

pub use config::HelperConfig;
pub use constraint::{Constraint, ConstraintBuilder, ValidatorKind};
pub use diagnostics::{Diagnostic, DiagnosticList};
pub use error::{ConfigurationError, ValidatorFailure};
pub use helper::{ChangeKind, StateFlags, ValidationChange, ValidationHelper};
pub use pending::{Completer, Pending};
pub use property::{Binding, ConstrainedProperty, ConstrainedView};
pub use result::{ValidationResult, ValidationState};
pub use trace::{Generation, RoundCause, ValidationEvent, ValidationTrace};
pub use validator::{
    AsyncValidator, CancellationToken, FnAsyncValidator, FnValidator, SyncAdapter,
    TryFnValidator, Validator,
};
