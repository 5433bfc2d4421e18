#![forbid(unsafe_code)]

//! Constraints: a validator plus the observables it reads and the executors
//! it runs on.
//!
//! A [`Constraint`] is immutable once built and cheap to clone. Build one with
//! [`Constraint::builder`] or one of the shortcut constructors:
//!
//! ```
//! use cval_validation::{Constraint, ValidationResult};
//!
//! let not_empty = Constraint::validate(|s: &String| {
//!     if s.is_empty() {
//!         ValidationResult::error("required")
//!     } else {
//!         ValidationResult::VALID
//!     }
//! });
//! assert!(not_empty.dependencies().is_empty());
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use cval_core::{Dependency, Executor, ObservableId};

use crate::error::{ConfigurationError, ValidatorFailure};
use crate::pending::Pending;
use crate::result::ValidationResult;
use crate::validator::{
    AsyncValidator, CancellationToken, FnAsyncValidator, FnValidator, SyncAdapter, TryFnValidator,
    Validator,
};

/// How a constraint's validator produces its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorKind {
    /// A synchronous [`Validator`] wrapped in a [`SyncAdapter`].
    Sync,
    /// A native [`AsyncValidator`].
    Async,
}

/// A validation rule over values of type `T` producing diagnostics of type `E`.
pub struct Constraint<T, E> {
    validator: Arc<dyn AsyncValidator<T, E>>,
    kind: ValidatorKind,
    dependencies: Vec<Arc<dyn Dependency>>,
    invocation_executor: Option<Arc<dyn Executor>>,
    completion_executor: Option<Arc<dyn Executor>>,
    name: Option<String>,
}

impl<T, E> Clone for Constraint<T, E> {
    fn clone(&self) -> Self {
        Self {
            validator: Arc::clone(&self.validator),
            kind: self.kind,
            dependencies: self.dependencies.clone(),
            invocation_executor: self.invocation_executor.clone(),
            completion_executor: self.completion_executor.clone(),
            name: self.name.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Constraint<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deps: Vec<ObservableId> = self
            .dependencies
            .iter()
            .map(|d| d.observable_id())
            .collect();
        f.debug_struct("Constraint")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("dependencies", &deps)
            .field("invocation_executor", &self.invocation_executor.is_some())
            .field("completion_executor", &self.completion_executor.is_some())
            .finish()
    }
}

impl<T, E> Constraint<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Start building a constraint.
    #[must_use]
    pub fn builder() -> ConstraintBuilder<T, E> {
        ConstraintBuilder::new()
    }

    /// A synchronous constraint with no dependencies.
    #[must_use]
    pub fn validate(f: impl Fn(&T) -> ValidationResult<E> + Send + Sync + 'static) -> Self {
        Self::from_sync(FnValidator(f))
    }

    /// A synchronous constraint whose check may fail.
    #[must_use]
    pub fn try_validate(
        f: impl Fn(&T) -> Result<ValidationResult<E>, ValidatorFailure> + Send + Sync + 'static,
    ) -> Self {
        Self::from_sync(TryFnValidator(f))
    }

    /// A synchronous check run on `executor` instead of the caller's thread.
    #[must_use]
    pub fn validate_async(
        f: impl Fn(&T) -> ValidationResult<E> + Send + Sync + 'static,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let mut constraint = Self::from_sync(FnValidator(f));
        constraint.invocation_executor = Some(executor);
        constraint
    }

    /// A check run on `executor` that can observe supersession through its
    /// [`CancellationToken`].
    #[must_use]
    pub fn validate_cancellable_async(
        f: impl Fn(&T, &CancellationToken) -> ValidationResult<E> + Send + Sync + 'static,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let validator = FnAsyncValidator(move |value: T, cancel: CancellationToken| {
            match catch_unwind(AssertUnwindSafe(|| f(&value, &cancel))) {
                Ok(result) => Pending::ready(result),
                Err(payload) => Pending::failed(ValidatorFailure::from_panic(payload)),
            }
        });
        let mut constraint = Self::from_async(validator);
        constraint.invocation_executor = Some(executor);
        constraint
    }

    /// Wrap a synchronous validator.
    #[must_use]
    pub fn from_sync(validator: impl Validator<T, E> + 'static) -> Self {
        Self::with_validator(Arc::new(SyncAdapter::new(validator)), ValidatorKind::Sync)
    }

    /// Wrap an asynchronous validator.
    #[must_use]
    pub fn from_async(validator: impl AsyncValidator<T, E> + 'static) -> Self {
        Self::with_validator(Arc::new(validator), ValidatorKind::Async)
    }

    fn with_validator(validator: Arc<dyn AsyncValidator<T, E>>, kind: ValidatorKind) -> Self {
        Self {
            validator,
            kind,
            dependencies: Vec::new(),
            invocation_executor: None,
            completion_executor: None,
            name: None,
        }
    }

    /// Add a dependency. Intended for chaining onto the shortcut constructors.
    #[must_use]
    pub fn with_dependency<D: Dependency + Clone + 'static>(mut self, dependency: &D) -> Self {
        self.dependencies.push(Arc::new(dependency.clone()));
        self
    }

    /// Set the executor that applies results.
    #[must_use]
    pub fn with_completion_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.completion_executor = Some(executor);
        self
    }

    /// Set a label used in log events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl<T, E> Constraint<T, E> {
    /// The validator, always in asynchronous form.
    #[must_use]
    pub fn validator(&self) -> &Arc<dyn AsyncValidator<T, E>> {
        &self.validator
    }

    /// Whether the validator was supplied as synchronous or asynchronous.
    #[must_use]
    pub const fn kind(&self) -> ValidatorKind {
        self.kind
    }

    /// Observables besides the constrained value that the validator reads.
    #[must_use]
    pub fn dependencies(&self) -> &[Arc<dyn Dependency>] {
        &self.dependencies
    }

    /// Where the validator is invoked, if not on the triggering thread.
    #[must_use]
    pub fn invocation_executor(&self) -> Option<&Arc<dyn Executor>> {
        self.invocation_executor.as_ref()
    }

    /// Where results are applied, if this constraint overrides the default.
    #[must_use]
    pub fn completion_executor(&self) -> Option<&Arc<dyn Executor>> {
        self.completion_executor.as_ref()
    }

    /// Label used in log events.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether `dependency` is one of this constraint's dependencies.
    #[must_use]
    pub fn is_dependency(&self, dependency: &dyn Dependency) -> bool {
        self.depends_on(dependency.observable_id())
    }

    /// Whether the observable with `id` is one of this constraint's
    /// dependencies.
    #[must_use]
    pub fn depends_on(&self, id: ObservableId) -> bool {
        self.dependencies.iter().any(|d| d.observable_id() == id)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`Constraint`].
pub struct ConstraintBuilder<T, E> {
    validator: Option<(Arc<dyn AsyncValidator<T, E>>, ValidatorKind)>,
    dependencies: Vec<Arc<dyn Dependency>>,
    invocation_executor: Option<Arc<dyn Executor>>,
    completion_executor: Option<Arc<dyn Executor>>,
    name: Option<String>,
}

impl<T, E> fmt::Debug for ConstraintBuilder<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintBuilder")
            .field("has_validator", &self.validator.is_some())
            .field("dependencies", &self.dependencies.len())
            .field("name", &self.name)
            .finish()
    }
}

impl<T, E> Default for ConstraintBuilder<T, E> {
    fn default() -> Self {
        Self {
            validator: None,
            dependencies: Vec::new(),
            invocation_executor: None,
            completion_executor: None,
            name: None,
        }
    }
}

impl<T, E> ConstraintBuilder<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a synchronous validator.
    #[must_use]
    pub fn validator(mut self, validator: impl Validator<T, E> + 'static) -> Self {
        self.validator = Some((Arc::new(SyncAdapter::new(validator)), ValidatorKind::Sync));
        self
    }

    /// Use a synchronous closure.
    #[must_use]
    pub fn validate(self, f: impl Fn(&T) -> ValidationResult<E> + Send + Sync + 'static) -> Self {
        self.validator(FnValidator(f))
    }

    /// Use an asynchronous validator.
    #[must_use]
    pub fn async_validator(mut self, validator: impl AsyncValidator<T, E> + 'static) -> Self {
        self.validator = Some((Arc::new(validator), ValidatorKind::Async));
        self
    }

    /// Add an observable the validator reads.
    #[must_use]
    pub fn dependency<D: Dependency + Clone + 'static>(mut self, dependency: &D) -> Self {
        self.dependencies.push(Arc::new(dependency.clone()));
        self
    }

    /// Add a type-erased dependency.
    #[must_use]
    pub fn dependency_arc(mut self, dependency: Arc<dyn Dependency>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Invoke the validator on `executor`.
    #[must_use]
    pub fn invocation_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.invocation_executor = Some(executor);
        self
    }

    /// Apply results on `executor`.
    #[must_use]
    pub fn completion_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.completion_executor = Some(executor);
        self
    }

    /// Label used in log events.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Finish the constraint.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::MissingValidator`] if no validator was set.
    pub fn build(self) -> Result<Constraint<T, E>, ConfigurationError> {
        let (validator, kind) = self.validator.ok_or(ConfigurationError::MissingValidator)?;
        Ok(Constraint {
            validator,
            kind,
            dependencies: self.dependencies,
            invocation_executor: self.invocation_executor,
            completion_executor: self.completion_executor,
            name: self.name,
        })
    }
}
