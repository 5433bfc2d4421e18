#![forbid(unsafe_code)]

//! Validator traits and adapters.
//!
//! The engine only speaks [`AsyncValidator`]. Synchronous [`Validator`]s are
//! wrapped in a [`SyncAdapter`], which turns each call into an already
//! resolved [`Pending`].

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ValidatorFailure;
use crate::pending::Pending;
use crate::result::ValidationResult;

// ---------------------------------------------------------------------------
// CancellationToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation signal handed to every validator invocation.
///
/// The engine cancels the token when a newer round supersedes the
/// invocation. Validators may poll it to stop early; a result produced after
/// cancellation is discarded as stale either way.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A synchronous check of a value.
pub trait Validator<T, E>: Send + Sync {
    /// Check `value`. An `Err` marks the constraint invalid without a
    /// diagnostic.
    fn validate(&self, value: &T) -> Result<ValidationResult<E>, ValidatorFailure>;
}

/// A check whose result may arrive later, on any thread.
pub trait AsyncValidator<T, E>: Send + Sync {
    /// Start checking `value`.
    fn validate(&self, value: T, cancel: CancellationToken) -> Pending<ValidationResult<E>>;
}

// ---------------------------------------------------------------------------
// Closure validators
// ---------------------------------------------------------------------------

/// A [`Validator`] from an infallible closure.
pub struct FnValidator<F>(pub F);

impl<F> fmt::Debug for FnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnValidator")
    }
}

impl<T, E, F> Validator<T, E> for FnValidator<F>
where
    F: Fn(&T) -> ValidationResult<E> + Send + Sync,
{
    fn validate(&self, value: &T) -> Result<ValidationResult<E>, ValidatorFailure> {
        Ok((self.0)(value))
    }
}

/// A [`Validator`] from a fallible closure.
pub struct TryFnValidator<F>(pub F);

impl<F> fmt::Debug for TryFnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TryFnValidator")
    }
}

impl<T, E, F> Validator<T, E> for TryFnValidator<F>
where
    F: Fn(&T) -> Result<ValidationResult<E>, ValidatorFailure> + Send + Sync,
{
    fn validate(&self, value: &T) -> Result<ValidationResult<E>, ValidatorFailure> {
        (self.0)(value)
    }
}

/// An [`AsyncValidator`] from a closure returning a [`Pending`].
pub struct FnAsyncValidator<F>(pub F);

impl<F> fmt::Debug for FnAsyncValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnAsyncValidator")
    }
}

impl<T, E, F> AsyncValidator<T, E> for FnAsyncValidator<F>
where
    F: Fn(T, CancellationToken) -> Pending<ValidationResult<E>> + Send + Sync,
{
    fn validate(&self, value: T, cancel: CancellationToken) -> Pending<ValidationResult<E>> {
        (self.0)(value, cancel)
    }
}

// ---------------------------------------------------------------------------
// SyncAdapter
// ---------------------------------------------------------------------------

/// Presents a [`Validator`] as an [`AsyncValidator`].
///
/// Panics in the wrapped validator become [`ValidatorFailure::Panicked`].
#[derive(Debug)]
pub struct SyncAdapter<V> {
    inner: V,
}

impl<V> SyncAdapter<V> {
    /// Wrap `inner`.
    pub const fn new(inner: V) -> Self {
        Self { inner }
    }

    /// The wrapped validator.
    pub const fn inner(&self) -> &V {
        &self.inner
    }
}

impl<T, E, V> AsyncValidator<T, E> for SyncAdapter<V>
where
    V: Validator<T, E>,
{
    fn validate(&self, value: T, _cancel: CancellationToken) -> Pending<ValidationResult<E>> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.inner.validate(&value)))
            .unwrap_or_else(|payload| Err(ValidatorFailure::from_panic(payload)));
        match outcome {
            Ok(result) => Pending::ready(result),
            Err(failure) => Pending::failed(failure),
        }
    }
}
