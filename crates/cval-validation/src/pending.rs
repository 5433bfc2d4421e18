#![forbid(unsafe_code)]

//! One-shot pending results.
//!
//! A [`Pending`] is the receiving half of a result that some validator will
//! produce later; the [`Completer`] is the producing half. The consumer
//! registers a single callback with [`Pending::on_complete`], which runs on
//! whichever thread resolves the pair:
//!
//! - already resolved: the callback runs immediately on the registering thread
//! - otherwise: it runs on the thread that calls [`Completer::complete`]
//!
//! Dropping a `Completer` without completing it resolves the pending with
//! [`ValidatorFailure::Abandoned`].

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use cval_core::Executor;
use cval_core::sync::lock;

use crate::error::ValidatorFailure;

type Callback<R> = Box<dyn FnOnce(Result<R, ValidatorFailure>) + Send>;

enum Slot<R> {
    /// Not resolved yet; holds the callback once one is registered.
    Waiting(Option<Callback<R>>),
    /// Resolved before a callback was registered.
    Resolved(Result<R, ValidatorFailure>),
    /// The result has been handed to the callback.
    Delivered,
}

struct Shared<R> {
    slot: Mutex<Slot<R>>,
}

/// A result that will be available later.
#[must_use = "a pending result does nothing until `on_complete` is called"]
pub struct Pending<R> {
    shared: Arc<Shared<R>>,
}

/// The producing half of a [`Pending`].
pub struct Completer<R> {
    shared: Option<Arc<Shared<R>>>,
}

impl<R> fmt::Debug for Pending<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<R> fmt::Debug for Completer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("spent", &self.shared.is_none())
            .finish()
    }
}

impl<R> Pending<R> {
    fn with_slot(slot: Slot<R>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(slot),
            }),
        }
    }

    /// Create a connected completer/pending pair.
    pub fn channel() -> (Completer<R>, Self) {
        let pending = Self::with_slot(Slot::Waiting(None));
        let completer = Completer {
            shared: Some(Arc::clone(&pending.shared)),
        };
        (completer, pending)
    }

    /// A pending that is already resolved with `value`.
    pub fn ready(value: R) -> Self {
        Self::with_slot(Slot::Resolved(Ok(value)))
    }

    /// A pending that is already resolved with `failure`.
    pub fn failed(failure: ValidatorFailure) -> Self {
        Self::with_slot(Slot::Resolved(Err(failure)))
    }

    /// Whether the result has been produced.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(*lock(&self.shared.slot), Slot::Waiting(_))
    }

    /// Register the callback that receives the result.
    pub fn on_complete(self, callback: impl FnOnce(Result<R, ValidatorFailure>) + Send + 'static) {
        let mut slot = lock(&self.shared.slot);
        match std::mem::replace(&mut *slot, Slot::Delivered) {
            Slot::Resolved(result) => {
                drop(slot);
                callback(result);
            }
            Slot::Waiting(_) => {
                *slot = Slot::Waiting(Some(Box::new(callback)));
            }
            Slot::Delivered => {}
        }
    }
}

impl<R: Send + 'static> Pending<R> {
    /// Run `work` on `executor` and resolve with its return value.
    ///
    /// A panic inside `work` resolves the pending with
    /// [`ValidatorFailure::Panicked`].
    pub fn spawn(
        executor: &dyn Executor,
        work: impl FnOnce() -> Result<R, ValidatorFailure> + Send + 'static,
    ) -> Self {
        let (completer, pending) = Self::channel();
        executor.execute(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|payload| Err(ValidatorFailure::from_panic(payload)));
            completer.resolve(result);
        }));
        pending
    }
}

impl<R> Completer<R> {
    /// Resolve with a value.
    pub fn complete(self, value: R) {
        self.resolve(Ok(value));
    }

    /// Resolve with a failure.
    pub fn fail(self, failure: ValidatorFailure) {
        self.resolve(Err(failure));
    }

    /// Resolve with either outcome.
    pub fn resolve(mut self, result: Result<R, ValidatorFailure>) {
        self.settle(result);
    }

    fn settle(&mut self, result: Result<R, ValidatorFailure>) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let mut slot = lock(&shared.slot);
        match std::mem::replace(&mut *slot, Slot::Delivered) {
            Slot::Waiting(Some(callback)) => {
                drop(slot);
                callback(result);
            }
            Slot::Waiting(None) => {
                *slot = Slot::Resolved(result);
            }
            previous @ (Slot::Resolved(_) | Slot::Delivered) => {
                *slot = previous;
            }
        }
    }
}

impl<R> Drop for Completer<R> {
    fn drop(&mut self) {
        self.settle(Err(ValidatorFailure::Abandoned));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cval_core::QueueExecutor;

    fn capture<R: Send + 'static>(
        pending: Pending<R>,
    ) -> Arc<Mutex<Option<Result<R, ValidatorFailure>>>> {
        let out = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&out);
        pending.on_complete(move |r| *sink.lock().unwrap() = Some(r));
        out
    }

    #[test]
    fn ready_delivers_immediately() {
        let out = capture(Pending::ready(5));
        assert_eq!(*out.lock().unwrap(), Some(Ok(5)));
    }

    #[test]
    fn failed_delivers_failure() {
        let out = capture(Pending::<u8>::failed(ValidatorFailure::error("x")));
        assert_eq!(
            *out.lock().unwrap(),
            Some(Err(ValidatorFailure::Error("x".into())))
        );
    }

    #[test]
    fn complete_after_registration() {
        let (completer, pending) = Pending::channel();
        assert!(!pending.is_resolved());
        let out = capture(pending);
        assert!(out.lock().unwrap().is_none());
        completer.complete("done");
        assert_eq!(*out.lock().unwrap(), Some(Ok("done")));
    }

    #[test]
    fn complete_before_registration() {
        let (completer, pending) = Pending::channel();
        completer.complete(1);
        assert!(pending.is_resolved());
        let out = capture(pending);
        assert_eq!(*out.lock().unwrap(), Some(Ok(1)));
    }

    #[test]
    fn dropped_completer_abandons() {
        let (completer, pending) = Pending::<u8>::channel();
        let out = capture(pending);
        drop(completer);
        assert_eq!(*out.lock().unwrap(), Some(Err(ValidatorFailure::Abandoned)));
    }

    #[test]
    fn spawn_runs_on_executor() {
        let queue = QueueExecutor::new();
        let out = capture(Pending::spawn(&queue, || Ok(3)));
        assert!(out.lock().unwrap().is_none());
        queue.run_pending();
        assert_eq!(*out.lock().unwrap(), Some(Ok(3)));
    }

    fn panicking_work() -> Result<u8, ValidatorFailure> {
        panic!("kaboom")
    }

    #[test]
    fn spawn_catches_panics() {
        let queue = QueueExecutor::new();
        let out = capture(Pending::spawn(&queue, panicking_work));
        queue.run_pending();
        assert_eq!(
            *out.lock().unwrap(),
            Some(Err(ValidatorFailure::Panicked("kaboom".into())))
        );
    }
}
