#![forbid(unsafe_code)]

//! Lock helpers shared by the cval crates.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Internal state in cval is only mutated in short critical sections that
/// never call user code, so a poisoned lock still guards consistent data.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
