#![forbid(unsafe_code)]

//! Shared, version-tracked values with change notification.
//!
//! # Design
//!
//! [`Observable<T>`] wraps a value in `Arc<Mutex<..>>` so that handles can be
//! cloned across threads (validators may read dependency values from a worker
//! pool). Every observable has an [`ObservableId`] assigned at creation;
//! clones share the id, so identity comparisons never look at the value.
//!
//! Subscribers are registered with [`Observable::subscribe`], which returns a
//! [`Subscription`] guard. Dropping the guard (or calling
//! [`Subscription::unsubscribe`]) removes the callback. No weak-listener
//! bookkeeping is involved.
//!
//! # Invariants
//!
//! 1. `version` increments exactly once per notifying mutation.
//! 2. Subscribers are notified in registration order.
//! 3. `set` with a value equal to the current one is a no-op.
//! 4. No internal lock is held while subscriber callbacks run, so callbacks
//!    may freely read or mutate the same observable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::sync::lock;

static NEXT_OBSERVABLE_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// ObservableId
// ---------------------------------------------------------------------------

/// Identity of an observable value.
///
/// Two distinct observables holding equal values have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObservableId(u64);

impl ObservableId {
    fn next() -> Self {
        Self(NEXT_OBSERVABLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObservableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observable#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Guard for a registered callback. The callback is removed on drop.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Build a subscription from a detach function.
    ///
    /// The function runs exactly once, on [`unsubscribe`](Self::unsubscribe)
    /// or drop.
    pub fn from_fn(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A subscription that detaches nothing.
    pub fn empty() -> Self {
        Self { detach: None }
    }

    /// Remove the callback now.
    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Observable
// ---------------------------------------------------------------------------

type Callback<T> = dyn Fn(&T) + Send + Sync;

struct Subscriber<T> {
    id: u64,
    callback: Arc<Callback<T>>,
}

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Subscriber<T>>,
    next_subscriber: u64,
}

/// A shared, version-tracked value with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** value.
pub struct Observable<T> {
    id: ObservableId,
    inner: Arc<Mutex<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Observable")
            .field("id", &self.id)
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Default + Send + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Observable<T> {
    /// Identity of this observable (shared by all clones).
    #[must_use]
    pub fn id(&self) -> ObservableId {
        self.id
    }

    /// Whether `other` is a handle to the same observable.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Create a new observable holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            id: ObservableId::next(),
            inner: Arc::new(Mutex::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
                next_subscriber: 0,
            })),
        }
    }

    /// Access the current value by reference.
    ///
    /// The closure runs while the value is locked; it must not call back into
    /// this observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.inner).value)
    }

    /// Number of notifying mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        lock(&self.inner).version
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    /// Register a callback invoked with the new value after every change.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_subscriber;
            inner.next_subscriber += 1;
            inner.subscribers.push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
            id
        };

        let weak: Weak<Mutex<ObservableInner<T>>> = Arc::downgrade(&self.inner);
        Subscription::from_fn(move || {
            if let Some(strong) = weak.upgrade() {
                lock(&strong).subscribers.retain(|s| s.id != id);
            }
        })
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        lock(&self.inner).value.clone()
    }

    /// Get a clone of the current value together with its version, read
    /// under one lock.
    #[must_use]
    pub fn get_versioned(&self) -> (T, u64) {
        let inner = lock(&self.inner);
        (inner.value.clone(), inner.version)
    }

    /// Mutate the value in place and notify subscribers unconditionally.
    ///
    /// This is the content-change channel for collection values, where
    /// comparing the old and new value would be wasteful.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let (snapshot, callbacks) = {
            let mut inner = lock(&self.inner);
            f(&mut inner.value);
            inner.version += 1;
            Self::snapshot(&inner)
        };
        Self::dispatch(&snapshot, &callbacks);
    }

    fn snapshot(inner: &ObservableInner<T>) -> (T, Vec<Arc<Callback<T>>>) {
        let callbacks = inner
            .subscribers
            .iter()
            .map(|s| Arc::clone(&s.callback))
            .collect();
        (inner.value.clone(), callbacks)
    }

    fn dispatch(value: &T, callbacks: &[Arc<Callback<T>>]) {
        for callback in callbacks {
            callback(value);
        }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Observable<T> {
    /// Replace the value, notifying subscribers if it changed.
    ///
    /// Returns `true` if the value changed.
    pub fn set(&self, value: T) -> bool {
        let (snapshot, callbacks) = {
            let mut inner = lock(&self.inner);
            if inner.value == value {
                return false;
            }
            inner.value = value;
            inner.version += 1;
            Self::snapshot(&inner)
        };
        Self::dispatch(&snapshot, &callbacks);
        true
    }
}

// ---------------------------------------------------------------------------
// Dependency
// ---------------------------------------------------------------------------

/// A type-erased observable that can invalidate something else.
///
/// Constraints hold their dependencies as `Arc<dyn Dependency>`; identity is
/// decided by [`Dependency::observable_id`].
pub trait Dependency: Send + Sync {
    /// Identity of the underlying observable.
    fn observable_id(&self) -> ObservableId;

    /// Invoke `on_invalidated` whenever the observable changes.
    fn watch(&self, on_invalidated: Arc<dyn Fn() + Send + Sync>) -> Subscription;
}

impl<T: Send + 'static> Dependency for Observable<T> {
    fn observable_id(&self) -> ObservableId {
        self.id
    }

    fn watch(&self, on_invalidated: Arc<dyn Fn() + Send + Sync>) -> Subscription {
        self.subscribe(move |_| on_invalidated())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
