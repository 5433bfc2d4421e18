#![forbid(unsafe_code)]

//! Constrained properties.
//!
//! A [`ConstrainedProperty`] owns an [`Observable`] value together with the
//! [`ValidationHelper`] that validates it. Writes go through the property;
//! validation state is read from it or from a read-only [`ConstrainedView`].
//!
//! ```
//! use cval_validation::{ConstrainedProperty, constraints};
//!
//! let age = ConstrainedProperty::<i32, &str>::new(
//!     30,
//!     [constraints::between_with(0, 150, |_| "out of range")],
//! );
//! assert!(age.is_valid());
//!
//! age.set(200);
//! assert_eq!(age.errors(), vec!["out of range"]);
//! assert_eq!(age.constrained_value(), Some(30));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cval_core::{Observable, Subscription};

use crate::config::HelperConfig;
use crate::constraint::Constraint;
use crate::diagnostics::DiagnosticList;
use crate::helper::ValidationHelper;

/// A value with constraints.
pub struct ConstrainedProperty<T, E> {
    value: Observable<T>,
    helper: ValidationHelper<T, E>,
    bindings: Arc<AtomicUsize>,
}

impl<T: fmt::Debug, E> fmt::Debug for ConstrainedProperty<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstrainedProperty")
            .field("value", &self.value)
            .field("helper", &self.helper)
            .field("bindings", &self.bindings.load(Ordering::Acquire))
            .finish()
    }
}

impl<T, E> ConstrainedProperty<T, E>
where
    T: Clone + PartialEq + Send + 'static,
    E: Clone + PartialEq + Send + 'static,
{
    /// Create a property with the default configuration.
    pub fn new(initial: T, constraints: impl IntoIterator<Item = Constraint<T, E>>) -> Self {
        Self::with_config(initial, constraints, HelperConfig::default())
    }

    /// Create a property.
    pub fn with_config(
        initial: T,
        constraints: impl IntoIterator<Item = Constraint<T, E>>,
        config: HelperConfig,
    ) -> Self {
        let value = Observable::new(initial);
        let helper = ValidationHelper::with_config(&value, constraints, config);
        Self {
            value,
            helper,
            bindings: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.value.get()
    }

    /// Replace the value. Returns `false` if it was equal to the current one,
    /// in which case no round starts.
    pub fn set(&self, value: T) -> bool {
        self.value.set(value)
    }

    /// Mutate the value in place and revalidate.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.value.update(f);
    }

    /// Follow `source`: copy its value now and on every change.
    ///
    /// The link lasts until the returned [`Binding`] is dropped or
    /// [`Binding::unbind`] is called.
    pub fn bind(&self, source: &Observable<T>) -> Binding {
        self.value.set(source.get());
        let target = self.value.clone();
        let subscription = source.subscribe(move |v| {
            target.set(v.clone());
        });
        self.bindings.fetch_add(1, Ordering::AcqRel);
        Binding {
            subscription: Some(subscription),
            bindings: Arc::clone(&self.bindings),
        }
    }

    /// Record whether the user has interacted with the value.
    pub fn set_user_interacted(&self, interacted: bool) {
        self.helper.set_user_interacted(interacted);
    }

    /// A read-only handle.
    #[must_use]
    pub fn view(&self) -> ConstrainedView<T, E> {
        ConstrainedView {
            value: self.value.clone(),
            helper: self.helper.clone(),
        }
    }
}

impl<T, E> ConstrainedProperty<T, E>
where
    T: Clone,
    E: Clone,
{
    /// The underlying observable.
    #[must_use]
    pub fn value_observable(&self) -> &Observable<T> {
        &self.value
    }

    /// The validation engine.
    #[must_use]
    pub fn helper(&self) -> &ValidationHelper<T, E> {
        &self.helper
    }

    /// Whether a [`Binding`] currently drives the value.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bindings.load(Ordering::Acquire) > 0
    }

    /// See [`ValidationHelper::is_valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.helper.is_valid()
    }

    /// See [`ValidationHelper::is_invalid`].
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.helper.is_invalid()
    }

    /// See [`ValidationHelper::is_validating`].
    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.helper.is_validating()
    }

    /// See [`ValidationHelper::errors`].
    #[must_use]
    pub fn errors(&self) -> Vec<E> {
        self.helper.errors()
    }

    /// See [`ValidationHelper::warnings`].
    #[must_use]
    pub fn warnings(&self) -> Vec<E> {
        self.helper.warnings()
    }

    /// See [`ValidationHelper::constrained_value`].
    #[must_use]
    pub fn constrained_value(&self) -> Option<T> {
        self.helper.constrained_value()
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Keeps a property following its source.
#[must_use = "dropping a Binding immediately unbinds"]
pub struct Binding {
    subscription: Option<Subscription>,
    bindings: Arc<AtomicUsize>,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("active", &self.subscription.is_some())
            .finish()
    }
}

impl Binding {
    /// Stop following the source.
    pub fn unbind(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            self.bindings.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// ConstrainedView
// ---------------------------------------------------------------------------

/// Read-only access to a constrained value and its validation state.
pub struct ConstrainedView<T, E> {
    value: Observable<T>,
    helper: ValidationHelper<T, E>,
}

impl<T, E> Clone for ConstrainedView<T, E> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            helper: self.helper.clone(),
        }
    }
}

impl<T: fmt::Debug, E> fmt::Debug for ConstrainedView<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstrainedView")
            .field("value", &self.value)
            .finish()
    }
}

impl<T, E> ConstrainedView<T, E>
where
    T: Clone + Send + 'static,
    E: Clone,
{
    /// The current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.value.get()
    }

    /// Observe value changes.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.value.subscribe(callback)
    }

    /// The validation engine.
    #[must_use]
    pub fn helper(&self) -> &ValidationHelper<T, E> {
        &self.helper
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.helper.is_valid()
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.helper.is_invalid()
    }

    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.helper.is_validating()
    }

    #[must_use]
    pub fn is_user_valid(&self) -> bool {
        self.helper.is_user_valid()
    }

    #[must_use]
    pub fn is_user_invalid(&self) -> bool {
        self.helper.is_user_invalid()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<E> {
        self.helper.errors()
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<E> {
        self.helper.warnings()
    }

    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticList<E> {
        self.helper.diagnostics()
    }

    #[must_use]
    pub fn constrained_value(&self) -> Option<T> {
        self.helper.constrained_value()
    }
}
