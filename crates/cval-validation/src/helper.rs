#![forbid(unsafe_code)]

//! The validation engine.
//!
//! A [`ValidationHelper`] watches one constrained [`Observable`] plus every
//! dependency its constraints declare. Each change starts a *round*:
//!
//! - a value change (or content change) re-invokes every constraint
//! - a dependency change re-invokes only the constraints that declare it
//!
//! # Slots and generations
//!
//! Every constraint owns a slot that remembers the [`Generation`] of its
//! latest invocation and whether that invocation is still in flight. A
//! result is applied only if its generation equals the slot's and the slot
//! is still waiting, so superseded results are discarded and a second
//! delivery of the same result is ignored. A dependency round leaves the
//! other slots untouched, including their in-flight invocations, unless the
//! value changed since the previous round; then it re-runs every slot.
//!
//! # Aggregate state
//!
//! | Flag         | Set when                                              |
//! |--------------|-------------------------------------------------------|
//! | `VALID`      | every slot completed and none failed                  |
//! | `INVALID`    | at least one completed slot failed                    |
//! | `VALIDATING` | at least one slot is in flight                        |
//!
//! `VALID` and `INVALID` are never set together. A helper without
//! constraints is always valid. Before the first round the flags come from
//! [`HelperConfig::initial_state`].
//!
//! # Notification
//!
//! State is guarded by a mutex that is never held while validators,
//! executors, observers or listeners run. Starting a round opens a batch;
//! results that arrive while the batch is open (synchronous validators) are
//! folded into a single publication when it closes. Each publication is
//! numbered, and an outer publication interrupted by a reentrant one stops
//! as soon as it notices it is no longer the latest.

use std::collections::HashSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use bitflags::bitflags;
use cval_core::sync::lock;
use cval_core::{Dependency, Executor, Observable, Subscription, Task};

use crate::config::HelperConfig;
use crate::constraint::Constraint;
use crate::diagnostics::DiagnosticList;
use crate::error::ValidatorFailure;
use crate::pending::Pending;
use crate::result::{ValidationResult, ValidationState};
use crate::trace::{Generation, RoundCause, TraceRecorder, ValidationEvent, ValidationTrace};
use crate::validator::CancellationToken;

// ---------------------------------------------------------------------------
// Flags and change events
// ---------------------------------------------------------------------------

bitflags! {
    /// Aggregate validation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StateFlags: u8 {
        const VALID = 1 << 0;
        const INVALID = 1 << 1;
        const VALIDATING = 1 << 2;
    }
}

impl StateFlags {
    fn from_state(state: ValidationState) -> Self {
        match state {
            ValidationState::Unknown => Self::empty(),
            ValidationState::Valid => Self::VALID,
            ValidationState::Invalid => Self::INVALID,
        }
    }

    /// Collapse to the coarse state.
    #[must_use]
    pub fn state(self) -> ValidationState {
        if self.contains(Self::VALID) {
            ValidationState::Valid
        } else if self.contains(Self::INVALID) {
            ValidationState::Invalid
        } else {
            ValidationState::Unknown
        }
    }
}

/// Which aggregate flag changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Valid,
    Invalid,
    Validating,
}

impl ChangeKind {
    /// Every kind, in notification order.
    pub const ALL: [Self; 3] = [Self::Valid, Self::Invalid, Self::Validating];

    /// The flag this kind tracks.
    #[must_use]
    pub const fn flag(self) -> StateFlags {
        match self {
            Self::Valid => StateFlags::VALID,
            Self::Invalid => StateFlags::INVALID,
            Self::Validating => StateFlags::VALIDATING,
        }
    }
}

/// A transition of one aggregate flag, delivered to change listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidationChange {
    pub kind: ChangeKind,
    pub old: bool,
    pub new: bool,
}

type ChangeListener = Arc<dyn Fn(ValidationChange) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, ChangeListener)>,
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SlotStatus {
    #[default]
    Idle,
    Invoked,
    Completed,
}

#[derive(Debug, Default)]
struct Slot {
    generation: Generation,
    status: SlotStatus,
    passed: bool,
    cancel: Option<CancellationToken>,
}

struct HelperState<T, E> {
    generation: Generation,
    slots: Vec<Slot>,
    diagnostics: DiagnosticList<E>,
    /// Value read by the latest round.
    round_value: Option<T>,
    /// Version of `round_value` in the value observable.
    round_version: Option<u64>,
    constrained_value: Option<T>,
    started: bool,
    initial: ValidationState,
    user_interacted: bool,
    batch_depth: u32,
    publish_seq: u64,
    /// Thread currently delivering notifications.
    publisher: Option<ThreadId>,
    /// Another thread asked for a publication while one was running.
    republish: bool,
    /// Flags as last delivered to change listeners.
    published: StateFlags,
    recorder: Option<TraceRecorder>,
}

impl<T, E> HelperState<T, E> {
    fn flags(&self) -> StateFlags {
        if self.slots.is_empty() {
            return StateFlags::VALID;
        }
        if !self.started {
            return StateFlags::from_state(self.initial);
        }

        let mut flags = StateFlags::empty();
        let mut complete = true;
        for slot in &self.slots {
            match slot.status {
                SlotStatus::Idle => complete = false,
                SlotStatus::Invoked => {
                    complete = false;
                    flags |= StateFlags::VALIDATING;
                }
                SlotStatus::Completed => {
                    if !slot.passed {
                        flags |= StateFlags::INVALID;
                    }
                }
            }
        }
        if complete && !flags.contains(StateFlags::INVALID) {
            flags |= StateFlags::VALID;
        }
        flags
    }

    fn all_passed(&self) -> bool {
        self.slots
            .iter()
            .all(|s| s.status == SlotStatus::Completed && s.passed)
    }

    fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::Invoked)
            .count()
    }

    fn record(&mut self, event: impl FnOnce(u64) -> ValidationEvent) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(event);
        }
    }
}

struct Outputs<T, E> {
    valid: Observable<bool>,
    invalid: Observable<bool>,
    validating: Observable<bool>,
    user_valid: Observable<bool>,
    user_invalid: Observable<bool>,
    errors: Observable<Vec<E>>,
    warnings: Observable<Vec<E>>,
    constrained_value: Observable<Option<T>>,
}

impl<T, E> Outputs<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn new(flags: StateFlags) -> Self {
        Self {
            valid: Observable::new(flags.contains(StateFlags::VALID)),
            invalid: Observable::new(flags.contains(StateFlags::INVALID)),
            validating: Observable::new(flags.contains(StateFlags::VALIDATING)),
            user_valid: Observable::new(false),
            user_invalid: Observable::new(false),
            errors: Observable::new(Vec::new()),
            warnings: Observable::new(Vec::new()),
            constrained_value: Observable::new(None),
        }
    }
}

struct Snapshot<T, E> {
    flags: StateFlags,
    user_interacted: bool,
    errors: Vec<E>,
    warnings: Vec<E>,
    constrained_value: Option<T>,
}

/// Releases publisher ownership if a listener panics mid-publication.
struct PublisherGuard<'a, T, E> {
    state: &'a Mutex<HelperState<T, E>>,
}

impl<T, E> Drop for PublisherGuard<'_, T, E> {
    fn drop(&mut self) {
        if thread::panicking() {
            lock(self.state).publisher = None;
        }
    }
}

struct HelperInner<T, E> {
    value: Observable<T>,
    constraints: Vec<Constraint<T, E>>,
    completion_executor: Option<Arc<dyn Executor>>,
    state: Mutex<HelperState<T, E>>,
    outputs: Outputs<T, E>,
    listeners: Mutex<Listeners>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<T, E> Drop for HelperInner<T, E> {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for slot in &mut state.slots {
            if let Some(cancel) = slot.cancel.take() {
                cancel.cancel();
            }
        }
    }
}

impl<T, E> HelperInner<T, E>
where
    T: Clone + PartialEq + Send + 'static,
    E: Clone + PartialEq + Send + 'static,
{
    fn start_round(self: &Arc<Self>, cause: RoundCause) {
        let claimed: Vec<usize> = match cause {
            RoundCause::Dependency(id) => self
                .constraints
                .iter()
                .enumerate()
                .filter(|(_, c)| c.depends_on(id))
                .map(|(index, _)| index)
                .collect(),
            _ => (0..self.constraints.len()).collect(),
        };
        if claimed.is_empty() && !cause.is_full() {
            return;
        }

        let (generation, cause, value, invocations) = {
            let mut state = lock(&self.state);
            let (value, version) = self.value.get_versioned();
            // Outcomes retained by a partial round must belong to this value.
            let (cause, selected): (RoundCause, Vec<usize>) =
                if !cause.is_full() && state.round_version != Some(version) {
                    tracing::trace!(
                        cause = ?cause,
                        version,
                        "value moved since the last round; validating everything"
                    );
                    (RoundCause::ValueChanged, (0..self.constraints.len()).collect())
                } else {
                    (cause, claimed)
                };
            let generation = state.generation.next();
            state.generation = generation;
            state.started = true;
            state.batch_depth += 1;
            state.round_value = Some(value.clone());
            state.round_version = Some(version);
            let count = selected.len();
            state.record(|elapsed_ns| ValidationEvent::RoundStarted {
                generation,
                cause,
                constraints: count,
                elapsed_ns,
            });

            let mut invocations = Vec::with_capacity(count);
            for &index in &selected {
                let slot = &mut state.slots[index];
                let superseded = (slot.status == SlotStatus::Invoked).then_some(slot.generation);
                if let Some(previous) = slot.cancel.take() {
                    previous.cancel();
                }
                let cancel = CancellationToken::new();
                *slot = Slot {
                    generation,
                    status: SlotStatus::Invoked,
                    passed: false,
                    cancel: Some(cancel.clone()),
                };
                state.diagnostics.clear(index);

                if let Some(previous) = superseded {
                    tracing::trace!(
                        constraint = index,
                        generation = previous.raw(),
                        superseded_by = generation.raw(),
                        "validator invocation superseded"
                    );
                    state.record(|elapsed_ns| ValidationEvent::Superseded {
                        generation: previous,
                        constraint: index,
                        superseded_by: generation,
                        elapsed_ns,
                    });
                }
                state.record(|elapsed_ns| ValidationEvent::Invoked {
                    generation,
                    constraint: index,
                    elapsed_ns,
                });
                invocations.push((index, cancel));
            }

            if self.constraints.is_empty() {
                state.constrained_value = Some(value.clone());
                state.record(|elapsed_ns| ValidationEvent::ConstrainedValueApplied {
                    generation,
                    elapsed_ns,
                });
            }
            (generation, cause, value, invocations)
        };

        tracing::debug!(
            generation = generation.raw(),
            cause = ?cause,
            constraints = invocations.len(),
            "validation round started"
        );

        for (index, cancel) in invocations {
            self.invoke(index, generation, value.clone(), cancel);
        }
        self.end_batch();
    }

    fn invoke(
        self: &Arc<Self>,
        index: usize,
        generation: Generation,
        value: T,
        cancel: CancellationToken,
    ) {
        let constraint = &self.constraints[index];
        let validator = Arc::clone(constraint.validator());
        let completion = constraint
            .completion_executor()
            .or(self.completion_executor.as_ref())
            .cloned();
        let weak = Arc::downgrade(self);

        let task: Task = Box::new(move || {
            let pending = catch_unwind(AssertUnwindSafe(|| validator.validate(value, cancel)))
                .unwrap_or_else(|payload| Pending::failed(ValidatorFailure::from_panic(payload)));
            pending.on_complete(move |result| {
                let apply: Task = Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.complete(index, generation, result);
                    }
                });
                match completion {
                    Some(executor) => executor.execute(apply),
                    None => apply(),
                }
            });
        });

        match constraint.invocation_executor() {
            Some(executor) => executor.execute(task),
            None => task(),
        }
    }

    fn complete(
        &self,
        index: usize,
        generation: Generation,
        result: Result<ValidationResult<E>, ValidatorFailure>,
    ) {
        let (valid, info, failure) = match result {
            Ok(result) => {
                let (valid, info) = result.into_parts();
                (valid, info, None)
            }
            Err(failure) => (false, None, Some(failure)),
        };

        let publish = {
            let mut state = lock(&self.state);
            state.record(|elapsed_ns| ValidationEvent::Completed {
                generation,
                constraint: index,
                is_valid: valid,
                elapsed_ns,
            });

            let slot = &mut state.slots[index];
            if slot.generation != generation {
                let current = slot.generation;
                tracing::trace!(
                    constraint = index,
                    generation = generation.raw(),
                    current = current.raw(),
                    "discarding stale validation result"
                );
                state.record(|elapsed_ns| ValidationEvent::StaleDiscarded {
                    generation,
                    constraint: index,
                    current,
                    elapsed_ns,
                });
                return;
            }
            if slot.status != SlotStatus::Invoked {
                state.record(|elapsed_ns| ValidationEvent::DuplicateIgnored {
                    generation,
                    constraint: index,
                    elapsed_ns,
                });
                return;
            }

            slot.status = SlotStatus::Completed;
            slot.passed = valid;
            slot.cancel = None;
            match info {
                Some(info) => state.diagnostics.set(index, info, valid),
                None => {
                    state.diagnostics.clear(index);
                }
            }
            state.record(|elapsed_ns| ValidationEvent::Applied {
                generation,
                constraint: index,
                is_valid: valid,
                elapsed_ns,
            });

            if state.all_passed() {
                state.constrained_value = state.round_value.clone();
                state.record(|elapsed_ns| ValidationEvent::ConstrainedValueApplied {
                    generation,
                    elapsed_ns,
                });
                tracing::debug!(generation = generation.raw(), "constrained value applied");
            }
            state.batch_depth == 0
        };

        if let Some(failure) = failure {
            tracing::error!(
                constraint = index,
                constraint_name = self.constraints[index].name().unwrap_or_default(),
                generation = generation.raw(),
                error = %failure,
                "constraint validator failed"
            );
        }
        if publish {
            self.publish();
        }
    }

    fn end_batch(&self) {
        let publish = {
            let mut state = lock(&self.state);
            state.batch_depth = state.batch_depth.saturating_sub(1);
            state.batch_depth == 0
        };
        if publish {
            self.publish();
        }
    }

    fn is_current(&self, seq: u64) -> bool {
        lock(&self.state).publish_seq == seq
    }

    /// Deliver the current state to observers and listeners.
    ///
    /// One thread publishes at a time. A request from another thread while a
    /// publication is running makes the running publisher go around again.
    fn publish(&self) {
        let me = thread::current().id();
        let nested = {
            let mut state = lock(&self.state);
            match state.publisher {
                Some(owner) if owner != me => {
                    state.republish = true;
                    return;
                }
                Some(_) => true,
                None => {
                    state.publisher = Some(me);
                    false
                }
            }
        };
        if nested {
            self.publish_once();
            return;
        }

        let _guard = PublisherGuard { state: &self.state };
        loop {
            self.publish_once();
            let mut state = lock(&self.state);
            if !std::mem::take(&mut state.republish) {
                state.publisher = None;
                break;
            }
        }
    }

    fn publish_once(&self) {
        let (seq, snapshot) = {
            let mut state = lock(&self.state);
            state.publish_seq += 1;
            let snapshot = Snapshot {
                flags: state.flags(),
                user_interacted: state.user_interacted,
                errors: state.diagnostics.errors().cloned().collect(),
                warnings: state.diagnostics.warnings().cloned().collect(),
                constrained_value: state.constrained_value.clone(),
            };
            (state.publish_seq, snapshot)
        };

        let Snapshot {
            flags,
            user_interacted,
            errors,
            warnings,
            constrained_value,
        } = snapshot;
        let valid = flags.contains(StateFlags::VALID);
        let invalid = flags.contains(StateFlags::INVALID);
        let outputs = &self.outputs;

        let steps: Vec<Box<dyn FnOnce() + '_>> = vec![
            Box::new(|| {
                outputs.errors.set(errors);
            }),
            Box::new(|| {
                outputs.warnings.set(warnings);
            }),
            Box::new(|| {
                outputs
                    .validating
                    .set(flags.contains(StateFlags::VALIDATING));
            }),
            Box::new(|| {
                outputs.valid.set(valid);
            }),
            Box::new(|| {
                outputs.invalid.set(invalid);
            }),
            Box::new(|| {
                outputs.user_valid.set(user_interacted && valid);
            }),
            Box::new(|| {
                outputs.user_invalid.set(user_interacted && invalid);
            }),
            Box::new(|| {
                outputs.constrained_value.set(constrained_value);
            }),
        ];
        for step in steps {
            if !self.is_current(seq) {
                return;
            }
            step();
        }

        for kind in ChangeKind::ALL {
            let change = {
                let mut state = lock(&self.state);
                if state.publish_seq != seq {
                    return;
                }
                let old = state.published.contains(kind.flag());
                let new = flags.contains(kind.flag());
                (old != new).then(|| {
                    state.published.set(kind.flag(), new);
                    ValidationChange { kind, old, new }
                })
            };
            if let Some(change) = change {
                self.notify_listeners(change);
            }
        }
    }

    fn notify_listeners(&self, change: ValidationChange) {
        let listeners: Vec<ChangeListener> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }

    fn set_user_interacted(&self, interacted: bool) {
        let publish = {
            let mut state = lock(&self.state);
            if state.user_interacted == interacted {
                return;
            }
            state.user_interacted = interacted;
            state.batch_depth == 0
        };
        if publish {
            self.publish();
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationHelper
// ---------------------------------------------------------------------------

/// Validates an observable value against a list of constraints.
///
/// Cloning creates another handle to the same engine. The engine detaches
/// from the value and its dependencies, and cancels in-flight invocations,
/// when the last handle is dropped.
pub struct ValidationHelper<T, E> {
    inner: Arc<HelperInner<T, E>>,
}

impl<T, E> Clone for ValidationHelper<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for ValidationHelper<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ValidationHelper")
            .field("value", &self.inner.value.id())
            .field("constraints", &self.inner.constraints.len())
            .field("generation", &state.generation)
            .field("flags", &state.flags())
            .field("in_flight", &state.in_flight())
            .finish()
    }
}

impl<T, E> ValidationHelper<T, E>
where
    T: Clone + PartialEq + Send + 'static,
    E: Clone + PartialEq + Send + 'static,
{
    /// Validate `value` against `constraints` with the default configuration.
    pub fn new(
        value: &Observable<T>,
        constraints: impl IntoIterator<Item = Constraint<T, E>>,
    ) -> Self {
        Self::with_config(value, constraints, HelperConfig::default())
    }

    /// Validate `value` against `constraints`.
    pub fn with_config(
        value: &Observable<T>,
        constraints: impl IntoIterator<Item = Constraint<T, E>>,
        config: HelperConfig,
    ) -> Self {
        let constraints: Vec<Constraint<T, E>> = constraints.into_iter().collect();
        let mut state = HelperState {
            generation: Generation::NONE,
            slots: constraints.iter().map(|_| Slot::default()).collect(),
            diagnostics: DiagnosticList::new(),
            round_value: None,
            round_version: None,
            constrained_value: None,
            started: false,
            initial: config.initial_state,
            user_interacted: false,
            batch_depth: 0,
            publish_seq: 0,
            publisher: None,
            republish: false,
            published: StateFlags::empty(),
            recorder: config
                .record_trace
                .then(|| TraceRecorder::new(config.trace_clock.clone())),
        };
        let flags = state.flags();
        state.published = flags;

        let inner = Arc::new(HelperInner {
            value: value.clone(),
            constraints,
            completion_executor: config.completion_executor.clone(),
            state: Mutex::new(state),
            outputs: Outputs::new(flags),
            listeners: Mutex::new(Listeners::default()),
            subscriptions: Mutex::new(Vec::new()),
        });
        let helper = Self { inner };
        helper.attach();

        if config.validate_on_create {
            helper.inner.start_round(RoundCause::Initial);
        }
        helper
    }

    fn attach(&self) {
        let inner = &self.inner;
        let mut subscriptions = Vec::new();

        let weak = Arc::downgrade(inner);
        subscriptions.push(inner.value.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.start_round(RoundCause::ValueChanged);
            }
        }));

        let mut seen = HashSet::new();
        seen.insert(inner.value.id());
        for dependency in inner.constraints.iter().flat_map(Constraint::dependencies) {
            let id = dependency.observable_id();
            if !seen.insert(id) {
                continue;
            }
            let weak = Arc::downgrade(inner);
            subscriptions.push(dependency.watch(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.start_round(RoundCause::Dependency(id));
                }
            })));
        }

        *lock(&inner.subscriptions) = subscriptions;
    }

    // -- inbound ------------------------------------------------------------

    /// Re-run every constraint against the current value.
    ///
    /// Changes made through [`Observable::set`] or [`Observable::update`]
    /// trigger this automatically.
    pub fn notify_value_changed(&self) {
        self.inner.start_round(RoundCause::ValueChanged);
    }

    /// Re-run every constraint after the value was mutated in place.
    pub fn notify_content_changed(&self) {
        self.inner.start_round(RoundCause::ContentChanged);
    }

    /// Re-run the constraints that declare `dependency`. Does nothing if
    /// none do.
    pub fn notify_dependency_invalidated(&self, dependency: &dyn Dependency) {
        self.inner
            .start_round(RoundCause::Dependency(dependency.observable_id()));
    }

    /// Record whether the user has interacted with the value.
    pub fn set_user_interacted(&self, interacted: bool) {
        self.inner.set_user_interacted(interacted);
    }

    /// Register a listener for flag transitions.
    pub fn subscribe_changes(
        &self,
        listener: impl Fn(ValidationChange) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut listeners = lock(&self.inner.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::new(listener)));
            id
        };
        let weak = Arc::downgrade(&self.inner);
        Subscription::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.listeners).entries.retain(|(i, _)| *i != id);
            }
        })
    }
}

impl<T, E> ValidationHelper<T, E>
where
    E: Clone,
    T: Clone,
{
    // -- outbound -----------------------------------------------------------

    /// The constrained observable.
    #[must_use]
    pub fn value(&self) -> &Observable<T> {
        &self.inner.value
    }

    /// The constraints, in declaration order.
    #[must_use]
    pub fn constraints(&self) -> &[Constraint<T, E>] {
        &self.inner.constraints
    }

    /// Current aggregate flags.
    #[must_use]
    pub fn flags(&self) -> StateFlags {
        lock(&self.inner.state).flags()
    }

    /// Coarse state derived from the flags.
    #[must_use]
    pub fn state(&self) -> ValidationState {
        self.flags().state()
    }

    /// Every constraint completed and passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.flags().contains(StateFlags::VALID)
    }

    /// At least one completed constraint failed.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.flags().contains(StateFlags::INVALID)
    }

    /// At least one constraint is in flight.
    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.flags().contains(StateFlags::VALIDATING)
    }

    /// Valid, and the user has interacted with the value.
    #[must_use]
    pub fn is_user_valid(&self) -> bool {
        let state = lock(&self.inner.state);
        state.user_interacted && state.flags().contains(StateFlags::VALID)
    }

    /// Invalid, and the user has interacted with the value.
    #[must_use]
    pub fn is_user_invalid(&self) -> bool {
        let state = lock(&self.inner.state);
        state.user_interacted && state.flags().contains(StateFlags::INVALID)
    }

    /// Whether the user has interacted with the value.
    #[must_use]
    pub fn user_interacted(&self) -> bool {
        lock(&self.inner.state).user_interacted
    }

    /// Error diagnostics in constraint order.
    #[must_use]
    pub fn errors(&self) -> Vec<E> {
        lock(&self.inner.state)
            .diagnostics
            .errors()
            .cloned()
            .collect()
    }

    /// Warning diagnostics in constraint order.
    #[must_use]
    pub fn warnings(&self) -> Vec<E> {
        lock(&self.inner.state)
            .diagnostics
            .warnings()
            .cloned()
            .collect()
    }

    /// All diagnostics with their constraint indices.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticList<E> {
        lock(&self.inner.state).diagnostics.clone()
    }

    /// The last value for which every constraint passed.
    #[must_use]
    pub fn constrained_value(&self) -> Option<T> {
        lock(&self.inner.state).constrained_value.clone()
    }

    /// Generation of the latest round.
    #[must_use]
    pub fn generation(&self) -> Generation {
        lock(&self.inner.state).generation
    }

    /// Number of constraints currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.state).in_flight()
    }

    /// A copy of the recorded trace, if recording is enabled.
    #[must_use]
    pub fn trace(&self) -> Option<ValidationTrace> {
        lock(&self.inner.state)
            .recorder
            .as_ref()
            .map(|r| r.trace().clone())
    }

    /// Discard recorded events.
    pub fn clear_trace(&self) {
        if let Some(recorder) = lock(&self.inner.state).recorder.as_mut() {
            recorder.clear();
        }
    }

    /// Check the recorded trace.
    ///
    /// # Errors
    ///
    /// Returns the violations found; `Ok` when recording is disabled.
    pub fn verify_trace(&self) -> Result<(), Vec<String>> {
        let violations = self
            .trace()
            .map(|t| t.verify_invariants())
            .unwrap_or_default();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    // -- observables --------------------------------------------------------

    /// Observable mirror of [`is_valid`](Self::is_valid).
    #[must_use]
    pub fn valid_observable(&self) -> Observable<bool> {
        self.inner.outputs.valid.clone()
    }

    /// Observable mirror of [`is_invalid`](Self::is_invalid).
    #[must_use]
    pub fn invalid_observable(&self) -> Observable<bool> {
        self.inner.outputs.invalid.clone()
    }

    /// Observable mirror of [`is_validating`](Self::is_validating).
    #[must_use]
    pub fn validating_observable(&self) -> Observable<bool> {
        self.inner.outputs.validating.clone()
    }

    /// Observable mirror of [`is_user_valid`](Self::is_user_valid).
    #[must_use]
    pub fn user_valid_observable(&self) -> Observable<bool> {
        self.inner.outputs.user_valid.clone()
    }

    /// Observable mirror of [`is_user_invalid`](Self::is_user_invalid).
    #[must_use]
    pub fn user_invalid_observable(&self) -> Observable<bool> {
        self.inner.outputs.user_invalid.clone()
    }

    /// Observable mirror of [`errors`](Self::errors).
    #[must_use]
    pub fn errors_observable(&self) -> Observable<Vec<E>> {
        self.inner.outputs.errors.clone()
    }

    /// Observable mirror of [`warnings`](Self::warnings).
    #[must_use]
    pub fn warnings_observable(&self) -> Observable<Vec<E>> {
        self.inner.outputs.warnings.clone()
    }

    /// Observable mirror of [`constrained_value`](Self::constrained_value).
    #[must_use]
    pub fn constrained_value_observable(&self) -> Observable<Option<T>> {
        self.inner.outputs.constrained_value.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints;
    use cval_core::QueueExecutor;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    fn min_len(n: usize, msg: &'static str) -> Constraint<String, &'static str> {
        Constraint::validate(move |s: &String| {
            if s.len() >= n {
                ValidationResult::VALID
            } else {
                ValidationResult::error(msg)
            }
        })
    }

    fn no_digits() -> Constraint<String, &'static str> {
        Constraint::validate(|s: &String| {
            if s.chars().any(|c| c.is_ascii_digit()) {
                ValidationResult::error("no digits")
            } else {
                ValidationResult::VALID
            }
        })
    }

    fn traced() -> HelperConfig {
        HelperConfig::default().with_trace_clock(Arc::new(AtomicU64::new(0)))
    }

    fn record_changes(
        helper: &ValidationHelper<String, &'static str>,
    ) -> (Arc<Mutex<Vec<ValidationChange>>>, Subscription) {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let sub = helper.subscribe_changes(move |c| sink.lock().unwrap().push(c));
        (changes, sub)
    }

    #[test]
    fn initial_round_runs_on_create() {
        let value = Observable::new("abc".to_string());
        let helper = ValidationHelper::new(&value, [min_len(3, "short"), no_digits()]);
        assert!(helper.is_valid());
        assert!(!helper.is_invalid());
        assert!(!helper.is_validating());
        assert_eq!(helper.generation(), Generation::from_raw(1));
        assert_eq!(helper.constrained_value(), Some("abc".to_string()));
        assert_eq!(helper.state(), ValidationState::Valid);
    }

    #[test]
    fn errors_keep_constraint_order() {
        let value = Observable::new("1".to_string());
        let helper = ValidationHelper::new(&value, [min_len(3, "short"), no_digits()]);
        assert!(helper.is_invalid());
        assert_eq!(helper.errors(), vec!["short", "no digits"]);
        assert_eq!(helper.errors_observable().get(), vec!["short", "no digits"]);
        assert!(helper.warnings().is_empty());
        assert_eq!(helper.constrained_value(), None);
    }

    #[test]
    fn warnings_are_valid_diagnostics() {
        let value = Observable::new("password".to_string());
        let weak = Constraint::validate(|s: &String| {
            if s.len() < 12 {
                ValidationResult::warning("weak")
            } else {
                ValidationResult::VALID
            }
        });
        let helper = ValidationHelper::new(&value, [weak]);
        assert!(helper.is_valid());
        assert_eq!(helper.warnings(), vec!["weak"]);
        assert!(helper.errors().is_empty());
        assert_eq!(helper.diagnostics().is_valid(0), Some(true));
    }

    #[test]
    fn no_constraints_is_always_valid() {
        let value = Observable::new(5);
        let helper: ValidationHelper<i32, ()> = ValidationHelper::new(&value, []);
        assert!(helper.is_valid());
        assert_eq!(helper.constrained_value(), Some(5));
        value.set(6);
        assert_eq!(helper.constrained_value(), Some(6));
        assert_eq!(helper.constrained_value_observable().get(), Some(6));
    }

    #[test]
    fn initial_state_applies_until_first_round() {
        let value = Observable::new(String::new());
        let config = HelperConfig::default()
            .with_validate_on_create(false)
            .with_initial_state(ValidationState::Invalid);
        let helper = ValidationHelper::with_config(&value, [min_len(1, "required")], config);
        assert!(helper.is_invalid());
        assert!(helper.invalid_observable().get());
        assert!(helper.errors().is_empty());
        assert_eq!(helper.generation(), Generation::NONE);

        value.set("x".to_string());
        assert!(helper.is_valid());
        assert!(!helper.invalid_observable().get());
    }

    #[test]
    fn value_change_revalidates() {
        let value = Observable::new("abc".to_string());
        let helper = ValidationHelper::new(&value, [min_len(3, "short")]);
        value.set("a".to_string());
        assert!(helper.is_invalid());
        assert!(helper.invalid_observable().get());
        assert!(!helper.valid_observable().get());
        assert_eq!(helper.constrained_value(), Some("abc".to_string()));

        value.set("abcd".to_string());
        assert!(helper.is_valid());
        assert_eq!(helper.constrained_value(), Some("abcd".to_string()));
    }

    #[test]
    fn content_change_revalidates() {
        let value = Observable::new(vec![1]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let non_empty = Constraint::<Vec<i32>, ()>::validate(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            ValidationResult::from_bool(!v.is_empty())
        });
        let helper = ValidationHelper::new(&value, [non_empty]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        helper.notify_content_changed();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sync_round_publishes_once() {
        let value = Observable::new("abc".to_string());
        let helper = ValidationHelper::new(&value, [min_len(3, "short"), no_digits()]);
        let (changes, _sub) = record_changes(&helper);

        value.set("1".to_string());
        let seen = changes.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ValidationChange {
                    kind: ChangeKind::Valid,
                    old: true,
                    new: false
                },
                ValidationChange {
                    kind: ChangeKind::Invalid,
                    old: false,
                    new: true
                },
            ]
        );
    }

    #[test]
    fn async_round_reports_validating() {
        let queue = QueueExecutor::new();
        let value = Observable::new("abc".to_string());
        let slow = Constraint::validate_async(
            |s: &String| ValidationResult::from_bool(!s.is_empty()),
            Arc::new(queue.clone()),
        );
        let helper: ValidationHelper<String, ()> = ValidationHelper::new(&value, [slow]);
        assert!(helper.is_validating());
        assert!(!helper.is_valid());
        assert!(!helper.is_invalid());
        assert_eq!(helper.in_flight(), 1);
        assert_eq!(helper.constrained_value(), None);

        queue.run_pending();
        assert!(!helper.is_validating());
        assert!(helper.is_valid());
        assert_eq!(helper.constrained_value(), Some("abc".to_string()));
    }

    #[test]
    fn stale_results_are_discarded() {
        let queue = QueueExecutor::new();
        let value = Observable::new("first".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let slow = Constraint::validate_async(
            move |s: &String| {
                log.lock().unwrap().push(s.clone());
                ValidationResult::from_bool(s != "first")
            },
            Arc::new(queue.clone()),
        );
        let helper: ValidationHelper<String, ()> =
            ValidationHelper::with_config(&value, [slow], traced());
        value.set("second".to_string());

        queue.run_pending();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert!(helper.is_valid());

        let trace = helper.trace().unwrap();
        assert_eq!(trace.count("stale_discarded"), 1);
        assert_eq!(trace.count("superseded"), 1);
        assert_eq!(trace.count("applied"), 1);
        assert!(helper.verify_trace().is_ok());
    }

    #[test]
    fn superseded_invocation_is_cancelled() {
        let queue = QueueExecutor::new();
        let value = Observable::new(1);
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&tokens);
        let c = Constraint::<i32, ()>::validate_cancellable_async(
            move |_, cancel| {
                sink.lock().unwrap().push(cancel.is_cancelled());
                ValidationResult::VALID
            },
            Arc::new(queue.clone()),
        );
        let _helper = ValidationHelper::new(&value, [c]);
        value.set(2);
        queue.run_pending();
        assert_eq!(*tokens.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let value = Observable::new("abc".to_string());
        let helper = ValidationHelper::with_config(&value, [min_len(3, "short")], traced());
        let (changes, _sub) = record_changes(&helper);
        let generation = helper.generation();

        helper
            .inner
            .complete(0, generation, Ok(ValidationResult::error("late")));
        assert!(helper.is_valid());
        assert!(helper.errors().is_empty());
        assert!(changes.lock().unwrap().is_empty());
        assert_eq!(helper.trace().unwrap().count("duplicate_ignored"), 1);
        assert!(helper.verify_trace().is_ok());
    }

    #[test]
    fn dependency_reruns_only_dependents() {
        let value = Observable::new(5);
        let max = Observable::new(10);
        let plain_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&plain_calls);
        let plain = Constraint::<i32, &'static str>::validate(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ValidationResult::VALID
        });
        let bounded = constraints::less_than_observed(&max);
        let helper = ValidationHelper::new(&value, [plain, bounded]);
        assert!(helper.is_valid());
        assert_eq!(plain_calls.load(Ordering::SeqCst), 1);

        max.set(3);
        assert!(helper.is_invalid());
        assert_eq!(plain_calls.load(Ordering::SeqCst), 1);
        assert_eq!(helper.constrained_value(), Some(5));

        max.set(6);
        assert!(helper.is_valid());
        assert_eq!(plain_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dependency_round_after_unseen_value_change_revalidates_everything() {
        let value = Observable::new(5);
        let max = Observable::new(10);
        let bump = max.clone();
        // Registered before the helper, so it fires the dependency before
        // the helper hears about the new value.
        let _early = value.subscribe(move |_| {
            bump.set(100);
        });
        let odd = Constraint::<i32, &'static str>::validate(|n| {
            if n % 2 != 0 {
                ValidationResult::VALID
            } else {
                ValidationResult::error("even")
            }
        });
        let helper = ValidationHelper::with_config(
            &value,
            [odd, constraints::less_than_observed(&max)],
            traced(),
        );
        assert!(helper.is_valid());

        value.set(4);
        assert!(helper.is_invalid());
        assert_eq!(helper.errors(), vec!["even"]);
        assert_eq!(helper.constrained_value(), Some(5));
        assert_eq!(helper.constrained_value_observable().get(), Some(5));
        assert!(helper.verify_trace().is_ok());
    }

    #[test]
    fn dependency_round_for_same_value_stays_partial() {
        let value = Observable::new(5);
        let max = Observable::new(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let plain = Constraint::<i32, ()>::validate(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ValidationResult::VALID
        });
        let helper = ValidationHelper::new(&value, [plain, constraints::less_than_observed(&max)]);
        value.set(7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        max.set(20);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(helper.constrained_value(), Some(7));
    }

    #[test]
    fn debug_output_summarises_engine() {
        let value = Observable::new("abc".to_string());
        let helper = ValidationHelper::new(&value, [min_len(3, "short")]);
        let out = format!("{helper:?}");
        assert!(out.starts_with("ValidationHelper"));
        assert!(out.contains("constraints: 1"));
        assert!(out.contains("in_flight: 0"));
    }

    #[test]
    fn unrelated_dependency_is_ignored() {
        let value = Observable::new(1);
        let unrelated = Observable::new(0);
        let helper: ValidationHelper<i32, ()> =
            ValidationHelper::new(&value, [Constraint::validate(|_| ValidationResult::VALID)]);
        let before = helper.generation();
        helper.notify_dependency_invalidated(&unrelated);
        assert_eq!(helper.generation(), before);
    }

    #[test]
    fn shared_dependency_subscribed_once() {
        let value = Observable::new(1);
        let bound = Observable::new(10);
        let a = constraints::less_than_observed::<i32, ()>(&bound);
        let b = constraints::less_than_observed::<i32, ()>(&bound);
        let helper = ValidationHelper::new(&value, [a, b]);
        assert_eq!(bound.subscriber_count(), 1);

        let before = helper.generation();
        bound.set(20);
        assert_eq!(helper.generation(), before.next());
        drop(helper);
        assert_eq!(bound.subscriber_count(), 0);
        assert_eq!(value.subscriber_count(), 0);
    }

    #[test]
    fn failures_report_invalid_without_diagnostic() {
        let value = Observable::new(1);
        let failing = Constraint::<i32, &'static str>::try_validate(|_| {
            Err(ValidatorFailure::error("service unavailable"))
        });
        let helper = ValidationHelper::new(&value, [failing]);
        assert!(helper.is_invalid());
        assert!(helper.errors().is_empty());
        assert_eq!(helper.constrained_value(), None);
    }

    #[test]
    fn user_flags_follow_interaction() {
        let value = Observable::new(String::new());
        let helper = ValidationHelper::new(&value, [min_len(1, "required")]);
        assert!(helper.is_invalid());
        assert!(!helper.is_user_invalid());
        assert!(!helper.user_invalid_observable().get());

        helper.set_user_interacted(true);
        assert!(helper.is_user_invalid());
        assert!(helper.user_invalid_observable().get());

        value.set("x".to_string());
        assert!(helper.is_user_valid());
        assert!(helper.user_valid_observable().get());
        assert!(!helper.user_invalid_observable().get());
    }

    #[test]
    fn listener_unsubscribes_on_drop() {
        let value = Observable::new("abc".to_string());
        let helper = ValidationHelper::new(&value, [min_len(3, "short")]);
        let (changes, sub) = record_changes(&helper);
        drop(sub);
        value.set("a".to_string());
        assert!(changes.lock().unwrap().is_empty());
    }

    #[test]
    fn dropping_helper_cancels_in_flight() {
        let queue = QueueExecutor::new();
        let value = Observable::new(1);
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let c = Constraint::<i32, ()>::validate_cancellable_async(
            move |_, cancel| {
                *sink.lock().unwrap() = Some(cancel.is_cancelled());
                ValidationResult::VALID
            },
            Arc::new(queue.clone()),
        );
        let helper = ValidationHelper::new(&value, [c]);
        drop(helper);
        queue.run_pending();
        assert_eq!(*observed.lock().unwrap(), Some(true));
    }

    #[test]
    fn completion_executor_defers_apply() {
        let completions = QueueExecutor::new();
        let value = Observable::new("abc".to_string());
        let config = HelperConfig::default().with_completion_executor(Arc::new(completions.clone()));
        let helper = ValidationHelper::with_config(&value, [min_len(3, "short")], config);
        assert!(helper.is_validating());
        assert_eq!(completions.pending(), 1);
        completions.run_pending();
        assert!(helper.is_valid());
    }

    #[test]
    fn trace_is_deterministic_with_fixed_clock() {
        let run = || {
            let value = Observable::new("a".to_string());
            let helper = ValidationHelper::with_config(
                &value,
                [min_len(2, "short"), no_digits()],
                traced(),
            );
            value.set("ab".to_string());
            value.set("a1".to_string());
            helper.trace().unwrap().checksum()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn flags_collapse_to_state() {
        assert_eq!(StateFlags::VALID.state(), ValidationState::Valid);
        assert_eq!(StateFlags::INVALID.state(), ValidationState::Invalid);
        assert_eq!(
            (StateFlags::INVALID | StateFlags::VALIDATING).state(),
            ValidationState::Invalid
        );
        assert_eq!(StateFlags::VALIDATING.state(), ValidationState::Unknown);
        assert_eq!(StateFlags::empty().state(), ValidationState::Unknown);
    }
}
