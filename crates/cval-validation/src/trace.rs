#![forbid(unsafe_code)]

//! Round generations and the validation event trace.
//!
//! Every validation round gets a fresh [`Generation`]. Each constraint slot
//! remembers the generation of its latest invocation, and a result is applied
//! only if it carries that generation. Everything the engine does with a
//! round is optionally recorded in a [`ValidationTrace`], which can be
//! checksummed for golden comparison and checked for ordering invariants.
//!
//! ```
//! use cval_validation::trace::{Generation, ValidationEvent, ValidationTrace};
//!
//! let mut trace = ValidationTrace::new();
//! let generation = Generation::from_raw(1);
//! trace.push(ValidationEvent::Invoked { generation, constraint: 0, elapsed_ns: 0 });
//! trace.push(ValidationEvent::Applied {
//!     generation,
//!     constraint: 0,
//!     is_valid: true,
//!     elapsed_ns: 5,
//! });
//! assert!(trace.verify_invariants().is_empty());
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cval_core::ObservableId;
use web_time::Instant;

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// A strictly increasing round number.
///
/// Generation 0 is reserved for "never invoked".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    /// The null generation.
    pub const NONE: Self = Self(0);

    /// Create a generation from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// The raw value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this is the null generation.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The following generation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gen({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// RoundCause
// ---------------------------------------------------------------------------

/// What started a validation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundCause {
    /// The round run when the helper is created.
    Initial,
    /// The constrained value was replaced.
    ValueChanged,
    /// The constrained value was mutated in place.
    ContentChanged,
    /// A dependency changed; only constraints that declare it re-run.
    Dependency(ObservableId),
}

impl RoundCause {
    /// Whether the round re-runs every constraint.
    #[must_use]
    pub const fn is_full(self) -> bool {
        !matches!(self, Self::Dependency(_))
    }
}

// ---------------------------------------------------------------------------
// ValidationEvent
// ---------------------------------------------------------------------------

/// One step of the validation lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValidationEvent {
    /// A round began.
    RoundStarted {
        generation: Generation,
        cause: RoundCause,
        /// Number of constraints invoked by the round.
        constraints: usize,
        elapsed_ns: u64,
    },

    /// A constraint's validator was invoked.
    Invoked {
        generation: Generation,
        constraint: usize,
        elapsed_ns: u64,
    },

    /// An in-flight invocation was superseded by a newer round.
    Superseded {
        generation: Generation,
        constraint: usize,
        superseded_by: Generation,
        elapsed_ns: u64,
    },

    /// A result arrived (it may or may not be applied).
    Completed {
        generation: Generation,
        constraint: usize,
        is_valid: bool,
        elapsed_ns: u64,
    },

    /// A result was applied to the constraint's slot.
    Applied {
        generation: Generation,
        constraint: usize,
        is_valid: bool,
        elapsed_ns: u64,
    },

    /// A result was discarded because the slot has a newer invocation.
    StaleDiscarded {
        generation: Generation,
        constraint: usize,
        /// The slot's generation when the result arrived.
        current: Generation,
        elapsed_ns: u64,
    },

    /// A second delivery for an already applied invocation was ignored.
    DuplicateIgnored {
        generation: Generation,
        constraint: usize,
        elapsed_ns: u64,
    },

    /// Every constraint passed and the value became the constrained value.
    ConstrainedValueApplied {
        generation: Generation,
        elapsed_ns: u64,
    },
}

impl ValidationEvent {
    /// The generation associated with this event.
    #[must_use]
    pub fn generation(&self) -> Generation {
        match self {
            Self::RoundStarted { generation, .. }
            | Self::Invoked { generation, .. }
            | Self::Superseded { generation, .. }
            | Self::Completed { generation, .. }
            | Self::Applied { generation, .. }
            | Self::StaleDiscarded { generation, .. }
            | Self::DuplicateIgnored { generation, .. }
            | Self::ConstrainedValueApplied { generation, .. } => *generation,
        }
    }

    /// The constraint index, for per-constraint events.
    #[must_use]
    pub fn constraint(&self) -> Option<usize> {
        match self {
            Self::Invoked { constraint, .. }
            | Self::Superseded { constraint, .. }
            | Self::Completed { constraint, .. }
            | Self::Applied { constraint, .. }
            | Self::StaleDiscarded { constraint, .. }
            | Self::DuplicateIgnored { constraint, .. } => Some(*constraint),
            Self::RoundStarted { .. } | Self::ConstrainedValueApplied { .. } => None,
        }
    }

    /// The event type name for logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RoundStarted { .. } => "round_started",
            Self::Invoked { .. } => "invoked",
            Self::Superseded { .. } => "superseded",
            Self::Completed { .. } => "completed",
            Self::Applied { .. } => "applied",
            Self::StaleDiscarded { .. } => "stale_discarded",
            Self::DuplicateIgnored { .. } => "duplicate_ignored",
            Self::ConstrainedValueApplied { .. } => "constrained_value_applied",
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationTrace
// ---------------------------------------------------------------------------

/// An ordered log of validation events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationTrace {
    events: Vec<ValidationEvent>,
}

impl ValidationTrace {
    /// Create an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event.
    pub fn push(&mut self, event: ValidationEvent) {
        self.events.push(event);
    }

    /// All events in order.
    #[must_use]
    pub fn events(&self) -> &[ValidationEvent] {
        &self.events
    }

    /// Whether an event of `event_type` was recorded for `generation`.
    #[must_use]
    pub fn contains_event_type(&self, generation: Generation, event_type: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.generation() == generation && e.event_type() == event_type)
    }

    /// Events recorded for `generation`.
    #[must_use]
    pub fn events_for_generation(&self, generation: Generation) -> Vec<&ValidationEvent> {
        self.events
            .iter()
            .filter(|e| e.generation() == generation)
            .collect()
    }

    /// Events recorded for constraint `index`.
    #[must_use]
    pub fn events_for_constraint(&self, index: usize) -> Vec<&ValidationEvent> {
        self.events
            .iter()
            .filter(|e| e.constraint() == Some(index))
            .collect()
    }

    /// Number of events of `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    /// Order-sensitive checksum of every event.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for event in &self.events {
            event.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the trace is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Remove every event.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Check ordering invariants. Returns one message per violation.
    #[must_use]
    pub fn verify_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut last_round = Generation::NONE;
        let mut last_invoked: HashMap<usize, Generation> = HashMap::new();
        let mut applied: HashSet<(usize, Generation)> = HashSet::new();

        for event in &self.events {
            match event {
                ValidationEvent::RoundStarted { generation, .. } => {
                    if *generation <= last_round {
                        violations.push(format!(
                            "non-monotonic round: {generation} after {last_round}"
                        ));
                    }
                    last_round = *generation;
                }
                ValidationEvent::Invoked {
                    generation,
                    constraint,
                    ..
                } => {
                    last_invoked.insert(*constraint, *generation);
                }
                ValidationEvent::Applied {
                    generation,
                    constraint,
                    ..
                } => {
                    if last_invoked.get(constraint) != Some(generation) {
                        violations.push(format!(
                            "constraint {constraint} applied {generation} but latest invocation is {}",
                            last_invoked
                                .get(constraint)
                                .copied()
                                .unwrap_or(Generation::NONE)
                        ));
                    }
                    if !applied.insert((*constraint, *generation)) {
                        violations.push(format!(
                            "constraint {constraint} applied {generation} twice"
                        ));
                    }
                }
                ValidationEvent::StaleDiscarded {
                    generation,
                    constraint,
                    current,
                    ..
                } => {
                    if generation >= current {
                        violations.push(format!(
                            "constraint {constraint} discarded non-stale {generation} (current {current})"
                        ));
                    }
                }
                _ => {}
            }
        }

        violations
    }
}

// ---------------------------------------------------------------------------
// TraceRecorder
// ---------------------------------------------------------------------------

/// Appends events to a trace, stamping them with elapsed time.
///
/// The time comes from the fixed clock when one is supplied, which keeps
/// checksums stable across runs.
#[derive(Debug)]
pub(crate) struct TraceRecorder {
    trace: ValidationTrace,
    created_at: Instant,
    fixed_clock: Option<Arc<AtomicU64>>,
}

impl TraceRecorder {
    pub(crate) fn new(fixed_clock: Option<Arc<AtomicU64>>) -> Self {
        Self {
            trace: ValidationTrace::new(),
            created_at: Instant::now(),
            fixed_clock,
        }
    }

    pub(crate) fn elapsed_ns(&self) -> u64 {
        self.fixed_clock.as_ref().map_or_else(
            || u64::try_from(self.created_at.elapsed().as_nanos()).unwrap_or(u64::MAX),
            |clock| clock.load(Ordering::SeqCst),
        )
    }

    pub(crate) fn record(&mut self, event: impl FnOnce(u64) -> ValidationEvent) {
        let elapsed_ns = self.elapsed_ns();
        self.trace.push(event(elapsed_ns));
    }

    pub(crate) fn trace(&self) -> &ValidationTrace {
        &self.trace
    }

    pub(crate) fn clear(&mut self) {
        self.trace.clear();
    }
}
