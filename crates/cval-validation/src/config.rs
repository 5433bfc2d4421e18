#![forbid(unsafe_code)]

//! Engine configuration.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use cval_core::Executor;

use crate::result::ValidationState;

/// Environment variable that enables trace recording in [`HelperConfig::from_env`].
pub const TRACE_ENV: &str = "CVAL_TRACE";

/// Environment variable that sets the initial state in [`HelperConfig::from_env`].
pub const INITIAL_STATE_ENV: &str = "CVAL_INITIAL_STATE";

/// Configuration for a [`ValidationHelper`](crate::ValidationHelper).
#[derive(Clone)]
pub struct HelperConfig {
    /// What the helper reports before its first round.
    pub initial_state: ValidationState,
    /// Run a full round as soon as the helper is created.
    pub validate_on_create: bool,
    /// Record a [`ValidationTrace`](crate::trace::ValidationTrace).
    pub record_trace: bool,
    /// Fixed clock (nanoseconds) used to stamp trace events.
    pub trace_clock: Option<Arc<AtomicU64>>,
    /// Where results are applied for constraints without their own
    /// completion executor. `None` applies them on the thread that
    /// delivers the result.
    pub completion_executor: Option<Arc<dyn Executor>>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            initial_state: ValidationState::Unknown,
            validate_on_create: true,
            record_trace: false,
            trace_clock: None,
            completion_executor: None,
        }
    }
}

impl fmt::Debug for HelperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperConfig")
            .field("initial_state", &self.initial_state)
            .field("validate_on_create", &self.validate_on_create)
            .field("record_trace", &self.record_trace)
            .field("trace_clock", &self.trace_clock.is_some())
            .field("completion_executor", &self.completion_executor.is_some())
            .finish()
    }
}

impl HelperConfig {
    /// Defaults, overridden by `CVAL_TRACE` and `CVAL_INITIAL_STATE`.
    ///
    /// `CVAL_TRACE=1` (or `true`) enables trace recording. Unrecognised
    /// values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(TRACE_ENV) {
            config.record_trace = matches!(value.trim(), "1" | "true" | "TRUE" | "yes");
        }
        if let Some(state) = std::env::var(INITIAL_STATE_ENV)
            .ok()
            .and_then(|value| ValidationState::parse(&value))
        {
            config.initial_state = state;
        }
        config
    }

    /// Set the initial state.
    #[must_use]
    pub fn with_initial_state(mut self, state: ValidationState) -> Self {
        self.initial_state = state;
        self
    }

    /// Enable or disable the round run at creation.
    #[must_use]
    pub fn with_validate_on_create(mut self, enabled: bool) -> Self {
        self.validate_on_create = enabled;
        self
    }

    /// Enable or disable trace recording.
    #[must_use]
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.record_trace = enabled;
        self
    }

    /// Record a trace stamped with `clock` instead of wall time.
    #[must_use]
    pub fn with_trace_clock(mut self, clock: Arc<AtomicU64>) -> Self {
        self.record_trace = true;
        self.trace_clock = Some(clock);
        self
    }

    /// Apply results on `executor` by default.
    #[must_use]
    pub fn with_completion_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.completion_executor = Some(executor);
        self
    }
}
