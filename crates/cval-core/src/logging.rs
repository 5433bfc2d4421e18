#![forbid(unsafe_code)]

//! Logging setup.
//!
//! cval emits events through `tracing`. Applications that do not install
//! their own subscriber can enable the `subscriber` feature and call
//! [`init`] (human-readable) or, with the `json` feature, [`init_json`].
//! Both read the filter from the `CVAL_LOG` environment variable and fall
//! back to `info`.

/// Environment variable holding the `EnvFilter` directives.
pub const LOG_ENV: &str = "CVAL_LOG";

/// Default filter when `CVAL_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

#[cfg(feature = "subscriber")]
fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
}

/// Install a formatted subscriber. Returns `false` if one was already set.
#[cfg(feature = "subscriber")]
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Install a JSON subscriber. Returns `false` if one was already set.
#[cfg(feature = "json")]
pub fn init_json() -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter())
        .with_current_span(false)
        .try_init()
        .is_ok()
}
