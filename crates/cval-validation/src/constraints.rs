#![forbid(unsafe_code)]

//! Built-in constraints.
//!
//! Each builder comes in two forms: the plain one reports invalid without a
//! diagnostic, the `_with` one calls a factory to build the error from the
//! rejected value.
//!
//! | Builder                                  | Passes when                 |
//! |------------------------------------------|-----------------------------|
//! | [`not_none`]                             | `value.is_some()`           |
//! | [`not_empty`]                            | the string is non-empty     |
//! | [`not_blank`]                            | the string has non-whitespace |
//! | [`matches_pattern`]                      | the whole string matches    |
//! | [`not_matches_pattern`]                  | the whole string does not match |
//! | [`between`]                              | `min <= value < max`        |
//! | [`greater_than`] / [`greater_than_or_equal_to`] | `value > bound` / `>=` |
//! | [`less_than`] / [`less_than_or_equal_to`]       | `value < bound` / `<=` |
//! | [`between_observed`]                     | as `between`, bounds read from observables |
//! | [`greater_than_observed`] / [`less_than_observed`] | as above, bound read from an observable |

use std::sync::Arc;

use cval_core::Observable;
use regex::Regex;

use crate::constraint::Constraint;
use crate::error::ConfigurationError;
use crate::result::ValidationResult;

type ErrorFn<T, E> = Arc<dyn Fn(&T) -> E + Send + Sync>;

fn predicate<T, E>(
    check: impl Fn(&T) -> bool + Send + Sync + 'static,
    error: Option<ErrorFn<T, E>>,
) -> Constraint<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    Constraint::validate(move |value: &T| {
        if check(value) {
            ValidationResult::VALID
        } else {
            match &error {
                Some(make) => ValidationResult::error(make(value)),
                None => ValidationResult::INVALID,
            }
        }
    })
}

fn boxed<T, E>(f: impl Fn(&T) -> E + Send + Sync + 'static) -> Option<ErrorFn<T, E>> {
    Some(Arc::new(f))
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Passes when the value is `Some`.
#[must_use]
pub fn not_none<U, E>() -> Constraint<Option<U>, E>
where
    U: Send + 'static,
    E: Send + 'static,
{
    predicate(|v: &Option<U>| v.is_some(), None)
}

/// [`not_none`] with an error factory.
#[must_use]
pub fn not_none_with<U, E>(
    error: impl Fn(&Option<U>) -> E + Send + Sync + 'static,
) -> Constraint<Option<U>, E>
where
    U: Send + 'static,
    E: Send + 'static,
{
    predicate(|v: &Option<U>| v.is_some(), boxed(error))
}

/// Passes when the string is not empty.
#[must_use]
pub fn not_empty<T, E>() -> Constraint<T, E>
where
    T: AsRef<str> + Send + 'static,
    E: Send + 'static,
{
    predicate(|s: &T| !s.as_ref().is_empty(), None)
}

/// [`not_empty`] with an error factory.
#[must_use]
pub fn not_empty_with<T, E>(error: impl Fn(&T) -> E + Send + Sync + 'static) -> Constraint<T, E>
where
    T: AsRef<str> + Send + 'static,
    E: Send + 'static,
{
    predicate(|s: &T| !s.as_ref().is_empty(), boxed(error))
}

/// Passes when the string contains a non-whitespace character.
#[must_use]
pub fn not_blank<T, E>() -> Constraint<T, E>
where
    T: AsRef<str> + Send + 'static,
    E: Send + 'static,
{
    predicate(|s: &T| !s.as_ref().trim().is_empty(), None)
}

/// [`not_blank`] with an error factory.
#[must_use]
pub fn not_blank_with<T, E>(error: impl Fn(&T) -> E + Send + Sync + 'static) -> Constraint<T, E>
where
    T: AsRef<str> + Send + 'static,
    E: Send + 'static,
{
    predicate(|s: &T| !s.as_ref().trim().is_empty(), boxed(error))
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn full_match(pattern: &str) -> Result<Regex, ConfigurationError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|err| ConfigurationError::InvalidPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

/// Passes when the whole string matches `pattern`.
///
/// # Errors
///
/// [`ConfigurationError::InvalidPattern`] if `pattern` does not compile.
pub fn matches_pattern<T, E>(pattern: &str) -> Result<Constraint<T, E>, ConfigurationError>
where
    T: AsRef<str> + Send + 'static,
    E: Send + 'static,
{
    let regex = full_match(pattern)?;
    Ok(predicate(move |s: &T| regex.is_match(s.as_ref()), None))
}

/// [`matches_pattern`] with an error factory.
///
/// # Errors
///
/// [`ConfigurationError::InvalidPattern`] if `pattern` does not compile.
pub fn matches_pattern_with<T, E>(
    pattern: &str,
    error: impl Fn(&T) -> E + Send + Sync + 'static,
) -> Result<Constraint<T, E>, ConfigurationError>
where
    T: AsRef<str> + Send + 'static,
    E: Send + 'static,
{
    let regex = full_match(pattern)?;
    Ok(predicate(
        move |s: &T| regex.is_match(s.as_ref()),
        boxed(error),
    ))
}

/// Passes when the whole string does not match `pattern`.
///
/// # Errors
///
/// [`ConfigurationError::InvalidPattern`] if `pattern` does not compile.
pub fn not_matches_pattern<T, E>(pattern: &str) -> Result<Constraint<T, E>, ConfigurationError>
where
    T: AsRef<str> + Send + 'static,
    E: Send + 'static,
{
    let regex = full_match(pattern)?;
    Ok(predicate(move |s: &T| !regex.is_match(s.as_ref()), None))
}

/// [`not_matches_pattern`] with an error factory.
///
/// # Errors
///
/// [`ConfigurationError::InvalidPattern`] if `pattern` does not compile.
pub fn not_matches_pattern_with<T, E>(
    pattern: &str,
    error: impl Fn(&T) -> E + Send + Sync + 'static,
) -> Result<Constraint<T, E>, ConfigurationError>
where
    T: AsRef<str> + Send + 'static,
    E: Send + 'static,
{
    let regex = full_match(pattern)?;
    Ok(predicate(
        move |s: &T| !regex.is_match(s.as_ref()),
        boxed(error),
    ))
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// Passes when `min <= value < max`.
#[must_use]
pub fn between<T, E>(min: T, max: T) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v >= min && *v < max, None)
}

/// [`between`] with an error factory.
#[must_use]
pub fn between_with<T, E>(
    min: T,
    max: T,
    error: impl Fn(&T) -> E + Send + Sync + 'static,
) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v >= min && *v < max, boxed(error))
}

/// Passes when `value > bound`.
#[must_use]
pub fn greater_than<T, E>(bound: T) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v > bound, None)
}

/// [`greater_than`] with an error factory.
#[must_use]
pub fn greater_than_with<T, E>(
    bound: T,
    error: impl Fn(&T) -> E + Send + Sync + 'static,
) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v > bound, boxed(error))
}

/// Passes when `value >= bound`.
#[must_use]
pub fn greater_than_or_equal_to<T, E>(bound: T) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v >= bound, None)
}

/// [`greater_than_or_equal_to`] with an error factory.
#[must_use]
pub fn greater_than_or_equal_to_with<T, E>(
    bound: T,
    error: impl Fn(&T) -> E + Send + Sync + 'static,
) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v >= bound, boxed(error))
}

/// Passes when `value < bound`.
#[must_use]
pub fn less_than<T, E>(bound: T) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v < bound, None)
}

/// [`less_than`] with an error factory.
#[must_use]
pub fn less_than_with<T, E>(
    bound: T,
    error: impl Fn(&T) -> E + Send + Sync + 'static,
) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v < bound, boxed(error))
}

/// Passes when `value <= bound`.
#[must_use]
pub fn less_than_or_equal_to<T, E>(bound: T) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v <= bound, None)
}

/// [`less_than_or_equal_to`] with an error factory.
#[must_use]
pub fn less_than_or_equal_to_with<T, E>(
    bound: T,
    error: impl Fn(&T) -> E + Send + Sync + 'static,
) -> Constraint<T, E>
where
    T: PartialOrd + Send + Sync + 'static,
    E: Send + 'static,
{
    predicate(move |v: &T| *v <= bound, boxed(error))
}

// ---------------------------------------------------------------------------
// Observed bounds
// ---------------------------------------------------------------------------

/// Passes when `min <= value < max`, reading both bounds from observables.
///
/// Both observables are registered as dependencies, so changing a bound
/// re-runs the constraint.
#[must_use]
pub fn between_observed<T, E>(min: &Observable<T>, max: &Observable<T>) -> Constraint<T, E>
where
    T: PartialOrd + Clone + Send + 'static,
    E: Send + 'static,
{
    between_observed_inner(min, max, None)
}

/// [`between_observed`] with an error factory.
#[must_use]
pub fn between_observed_with<T, E>(
    min: &Observable<T>,
    max: &Observable<T>,
    error: impl Fn(&T) -> E + Send + Sync + 'static,
) -> Constraint<T, E>
where
    T: PartialOrd + Clone + Send + 'static,
    E: Send + 'static,
{
    between_observed_inner(min, max, boxed(error))
}

fn between_observed_inner<T, E>(
    min: &Observable<T>,
    max: &Observable<T>,
    error: Option<ErrorFn<T, E>>,
) -> Constraint<T, E>
where
    T: PartialOrd + Clone + Send + 'static,
    E: Send + 'static,
{
    let (lo, hi) = (min.clone(), max.clone());
    predicate(
        move |v: &T| lo.with(|lo| v >= lo) && hi.with(|hi| v < hi),
        error,
    )
    .with_dependency(min)
    .with_dependency(max)
}

/// Passes when `value > bound`, reading the bound from an observable.
#[must_use]
pub fn greater_than_observed<T, E>(bound: &Observable<T>) -> Constraint<T, E>
where
    T: PartialOrd + Clone + Send + 'static,
    E: Send + 'static,
{
    let observed = bound.clone();
    predicate(move |v: &T| observed.with(|b| v > b), None).with_dependency(bound)
}

/// Passes when `value < bound`, reading the bound from an observable.
#[must_use]
pub fn less_than_observed<T, E>(bound: &Observable<T>) -> Constraint<T, E>
where
    T: PartialOrd + Clone + Send + 'static,
    E: Send + 'static,
{
    let observed = bound.clone();
    predicate(move |v: &T| observed.with(|b| v < b), None).with_dependency(bound)
}
