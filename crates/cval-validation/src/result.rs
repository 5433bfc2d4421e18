#![forbid(unsafe_code)]

//! Validation outcomes.

/// The outcome of one constraint evaluation: a validity flag plus an optional
/// diagnostic.
///
/// A diagnostic on an invalid result is an *error*; a diagnostic on a valid
/// result is a *warning*.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidationResult<E> {
    valid: bool,
    info: Option<E>,
}

impl<E> Default for ValidationResult<E> {
    fn default() -> Self {
        Self::VALID
    }
}

impl<E> ValidationResult<E> {
    /// Valid, no diagnostic.
    pub const VALID: Self = Self {
        valid: true,
        info: None,
    };

    /// Invalid, no diagnostic.
    pub const INVALID: Self = Self {
        valid: false,
        info: None,
    };

    /// Create a result with an optional diagnostic.
    #[must_use]
    pub const fn new(valid: bool, info: Option<E>) -> Self {
        Self { valid, info }
    }

    /// Valid, no diagnostic.
    #[must_use]
    pub const fn valid() -> Self {
        Self::VALID
    }

    /// Invalid, no diagnostic.
    #[must_use]
    pub const fn invalid() -> Self {
        Self::INVALID
    }

    /// Valid with a warning.
    #[must_use]
    pub const fn warning(info: E) -> Self {
        Self {
            valid: true,
            info: Some(info),
        }
    }

    /// Invalid with an error.
    #[must_use]
    pub const fn error(info: E) -> Self {
        Self {
            valid: false,
            info: Some(info),
        }
    }

    /// Valid or invalid without a diagnostic.
    #[must_use]
    pub const fn from_bool(valid: bool) -> Self {
        Self { valid, info: None }
    }

    /// Returns `true` if the value passed.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns `true` if the value failed.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        !self.valid
    }

    /// The diagnostic, if any.
    #[must_use]
    pub const fn info(&self) -> Option<&E> {
        self.info.as_ref()
    }

    /// Split into the flag and the diagnostic.
    #[must_use]
    pub fn into_parts(self) -> (bool, Option<E>) {
        (self.valid, self.info)
    }

    /// Transform the diagnostic, keeping the flag.
    #[must_use]
    pub fn map_info<F>(self, f: impl FnOnce(E) -> F) -> ValidationResult<F> {
        ValidationResult {
            valid: self.valid,
            info: self.info.map(f),
        }
    }
}

/// Coarse validation state of a constrained value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValidationState {
    /// Not yet known (never validated, or still validating without failures).
    #[default]
    Unknown,
    /// Every constraint passed.
    Valid,
    /// At least one constraint failed.
    Invalid,
}

impl ValidationState {
    /// Parse a lowercase state name, as used by environment configuration.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "valid" => Some(Self::Valid),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }
}
