//! Validator abstraction and validation outcomes
//!
//! A [`Validator`] inspects a value and returns a [`ValidationResult`].
//! Validators are composed with [`CombiningValidator`], which runs them in
//! order, stops at the first failure and reports the outcome to registered
//! [`ValidationListener`]s.

mod combining;

pub use combining::CombiningValidator;

use crate::error::ValidationError;

/// Outcome of a validation: valid, or invalid with one error
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ValidationResult {
    error: Option<ValidationError>,
}

impl ValidationResult {
    /// The shared valid outcome
    pub const VALID: Self = Self { error: None };

    /// Valid outcome
    pub const fn valid() -> Self {
        Self::VALID
    }

    /// Invalid outcome carrying `error`
    pub fn invalid(error: ValidationError) -> Self {
        Self { error: Some(error) }
    }

    /// Whether the value passed
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the value was rejected
    pub fn is_erroneous(&self) -> bool {
        self.error.is_some()
    }

    /// Rejection reason
    pub fn error(&self) -> Option<&ValidationError> {
        self.error.as_ref()
    }

    /// Human-readable rejection reason
    pub fn error_description(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// Whether retrying the same input later may succeed
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(ValidationError::is_retryable)
    }

    /// Convert into a `Result`, for `?` in callers
    ///
    /// # Errors
    ///
    /// Returns the rejection reason of an invalid outcome.
    pub fn into_result(self) -> Result<(), ValidationError> {
        match self.error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::VALID
    }
}

impl From<ValidationError> for ValidationResult {
    fn from(error: ValidationError) -> Self {
        Self::invalid(error)
    }
}

impl From<Result<(), ValidationError>> for ValidationResult {
    fn from(result: Result<(), ValidationError>) -> Self {
        match result {
            Ok(()) => Self::VALID,
            Err(error) => Self::invalid(error),
        }
    }
}

/// A single validation step
///
/// Closures `Fn(&T) -> ValidationResult` are validators too, which keeps
/// application specific checks short:
///
/// ```rust
/// use cloudsec_token::{Token, ValidationError, ValidationResult, Validator};
///
/// let has_subject = |token: &Token| {
///     if token.has_claim("sub") {
///         ValidationResult::VALID
///     } else {
///         ValidationResult::invalid(ValidationError::custom("token has no subject"))
///     }
/// };
/// # let _ = &has_subject as &dyn Validator<Token>;
/// ```
pub trait Validator<T: ?Sized>: Send + Sync {
    /// Validate `value`
    fn validate(&self, value: &T) -> ValidationResult;

    /// Name used in diagnostics
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

impl<T, F> Validator<T> for F
where
    T: ?Sized,
    F: Fn(&T) -> ValidationResult + Send + Sync,
{
    fn validate(&self, value: &T) -> ValidationResult {
        self(value)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Observer of validation outcomes.
///
/// Listeners run synchronously on the validating thread; a listener that
/// panics aborts the validation call.
pub trait ValidationListener: Send + Sync {
    /// Called once when a validation failed
    fn on_validation_error(&self, result: &ValidationResult);

    /// Called once when a validation succeeded
    fn on_validation_success(&self);
}
