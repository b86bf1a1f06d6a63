//! Token lifetime checks (`exp`, `nbf`)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::ValidationError;
use crate::token::Token;
use crate::validation::{ValidationResult, Validator};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Rejects expired tokens and tokens that are not valid yet
///
/// A token is expired when `exp + leeway <= now`. It is not valid yet when
/// `nbf - leeway > now`; tokens without `nbf` use `iat` instead. A token
/// without `exp` is treated as expired.
#[derive(Clone)]
pub struct ExpirationValidator {
    leeway: TimeDelta,
    clock: Clock,
}

impl Default for ExpirationValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpirationValidator {
    /// Validator without leeway using the system clock
    pub fn new() -> Self {
        Self {
            leeway: TimeDelta::zero(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Tolerated clock skew
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = TimeDelta::from_std(leeway).unwrap_or(TimeDelta::MAX);
        self
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Configured leeway
    pub fn leeway(&self) -> Duration {
        self.leeway.to_std().unwrap_or(Duration::ZERO)
    }

    fn check(&self, token: &Token) -> Result<(), ValidationError> {
        let now = (self.clock)();

        let expiration = token.expiration().ok_or_else(|| {
            ValidationError::ExpiredToken("Jwt has no 'exp' claim and is treated as expired".into())
        })?;
        let expires = expiration.checked_add_signed(self.leeway).unwrap_or(DateTime::<Utc>::MAX_UTC);
        if expires <= now {
            return Err(ValidationError::ExpiredToken(format!(
                "Jwt expired at {}, time now: {}",
                expiration.to_rfc3339(),
                now.to_rfc3339()
            )));
        }

        if let Some(not_before) = token.not_before().or_else(|| token.issued_at()) {
            let starts = not_before
                .checked_sub_signed(self.leeway)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            if starts > now {
                return Err(ValidationError::NotYetValid(format!(
                    "Jwt is not valid before {}, time now: {}",
                    not_before.to_rfc3339(),
                    now.to_rfc3339()
                )));
            }
        }
        Ok(())
    }
}

impl Validator<Token> for ExpirationValidator {
    fn validate(&self, token: &Token) -> ValidationResult {
        self.check(token).into()
    }

    fn name(&self) -> &str {
        "ExpirationValidator"
    }
}

impl fmt::Debug for ExpirationValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpirationValidator")
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}
