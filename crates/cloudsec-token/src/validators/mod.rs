//! Token validators
//!
//! Each validator checks one aspect of a [`Token`](crate::Token); the
//! [`ValidatorBuilder`](crate::ValidatorBuilder) chains them in a
//! [`CombiningValidator`](crate::CombiningValidator).

pub mod audience;
pub mod expiration;
pub mod signature;
pub mod trusted_issuer;
pub mod x5t;
pub mod zone;

pub use audience::AudienceValidator;
pub use expiration::{Clock, ExpirationValidator};
pub use signature::SignatureValidator;
pub use trusted_issuer::TrustedIssuerGuard;
pub use x5t::{X5tValidator, certificate_thumbprint};
pub use zone::ZoneValidator;
