//! # cloudsec-token
//!
//! Validation of access tokens issued by XSUAA and IAS.
//!
//! A resource server decodes the bearer token into a [`Token`] and runs it
//! through a validator chain built from its [`TrustConfiguration`]:
//!
//! 1. **Trusted issuer** - the `jku` header (XSUAA) or the issuer (IAS) must
//!    lie inside a trusted domain before any key is fetched.
//! 2. **Signature** - RS256 or ES256, with keys from a TTL/LRU cache in front
//!    of the identity service's key endpoint.
//! 3. **Expiration** - `exp` and `nbf`, with optional leeway.
//! 4. **Audience** - the token must be issued for a trusted client id.
//! 5. **Zone** - the token must belong to the configured zone or tenant.
//!
//! Certificate-bound tokens are checked by adding an [`X5tValidator`] for the
//! caller's client certificate with [`ValidatorBuilder::with`].
//!
//! ## Architecture
//!
//! - [`token`] - Compact JWS decoding and claim access
//! - [`validation`] - [`Validator`] trait, [`ValidationResult`], [`CombiningValidator`]
//! - [`validators`] - The individual checks
//! - [`jwks`] - [`JwksKeyCache`]
//! - [`key_service`] - Key set download and OIDC discovery
//! - [`config`] - [`TrustConfiguration`] and [`CacheConfiguration`]
//! - [`builder`] - [`ValidatorBuilder`]
//!
//! ## Example
//!
//! ```no_run
//! use cloudsec_token::{Service, Token, TrustConfiguration, ValidatorBuilder, Validator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TrustConfiguration::builder(Service::Xsuaa)
//!     .client_id("sb-my-app!t1")
//!     .url("https://tenant.authentication.eu10.hana.ondemand.com".parse()?)
//!     .domain("authentication.eu10.hana.ondemand.com")
//!     .build()?;
//! let validator = ValidatorBuilder::new(config).build()?;
//!
//! let token = Token::decode("eyJ...")?;
//! let result = validator.validate(&token);
//! if let Some(error) = result.error() {
//!     eprintln!("rejected: {error} (retryable: {})", error.is_retryable());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! All I/O is blocking. Async servers run validation on a blocking thread.

pub mod builder;
pub mod config;
pub mod error;
pub mod jwks;
pub mod key_service;
pub mod token;
pub mod validation;
pub mod validators;

pub use cloudsec_keys as keys;

pub use builder::ValidatorBuilder;
pub use config::{
    CacheConfiguration, RECOMMENDED_MIN_SIZE, RECOMMENDED_MIN_TTL, Service, TrustConfiguration,
    TrustConfigurationBuilder,
};
pub use error::{ConfigError, KeyServiceError, Result, ValidationError};
pub use jwks::{CacheStats, JwksKeyCache};
pub use key_service::{
    CachingOidcConfigurationService, HttpOidcConfigurationService, HttpTokenKeyService,
    OidcConfigurationService, TokenKeyService,
};
pub use token::{Token, claims};
pub use validation::{CombiningValidator, ValidationListener, ValidationResult, Validator};
pub use validators::{
    AudienceValidator, Clock, ExpirationValidator, SignatureValidator, TrustedIssuerGuard,
    X5tValidator, ZoneValidator, certificate_thumbprint,
};
