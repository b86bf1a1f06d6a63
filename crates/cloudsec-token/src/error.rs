//! Error types for token validation
//!
//! Every failing validation step maps to one [`ValidationError`] kind. The
//! messages are safe to log: they never contain the encoded token or its
//! signature.

use thiserror::Error;

use cloudsec_keys::KeyError;

/// Why a token was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Not a compact JWS with three decodable segments and JSON objects
    #[error("Jwt token is malformed: {0}")]
    MalformedToken(String),

    /// Header `alg` other than RS256 or ES256
    #[error("Jwt token with signature algorithm '{0}' is not supported")]
    UnsupportedAlgorithm(String),

    /// Verification keys could not be obtained; retrying later may succeed
    #[error("Error retrieving Json Web Keys from Identity Service: {0}")]
    KeyResolution(String),

    /// Issuer or key endpoint outside the trusted domains
    #[error("Issuer is not trusted: {0}")]
    UntrustedIssuer(String),

    /// Signature does not match the signing input
    #[error("Signature of Jwt Token is not valid: {0}")]
    SignatureMismatch(String),

    /// `exp` missing or in the past
    #[error("{}", or_default(.0, "Jwt token is expired"))]
    ExpiredToken(String),

    /// `nbf` (or `iat`) in the future
    #[error("{}", or_default(.0, "Jwt token is not yet valid"))]
    NotYetValid(String),

    /// No audience matches a trusted client id
    #[error("Jwt token audience is not trusted: {0}")]
    AudienceMismatch(String),

    /// Token belongs to another zone or tenant
    #[error("Jwt token zone is not accepted: {0}")]
    ZoneMismatch(String),

    /// `cnf` thumbprint missing or not the one of the client certificate
    #[error("Certificate thumbprint validation failed: {0}")]
    CertificateMismatch(String),

    /// Raised by application-provided validators
    #[error("{}", or_default(.0, "Jwt token was rejected by a custom validator"))]
    Custom(String),
}

impl ValidationError {
    /// Whether the same token may validate when retried later.
    ///
    /// Only key retrieval failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::KeyResolution(_))
    }

    /// Create an error for a custom validator
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

// Invalid results always carry a description
fn or_default<'a>(message: &'a str, default: &'a str) -> &'a str {
    if message.trim().is_empty() { default } else { message }
}

/// Failures of the remote key and discovery endpoints
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyServiceError {
    /// The request could not be sent or the body not read
    #[error("request to {uri} failed: {message}")]
    Transport {
        /// Requested endpoint
        uri: String,
        /// Transport error
        message: String,
    },

    /// Non-success HTTP status
    #[error("request to {uri} returned status {status}")]
    Status {
        /// Requested endpoint
        uri: String,
        /// HTTP status code
        status: u16,
    },

    /// The response body was not what the endpoint promises
    #[error("invalid response from {uri}: {message}")]
    InvalidResponse {
        /// Requested endpoint
        uri: String,
        /// Parse failure
        message: String,
    },
}

/// Invalid trust or cache configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is missing or inconsistent
    #[error("invalid trust configuration: {0}")]
    Invalid(String),

    /// The configuration document is not valid JSON for this schema
    #[error("failed to parse trust configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The configured verification key cannot be parsed
    #[error("invalid verification key: {0}")]
    VerificationKey(#[from] KeyError),

    /// The client certificate is not a DER certificate in PEM or base64
    #[error("invalid client certificate: {0}")]
    ClientCertificate(String),

    /// The default HTTP transport could not be created
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),
}

impl From<reqwest::Error> for ConfigError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient(err.to_string())
    }
}

/// Result alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
