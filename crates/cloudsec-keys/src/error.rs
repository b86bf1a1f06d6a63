//! Error types for key material handling

use thiserror::Error;

/// Errors raised while parsing or converting key material
#[derive(Debug, Error)]
pub enum KeyError {
    /// A DER length octet sequence is not a supported short or long form
    #[error("invalid DER length encoding at offset {offset}")]
    InvalidLength {
        /// Offset of the first length octet
        offset: usize,
    },

    /// Input ended before a complete DER element was read
    #[error("unexpected end of DER input at offset {offset}: {needed} more bytes required")]
    UnexpectedEof {
        /// Offset at which the read started
        offset: usize,
        /// Number of bytes that were missing
        needed: usize,
    },

    /// A DER element carries a different tag than expected
    #[error("unexpected DER tag 0x{found:02x} at offset {offset}, expected 0x{expected:02x}")]
    UnexpectedTag {
        /// Tag that was required
        expected: u8,
        /// Tag that was found
        found: u8,
        /// Offset of the tag octet
        offset: usize,
    },

    /// A DER INTEGER that must be non-negative has its sign bit set
    #[error("negative DER INTEGER at offset {offset}")]
    NegativeInteger {
        /// Offset of the INTEGER tag
        offset: usize,
    },

    /// PKCS#1 private key with a version other than 0 (two-prime)
    #[error("unsupported PKCS#1 private key version {0}, only version 0 is supported")]
    UnsupportedVersion(String),

    /// Structurally broken PEM text
    #[error("invalid PEM: {0}")]
    InvalidPem(String),

    /// Base64 payload could not be decoded
    #[error("invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Key type (`kty`) or PEM label this crate does not handle
    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    /// A JSON Web Key lacks the members required for its key type
    #[error("incomplete JSON web key '{kid}': {reason}")]
    IncompleteKey {
        /// Key identifier of the offending key
        kid: String,
        /// Missing or inconsistent members
        reason: String,
    },

    /// Key material was well-formed but cryptographically unusable
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// JSON Web Key Set document could not be parsed
    #[error("invalid JSON web key set: {0}")]
    InvalidKeySet(#[from] serde_json::Error),

    /// Signature verification could not be performed
    #[error("signature verification failed: {0}")]
    Verification(String),

    /// mTLS client identity could not be assembled
    #[error("TLS client identity error: {0}")]
    Tls(String),
}

impl From<rsa::Error> for KeyError {
    fn from(err: rsa::Error) -> Self {
        Self::InvalidKey(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for KeyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidKey(err.to_string())
    }
}

/// Result alias for key material operations
pub type Result<T> = std::result::Result<T, KeyError>;
