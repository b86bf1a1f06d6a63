//! # cloudsec-keys
//!
//! Key material handling for cloud identity service tokens.
//!
//! ## Architecture
//!
//! - `der` - Minimal DER reader for PKCS#1 `RSAPrivateKey` structures
//! - `pem` - PEM block decoding that tolerates escaped and missing line breaks
//! - `jwk` - JSON Web Keys, key sets and [`VerificationKey`]
//! - `mtls` - Client identities and mutual-TLS HTTP clients
//!
//! Signature verification is delegated to `jsonwebtoken`; this crate only
//! turns the various published key formats into its `DecodingKey`.

pub mod der;
pub mod error;
pub mod jwk;
pub mod mtls;
pub mod pem;

pub use der::{DerReader, Pkcs1Components, parse_pkcs1_private_key, rsa_private_key_from_pkcs1};
pub use error::{KeyError, Result};
pub use jwk::{
    DEFAULT_KEY_ID, JsonWebKey, JsonWebKeySet, KeyType, SignatureAlgorithm, VerificationKey,
};
pub use mtls::{ClientIdentity, TlsClientIdentity, build_http_client};
