//! JSON Web Keys (RFC 7517) and verification keys
//!
//! Identity services publish their token signing keys as a JSON Web Key Set.
//! XSUAA keys carry RSA components (`n`, `e`) and usually a PEM `value` as
//! well; IAS keys may be RSA or EC (`x`, `y` on P-256). Each usable entry is
//! converted into a [`VerificationKey`] that wraps a `jsonwebtoken`
//! [`DecodingKey`].

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::DecodePublicKey as _;
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey as _;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KeyError, Result};
use crate::pem;

/// Key id assumed when a token header or a key set entry carries none
pub const DEFAULT_KEY_ID: &str = "default-kid";

/// Key families used for token signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// RSA keys (`kty: RSA`)
    #[serde(rename = "RSA")]
    Rsa,
    /// Elliptic curve keys (`kty: EC`)
    #[serde(rename = "EC")]
    Ec,
}

impl KeyType {
    /// `kty` value as defined in RFC 7518
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::Ec => "EC",
        }
    }

    /// Parse a `kty` value
    pub fn from_kty(kty: &str) -> Option<Self> {
        match kty {
            "RSA" => Some(Self::Rsa),
            "EC" => Some(Self::Ec),
            _ => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token signature algorithms accepted by the validators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256,
    /// ECDSA on P-256 with SHA-256
    ES256,
}

impl SignatureAlgorithm {
    /// Map a JWS `alg` header value; anything else is unsupported
    pub fn from_jws(alg: &str) -> Option<Self> {
        match alg {
            "RS256" => Some(Self::RS256),
            "ES256" => Some(Self::ES256),
            _ => None,
        }
    }

    /// JWS `alg` value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
        }
    }

    /// Key family that produces this algorithm's signatures
    pub fn key_type(self) -> KeyType {
        match self {
            Self::RS256 => KeyType::Rsa,
            Self::ES256 => KeyType::Ec,
        }
    }

    /// Corresponding `jsonwebtoken` algorithm
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::ES256 => Algorithm::ES256,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A public key ready for signature verification
#[derive(Clone)]
pub struct VerificationKey {
    key_type: KeyType,
    key_id: String,
    algorithm: Option<SignatureAlgorithm>,
    decoding_key: DecodingKey,
}

impl VerificationKey {
    /// Wrap an existing decoding key
    pub fn new(key_type: KeyType, key_id: impl Into<String>, decoding_key: DecodingKey) -> Self {
        Self {
            key_type,
            key_id: key_id.into(),
            algorithm: None,
            decoding_key,
        }
    }

    /// Restrict the key to one algorithm (from the JWK `alg` member)
    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// Build an RSA key from big-endian modulus and exponent bytes
    pub fn from_rsa_components(key_id: impl Into<String>, modulus: &[u8], exponent: &[u8]) -> Self {
        Self::new(
            KeyType::Rsa,
            key_id,
            DecodingKey::from_rsa_raw_components(modulus, exponent),
        )
    }

    /// Build a P-256 key from base64url-encoded affine coordinates
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKey`] when the coordinates are not valid
    /// base64url.
    pub fn from_ec_components(key_id: impl Into<String>, x: &str, y: &str) -> Result<Self> {
        Ok(Self::new(
            KeyType::Ec,
            key_id,
            DecodingKey::from_ec_components(x, y)?,
        ))
    }

    /// Parse a PEM or bare-base64 SubjectPublicKeyInfo.
    ///
    /// The key family is detected from the encoded algorithm identifier: RSA
    /// is tried first, then P-256.
    ///
    /// # Errors
    ///
    /// Fails when the text is not base64, or the DER is neither an RSA nor a
    /// P-256 public key.
    pub fn from_public_key_pem(key_id: impl Into<String>, text: &str) -> Result<Self> {
        let body = pem::strip_markers(text);
        let der = base64::engine::general_purpose::STANDARD.decode(body.as_bytes())?;
        Self::from_public_key_der(key_id, &der)
    }

    /// Parse a DER-encoded SubjectPublicKeyInfo (RSA or P-256)
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::UnsupportedKeyType`] when the DER holds neither an
    /// RSA nor a P-256 public key.
    pub fn from_public_key_der(key_id: impl Into<String>, der: &[u8]) -> Result<Self> {
        let key_id = key_id.into();
        if let Ok(rsa_key) = RsaPublicKey::from_public_key_der(der) {
            return Ok(Self::from_rsa_components(
                key_id,
                &rsa_key.n().to_bytes_be(),
                &rsa_key.e().to_bytes_be(),
            ));
        }
        if let Ok(ec_key) = p256::PublicKey::from_public_key_der(der) {
            let point = ec_key.to_encoded_point(false);
            let (Some(x), Some(y)) = (point.x(), point.y()) else {
                return Err(KeyError::InvalidKey("EC public key is the identity point".into()));
            };
            return Self::from_ec_components(key_id, &URL_SAFE_NO_PAD.encode(x), &URL_SAFE_NO_PAD.encode(y));
        }
        Err(KeyError::UnsupportedKeyType(
            "public key is neither RSA nor P-256".into(),
        ))
    }

    /// Key family
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Key id this key was published under
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Algorithm restriction, if the key set declared one
    pub fn algorithm(&self) -> Option<SignatureAlgorithm> {
        self.algorithm
    }

    /// Underlying `jsonwebtoken` key
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Whether this key may verify signatures made with `algorithm`
    pub fn supports(&self, algorithm: SignatureAlgorithm) -> bool {
        algorithm.key_type() == self.key_type && self.algorithm.is_none_or(|a| a == algorithm)
    }

    /// Verify a base64url `signature` over `message`.
    ///
    /// Returns `Ok(false)` when the signature does not match.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Verification`] when the algorithm does not fit this
    /// key or the signature cannot be decoded.
    pub fn verify(&self, message: &[u8], signature: &str, algorithm: SignatureAlgorithm) -> Result<bool> {
        if !self.supports(algorithm) {
            return Err(KeyError::Verification(format!(
                "{} key '{}' cannot verify {} signatures",
                self.key_type, self.key_id, algorithm
            )));
        }
        jsonwebtoken::crypto::verify(signature, message, &self.decoding_key, algorithm.to_jwt_algorithm())
            .map_err(|e| KeyError::Verification(e.to_string()))
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("key_type", &self.key_type)
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// One entry of a JSON Web Key Set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type (`RSA`, `EC`, ...)
    pub kty: String,
    /// Key id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Algorithm the key is meant for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Public key use (`sig`)
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// PEM encoded public key (XSUAA extension)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl JsonWebKey {
    /// Key id, falling back to [`DEFAULT_KEY_ID`]
    pub fn key_id(&self) -> &str {
        self.kid.as_deref().unwrap_or(DEFAULT_KEY_ID)
    }

    /// Parsed key type
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::UnsupportedKeyType`] for any `kty` other than
    /// `RSA` or `EC`.
    pub fn key_type(&self) -> Result<KeyType> {
        KeyType::from_kty(&self.kty).ok_or_else(|| KeyError::UnsupportedKeyType(self.kty.clone()))
    }

    /// Convert into a [`VerificationKey`].
    ///
    /// RSA keys use `n`/`e` when present and the PEM `value` otherwise. EC
    /// keys require `crv: P-256` with `x`/`y`, or a PEM `value`.
    ///
    /// # Errors
    ///
    /// Fails for unsupported key types or curves, missing members, and
    /// undecodable key material.
    pub fn to_verification_key(&self) -> Result<VerificationKey> {
        let kid = self.key_id();
        let key_type = self.key_type()?;
        let key = match key_type {
            KeyType::Rsa => match (&self.n, &self.e, &self.value) {
                (Some(n), Some(e), _) => {
                    let modulus = URL_SAFE_NO_PAD.decode(n.trim_end_matches('='))?;
                    let exponent = URL_SAFE_NO_PAD.decode(e.trim_end_matches('='))?;
                    VerificationKey::from_rsa_components(kid, &modulus, &exponent)
                }
                (_, _, Some(value)) => VerificationKey::from_public_key_pem(kid, value)?,
                _ => {
                    return Err(self.incomplete("RSA key requires 'n' and 'e' or a PEM 'value'"));
                }
            },
            KeyType::Ec => {
                if let Some(crv) = &self.crv
                    && crv != "P-256"
                {
                    return Err(KeyError::UnsupportedKeyType(format!("EC curve {crv}")));
                }
                match (&self.x, &self.y, &self.value) {
                    (Some(x), Some(y), _) => VerificationKey::from_ec_components(kid, x, y)?,
                    (_, _, Some(value)) => VerificationKey::from_public_key_pem(kid, value)?,
                    _ => {
                        return Err(self.incomplete("EC key requires 'x' and 'y' or a PEM 'value'"));
                    }
                }
            }
        };

        if key.key_type() != key_type {
            return Err(self.incomplete("PEM 'value' does not match 'kty'"));
        }

        match self.alg.as_deref() {
            None => Ok(key),
            Some(alg) => match SignatureAlgorithm::from_jws(alg) {
                Some(algorithm) if algorithm.key_type() == key_type => Ok(key.with_algorithm(algorithm)),
                Some(_) => Err(self.incomplete("'alg' does not match 'kty'")),
                None => Err(KeyError::UnsupportedKeyType(format!("{} with alg {alg}", self.kty))),
            },
        }
    }

    fn incomplete(&self, reason: &str) -> KeyError {
        KeyError::IncompleteKey {
            kid: self.key_id().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A JSON Web Key Set document (`{"keys": [...]}`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Published keys
    #[serde(default)]
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    /// Parse a key set document
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKeySet`] when the text is not a JSON object
    /// with a `keys` array.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert every usable entry; unusable entries are skipped and logged
    pub fn verification_keys(&self) -> Vec<VerificationKey> {
        self.keys
            .iter()
            .filter_map(|jwk| match jwk.to_verification_key() {
                Ok(key) => Some(key),
                Err(e) => {
                    debug!(kid = jwk.key_id(), kty = %jwk.kty, error = %e, "Skipping unusable JSON web key");
                    None
                }
            })
            .collect()
    }

    /// Find the key published under `key_id` for `key_type`
    ///
    /// # Errors
    ///
    /// Returns the conversion error when the matching entry is unusable.
    pub fn find(&self, key_id: &str, key_type: KeyType) -> Result<Option<VerificationKey>> {
        self.keys
            .iter()
            .find(|jwk| jwk.key_id() == key_id && jwk.key_type().ok() == Some(key_type))
            .map(JsonWebKey::to_verification_key)
            .transpose()
    }
}
