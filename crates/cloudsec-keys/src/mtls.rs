//! Client identities and mutual-TLS HTTP clients
//!
//! Service bindings authenticate either with a client secret or with an X.509
//! certificate chain and its private key. Bindings usually carry the key as a
//! PKCS#1 `RSA PRIVATE KEY`, which is parsed with [`crate::der`] and re-encoded
//! as PKCS#8 before it is handed to the TLS stack.

use std::fmt;

use p256::pkcs8::EncodePrivateKey as _;
use reqwest::redirect::Policy;
use rsa::pkcs8::{EncodePrivateKey as _, LineEnding};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::der;
use crate::error::{KeyError, Result};
use crate::pem::{self, PemBlock};

/// Credentials of an OAuth client as found in a service binding
#[derive(Clone, Deserialize)]
pub struct ClientIdentity {
    /// OAuth client id
    #[serde(alias = "clientid")]
    pub client_id: String,
    /// Client secret, for secret-based authentication
    #[serde(default, alias = "clientsecret")]
    pub client_secret: Option<SecretString>,
    /// PEM certificate chain, for certificate-based authentication
    #[serde(default)]
    pub certificate: Option<String>,
    /// PEM private key belonging to `certificate`
    #[serde(default)]
    pub key: Option<SecretString>,
}

impl ClientIdentity {
    /// Secret-based identity
    pub fn with_secret(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(SecretString::new(client_secret.into())),
            certificate: None,
            key: None,
        }
    }

    /// Certificate-based identity
    pub fn with_certificate(
        client_id: impl Into<String>,
        certificate: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            certificate: Some(certificate.into()),
            key: Some(SecretString::new(key.into())),
        }
    }

    /// Whether both a certificate and a key are present
    pub fn is_certificate_based(&self) -> bool {
        self.certificate.as_deref().is_some_and(|c| !c.trim().is_empty())
            && self.key.as_ref().is_some_and(|k| !k.expose_secret().trim().is_empty())
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("certificate", &self.certificate.as_ref().map(|_| "<pem>"))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Certificate chain plus PKCS#8 private key, ready for a TLS client
pub struct TlsClientIdentity {
    certificates: Vec<PemBlock>,
    private_key_pem: Zeroizing<String>,
}

impl TlsClientIdentity {
    /// Build from a certificate-based [`ClientIdentity`]
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Tls`] when the identity carries no certificate or
    /// key, and the parsing errors of [`from_pem`](Self::from_pem).
    pub fn from_client_identity(identity: &ClientIdentity) -> Result<Self> {
        let (Some(certificate), Some(key)) = (&identity.certificate, &identity.key) else {
            return Err(KeyError::Tls(format!(
                "client '{}' is not configured for certificate-based authentication",
                identity.client_id
            )));
        };
        Self::from_pem(certificate, key.expose_secret())
    }

    /// Build from a PEM certificate chain and a PEM private key.
    ///
    /// The key may be PKCS#1 (`RSA PRIVATE KEY`), SEC1 (`EC PRIVATE KEY`) or
    /// PKCS#8 (`PRIVATE KEY`). Every certificate block must be a single DER
    /// SEQUENCE.
    ///
    /// # Errors
    ///
    /// Fails on malformed PEM or DER, unsupported key labels, and RSA keys
    /// whose components are inconsistent.
    pub fn from_pem(certificate_chain: &str, private_key: &str) -> Result<Self> {
        let blocks = pem::decode_blocks(certificate_chain)?;
        let mut certificates = Vec::with_capacity(blocks.len());
        for block in blocks {
            if block.label() != pem::LABEL_CERTIFICATE {
                return Err(KeyError::InvalidPem(format!(
                    "unexpected '{}' block in certificate chain",
                    block.label()
                )));
            }
            der::check_single_sequence(block.der())?;
            certificates.push(block);
        }

        let key_block = pem::decode_single(
            private_key,
            &[
                pem::LABEL_RSA_PRIVATE_KEY,
                pem::LABEL_PRIVATE_KEY,
                pem::LABEL_EC_PRIVATE_KEY,
            ],
        )?;
        let private_key_pem = to_pkcs8_pem(&key_block)?;

        debug!(
            certificates = certificates.len(),
            key_format = key_block.label(),
            "Loaded TLS client identity"
        );
        Ok(Self {
            certificates,
            private_key_pem,
        })
    }

    /// DER-encoded certificates, leaf first
    pub fn certificate_chain(&self) -> impl Iterator<Item = &[u8]> {
        self.certificates.iter().map(PemBlock::der)
    }

    /// Number of certificates in the chain
    pub fn certificate_count(&self) -> usize {
        self.certificates.len()
    }

    /// Private key as PKCS#8 PEM
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    /// Convert into a `reqwest` identity (key followed by the chain)
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Tls`] when the TLS backend rejects the PEM bundle.
    pub fn to_reqwest_identity(&self) -> Result<reqwest::Identity> {
        let mut bundle = Zeroizing::new(String::new());
        bundle.push_str(&self.private_key_pem);
        for certificate in &self.certificates {
            bundle.push_str(&certificate.to_pem());
        }
        reqwest::Identity::from_pem(bundle.as_bytes()).map_err(|e| KeyError::Tls(e.to_string()))
    }
}

impl fmt::Debug for TlsClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsClientIdentity")
            .field("certificates", &self.certificates.len())
            .finish_non_exhaustive()
    }
}

fn to_pkcs8_pem(block: &PemBlock) -> Result<Zeroizing<String>> {
    match block.label() {
        pem::LABEL_RSA_PRIVATE_KEY => {
            let key = der::rsa_private_key_from_pkcs1(block.der())?;
            key.to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| KeyError::InvalidKey(e.to_string()))
        }
        pem::LABEL_EC_PRIVATE_KEY => {
            let key = p256::SecretKey::from_sec1_der(block.der())
                .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
            key.to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| KeyError::InvalidKey(e.to_string()))
        }
        pem::LABEL_PRIVATE_KEY => Ok(block.to_pem()),
        other => Err(KeyError::UnsupportedKeyType(other.to_string())),
    }
}

/// Build a blocking HTTP client that presents `identity` during the TLS
/// handshake. Redirects are not followed.
///
/// # Errors
///
/// Returns [`KeyError::Tls`] when the identity or the client cannot be built.
pub fn build_http_client(identity: &TlsClientIdentity) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .use_rustls_tls()
        .identity(identity.to_reqwest_identity()?)
        .redirect(Policy::none())
        .build()
        .map_err(|e| KeyError::Tls(e.to_string()))
}
