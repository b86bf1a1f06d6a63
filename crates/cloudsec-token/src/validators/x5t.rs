//! Certificate-bound tokens (RFC 8705)
//!
//! A token issued to a client that authenticated with mTLS carries the
//! SHA-256 thumbprint of that client certificate in `cnf["x5t#S256"]`. The
//! caller presenting the token must present the same certificate.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use cloudsec_keys::{der, pem};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::{ConfigError, ValidationError};
use crate::token::{Token, claims};
use crate::validation::{ValidationResult, Validator};

/// Base64url SHA-256 thumbprint of a DER certificate
pub fn certificate_thumbprint(der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(der))
}

/// Accepts only tokens bound to the client certificate of the caller
#[derive(Debug, Clone)]
pub struct X5tValidator {
    thumbprint: String,
}

impl X5tValidator {
    /// Validator for the caller's certificate.
    ///
    /// Accepts a PEM chain (leaf first) as well as the bare base64 DER that
    /// proxies forward in client certificate headers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ClientCertificate`] when no certificate can be
    /// decoded or the leaf is not a single DER SEQUENCE.
    pub fn from_pem(certificate: &str) -> Result<Self, ConfigError> {
        let invalid = |e: cloudsec_keys::KeyError| ConfigError::ClientCertificate(e.to_string());
        if pem::normalize(certificate).contains("-----BEGIN ") {
            let blocks = pem::decode_blocks(certificate).map_err(invalid)?;
            let leaf = blocks
                .first()
                .filter(|b| b.label() == pem::LABEL_CERTIFICATE)
                .ok_or_else(|| {
                    ConfigError::ClientCertificate("first PEM block is not a certificate".into())
                })?;
            return Self::from_der(leaf.der());
        }

        let body = pem::strip_markers(certificate);
        if body.is_empty() {
            return Err(ConfigError::ClientCertificate("certificate is empty".into()));
        }
        let der = STANDARD
            .decode(body.as_bytes())
            .map_err(|e| ConfigError::ClientCertificate(e.to_string()))?;
        Self::from_der(&der)
    }

    /// Validator for a DER certificate
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ClientCertificate`] when `der` is not a single
    /// DER SEQUENCE.
    pub fn from_der(der: &[u8]) -> Result<Self, ConfigError> {
        der::check_single_sequence(der)
            .map_err(|e| ConfigError::ClientCertificate(e.to_string()))?;
        Ok(Self {
            thumbprint: certificate_thumbprint(der),
        })
    }

    /// Thumbprint of the client certificate
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }
}

impl Validator<Token> for X5tValidator {
    fn validate(&self, token: &Token) -> ValidationResult {
        let token_x5t = token
            .claim(claims::CNF)
            .and_then(|cnf| cnf.get(claims::CNF_X5T))
            .and_then(|x5t| x5t.as_str());
        let Some(token_x5t) = token_x5t else {
            return ValidationResult::invalid(ValidationError::CertificateMismatch(
                "token doesn't contain a certificate thumbprint confirmation".into(),
            ));
        };

        if bool::from(token_x5t.as_bytes().ct_eq(self.thumbprint.as_bytes())) {
            debug!("Token is bound to the client certificate");
            return ValidationResult::VALID;
        }
        ValidationResult::invalid(ValidationError::CertificateMismatch(format!(
            "token 'cnf' thumbprint '{token_x5t}' != client certificate thumbprint '{}'",
            self.thumbprint
        )))
    }

    fn name(&self) -> &str {
        "X5tValidator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    // SEQUENCE { INTEGER 0 }
    const CERT_DER: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x00];
    const CERT_PEM: &str = "-----BEGIN CERTIFICATE-----\nMAMCAQA=\n-----END CERTIFICATE-----\n";
    const CERT_X5T: &str = "tWCDPW94evRhE7lqrU3VtdGuANzMac8wzJK-1lHFZhc";
    // SEQUENCE { INTEGER 1 }
    const OTHER_CERT_BASE64: &str = "MAMCAQE=";
    const OTHER_CERT_X5T: &str = "G2X2ilIshYcV9d2VHNBALcFmkXeIFL8HWYIreiV0IdA";

    fn token(payload: Value) -> Token {
        Token::decode(&format!(
            "{}.{}.c2ln",
            URL_SAFE_NO_PAD.encode(json!({"alg": "RS256"}).to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        ))
        .unwrap()
    }

    #[test]
    fn test_thumbprint_is_base64url_sha256_of_der() {
        assert_eq!(certificate_thumbprint(&CERT_DER), CERT_X5T);
        assert_eq!(X5tValidator::from_der(&CERT_DER).unwrap().thumbprint(), CERT_X5T);
    }

    #[test]
    fn test_certificate_formats() {
        assert_eq!(X5tValidator::from_pem(CERT_PEM).unwrap().thumbprint(), CERT_X5T);
        assert_eq!(
            X5tValidator::from_pem(&CERT_PEM.replace('\n', "\\n")).unwrap().thumbprint(),
            CERT_X5T
        );
        assert_eq!(X5tValidator::from_pem("MAMCAQA=").unwrap().thumbprint(), CERT_X5T);
        assert_eq!(
            X5tValidator::from_pem(OTHER_CERT_BASE64).unwrap().thumbprint(),
            OTHER_CERT_X5T
        );
    }

    #[test]
    fn test_leaf_of_chain_is_used() {
        let other = pem::encode(pem::LABEL_CERTIFICATE, &[0x30, 0x03, 0x02, 0x01, 0x01]);
        let chain = format!("{CERT_PEM}{}", other.as_str());
        assert_eq!(X5tValidator::from_pem(&chain).unwrap().thumbprint(), CERT_X5T);
    }

    #[test]
    fn test_rejects_invalid_certificates() {
        let key = "-----BEGIN PUBLIC KEY-----\nMAMCAQA=\n-----END PUBLIC KEY-----";
        for certificate in ["", "   ", "not base64!", "AgEA", key] {
            assert!(
                matches!(
                    X5tValidator::from_pem(certificate),
                    Err(ConfigError::ClientCertificate(_))
                ),
                "{certificate:?}"
            );
        }
    }

    #[test]
    fn test_matching_thumbprint() {
        let validator = X5tValidator::from_pem(CERT_PEM).unwrap();
        let result = validator.validate(&token(json!({"cnf": {"x5t#S256": CERT_X5T}})));
        assert!(result.is_valid(), "{:?}", result.error_description());
    }

    #[test]
    fn test_foreign_thumbprint() {
        let validator = X5tValidator::from_pem(CERT_PEM).unwrap();
        let result = validator.validate(&token(json!({"cnf": {"x5t#S256": OTHER_CERT_X5T}})));
        assert!(matches!(result.error(), Some(ValidationError::CertificateMismatch(_))));
        assert!(!result.is_retryable());
        assert!(result.error_description().unwrap().contains(OTHER_CERT_X5T));
    }

    #[test]
    fn test_missing_confirmation() {
        let validator = X5tValidator::from_pem(CERT_PEM).unwrap();
        for payload in [
            json!({}),
            json!({"cnf": "x5t"}),
            json!({"cnf": {"jkt": CERT_X5T}}),
            json!({"cnf": {"x5t#S256": 42}}),
        ] {
            let result = validator.validate(&token(payload.clone()));
            assert!(
                matches!(result.error(), Some(ValidationError::CertificateMismatch(_))),
                "{payload}"
            );
            assert!(!result.is_retryable());
        }
    }
}
