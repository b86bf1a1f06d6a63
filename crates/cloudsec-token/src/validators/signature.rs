//! Signature validation with keys from the identity service
//!
//! ## Key lookup
//!
//! 1. `alg` must be RS256 or ES256; `kid` defaults to `default-kid`.
//! 2. The key endpoint is derived from the token:
//!    - XSUAA: the trusted `jku`, or `{url}/token_keys` of the configured
//!      instance when the token has none.
//!    - IAS: discovered from the trusted issuer (`ias_iss`, else `iss`).
//! 3. The key comes from the [`JwksKeyCache`], which fetches on a miss.
//! 4. If that fails and a verification key is configured, the configured
//!    key is used instead. In offline mode it is the only key.

use std::fmt;
use std::sync::Arc;

use cloudsec_keys::{DEFAULT_KEY_ID, SignatureAlgorithm, VerificationKey};
use tracing::{debug, warn};
use url::Url;

use crate::config::{Service, TrustConfiguration};
use crate::error::{ConfigError, ValidationError};
use crate::jwks::JwksKeyCache;
use crate::key_service::OidcConfigurationService;
use crate::token::{Token, claims};
use crate::validation::{ValidationResult, Validator};
use crate::validators::trusted_issuer::{TOKEN_KEYS_PATH, TrustedIssuerGuard};

struct OnlineKeys {
    cache: Arc<JwksKeyCache>,
    discovery: Arc<dyn OidcConfigurationService>,
}

/// Verifies token signatures (RS256, ES256)
pub struct SignatureValidator {
    service: Service,
    url: Option<Url>,
    guard: TrustedIssuerGuard,
    online: Option<OnlineKeys>,
    configured_key: Option<Arc<VerificationKey>>,
    tenant_check: bool,
}

impl SignatureValidator {
    /// Validator that fetches keys through `cache` and `discovery`.
    ///
    /// A `verification_key` in the configuration becomes the fallback key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::VerificationKey`] when the configured key
    /// cannot be parsed.
    pub fn online(
        config: &TrustConfiguration,
        cache: Arc<JwksKeyCache>,
        discovery: Arc<dyn OidcConfigurationService>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            service: config.service,
            url: config.url.clone(),
            guard: TrustedIssuerGuard::new(config.service, &config.domains),
            online: Some(OnlineKeys { cache, discovery }),
            configured_key: parse_configured_key(config)?,
            tenant_check: true,
        })
    }

    /// Validator that only uses the configured `verification_key`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no key is configured and
    /// [`ConfigError::VerificationKey`] when it cannot be parsed.
    pub fn offline(config: &TrustConfiguration) -> Result<Self, ConfigError> {
        let configured_key = parse_configured_key(config)?.ok_or_else(|| {
            ConfigError::Invalid("offline validation requires a verification_key".into())
        })?;
        Ok(Self {
            service: config.service,
            url: config.url.clone(),
            guard: TrustedIssuerGuard::new(config.service, &config.domains),
            online: None,
            configured_key: Some(configured_key),
            tenant_check: true,
        })
    }

    /// Skip the IAS `app_tid` requirement for tokens of other issuers
    pub fn disable_tenant_id_check(mut self) -> Self {
        self.tenant_check = false;
        self
    }

    fn check(&self, token: &Token) -> Result<(), ValidationError> {
        let alg = token
            .header_str(claims::ALG)
            .ok_or_else(|| ValidationError::MalformedToken("header has no 'alg'".into()))?;
        let algorithm = SignatureAlgorithm::from_jws(alg)
            .ok_or_else(|| ValidationError::UnsupportedAlgorithm(alg.to_string()))?;
        let key_id = token.header_str(claims::KID).unwrap_or(DEFAULT_KEY_ID);

        let key = self.resolve_key(token, key_id, algorithm)?;
        match key.verify(token.signing_input().as_bytes(), token.signature(), algorithm) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ValidationError::SignatureMismatch(format!(
                "the signature does not match {} key '{}'",
                key.key_type(),
                key.key_id()
            ))),
            Err(e) => Err(ValidationError::SignatureMismatch(e.to_string())),
        }
    }

    fn resolve_key(
        &self,
        token: &Token,
        key_id: &str,
        algorithm: SignatureAlgorithm,
    ) -> Result<Arc<VerificationKey>, ValidationError> {
        let Some(online) = &self.online else {
            return self.configured_key.clone().ok_or_else(|| {
                ValidationError::KeyResolution("no verification key configured".into())
            });
        };

        match self.fetch_key(online, token, key_id, algorithm) {
            Err(error @ ValidationError::KeyResolution(_)) => match &self.configured_key {
                Some(key) => {
                    warn!(kid = key_id, %error, "Key retrieval failed, using configured verification key");
                    Ok(Arc::clone(key))
                }
                None => Err(error),
            },
            other => other,
        }
    }

    fn fetch_key(
        &self,
        online: &OnlineKeys,
        token: &Token,
        key_id: &str,
        algorithm: SignatureAlgorithm,
    ) -> Result<Arc<VerificationKey>, ValidationError> {
        let jwks_uri = self.key_endpoint(online, token)?;
        let key_type = algorithm.key_type();
        match online
            .cache
            .get_or_fetch(&jwks_uri, token.zone_id(), key_id, key_type)
        {
            Ok(Some(key)) => Ok(key),
            Ok(None) => Err(ValidationError::KeyResolution(format!(
                "no {key_type} key with kid '{key_id}' is published at {jwks_uri}"
            ))),
            Err(e) => Err(ValidationError::KeyResolution(e.to_string())),
        }
    }

    fn key_endpoint(&self, online: &OnlineKeys, token: &Token) -> Result<Url, ValidationError> {
        match self.service {
            Service::Xsuaa => match token.header_str(claims::JKU) {
                Some(jku) => self.guard.check_key_url(jku),
                None => {
                    let url = self.url.as_ref().ok_or_else(|| {
                        ValidationError::UntrustedIssuer(
                            "token has no 'jku' and no identity service url is configured".into(),
                        )
                    })?;
                    debug!(url = %url, "Token has no 'jku', using configured identity service");
                    Ok(token_keys_url(url))
                }
            },
            Service::Ias => {
                let issuer = token
                    .claim_str(claims::IAS_ISS)
                    .or_else(|| token.issuer())
                    .ok_or_else(|| {
                        ValidationError::UntrustedIssuer("token does not contain an 'iss' claim".into())
                    })?;
                let issuer = self.guard.check_issuer(issuer)?;
                if self.tenant_check
                    && !token.has_claim(claims::APP_TID)
                    && !self.is_configured_instance(&issuer)
                {
                    return Err(ValidationError::UntrustedIssuer(
                        "token of a foreign issuer must provide the 'app_tid' claim".into(),
                    ));
                }
                online
                    .discovery
                    .retrieve_jwks_uri(&issuer)
                    .map_err(|e| ValidationError::KeyResolution(e.to_string()))
            }
        }
    }

    fn is_configured_instance(&self, issuer: &Url) -> bool {
        self.url
            .as_ref()
            .is_some_and(|url| url.host_str() == issuer.host_str() && url.port() == issuer.port())
    }
}

impl Validator<Token> for SignatureValidator {
    fn validate(&self, token: &Token) -> ValidationResult {
        self.check(token).into()
    }

    fn name(&self) -> &str {
        "SignatureValidator"
    }
}

impl fmt::Debug for SignatureValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureValidator")
            .field("service", &self.service)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("online", &self.online.is_some())
            .field("configured_key", &self.configured_key.is_some())
            .field("tenant_check", &self.tenant_check)
            .finish()
    }
}

fn parse_configured_key(
    config: &TrustConfiguration,
) -> Result<Option<Arc<VerificationKey>>, ConfigError> {
    config
        .verification_key
        .as_deref()
        .map(|pem| VerificationKey::from_public_key_pem(DEFAULT_KEY_ID, pem).map(Arc::new))
        .transpose()
        .map_err(ConfigError::from)
}

/// `{url}/token_keys`
pub fn token_keys_url(url: &Url) -> Url {
    let mut keys = url.clone();
    let path = format!("{}/{TOKEN_KEYS_PATH}", url.path().trim_end_matches('/'));
    keys.set_path(&path);
    keys.set_query(None);
    keys.set_fragment(None);
    keys
}
