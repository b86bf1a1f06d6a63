//! Trust and cache configuration
//!
//! A [`TrustConfiguration`] describes one identity service instance the
//! application trusts: which service it is, which client id tokens must be
//! issued for, and which domains keys may be fetched from. It is passed
//! explicitly into [`ValidatorBuilder`](crate::ValidatorBuilder); nothing is
//! read from the process environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::{ConfigError, Result};

/// Identity service that issues the tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// XSUAA (UAA based authorization service)
    Xsuaa,
    /// Identity Authentication Service
    Ias,
}

/// Recommended minimum time-to-live for cached keys
pub const RECOMMENDED_MIN_TTL: Duration = Duration::from_secs(600);
/// Recommended minimum number of cached keys
pub const RECOMMENDED_MIN_SIZE: usize = 1000;

/// Limits of the verification key cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfiguration {
    /// How long a fetched key may be served from the cache
    #[serde(default = "default_ttl")]
    pub ttl: Duration,
    /// Maximum number of cached keys; least recently used keys are evicted
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_ttl() -> Duration {
    RECOMMENDED_MIN_TTL
}

fn default_max_size() -> usize {
    RECOMMENDED_MIN_SIZE
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            max_size: default_max_size(),
        }
    }
}

impl CacheConfiguration {
    /// Cache configuration with explicit limits
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self { ttl, max_size }
    }

    /// Log a warning for limits below the recommended values.
    ///
    /// Lower values are honored; short TTLs mean more requests to the
    /// identity service.
    pub fn warn_if_below_recommended(&self) {
        if self.ttl < RECOMMENDED_MIN_TTL {
            warn!(
                ttl_secs = self.ttl.as_secs(),
                recommended_secs = RECOMMENDED_MIN_TTL.as_secs(),
                "Key cache TTL is below the recommended minimum"
            );
        }
        if self.max_size < RECOMMENDED_MIN_SIZE {
            warn!(
                max_size = self.max_size,
                recommended = RECOMMENDED_MIN_SIZE,
                "Key cache size is below the recommended minimum"
            );
        }
    }
}

/// Trust settings for one identity service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustConfiguration {
    /// Issuing identity service
    pub service: Service,
    /// Client id tokens must be issued for
    #[serde(alias = "clientid")]
    pub client_id: String,
    /// XSUAA application name (`xsappname`)
    #[serde(default, alias = "xsappname", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// Base URL of the identity service instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    /// Trusted domains; for XSUAA the first entry is the UAA domain
    #[serde(default)]
    pub domains: Vec<String>,
    /// Zone (XSUAA) or tenant (IAS) tokens must belong to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    /// PEM public key used offline or when key retrieval fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_key: Option<String>,
    /// Further client ids whose tokens are accepted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_client_ids: Vec<String>,
    /// Key cache limits
    #[serde(default)]
    pub cache: CacheConfiguration,
}

impl TrustConfiguration {
    /// Start a configuration for `service`
    pub fn builder(service: Service) -> TrustConfigurationBuilder {
        TrustConfigurationBuilder::new(service)
    }

    /// Parse and validate a JSON configuration document
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for documents that do not match the
    /// schema and the errors of [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can be used for validation
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `client_id` or `domains` is
    /// empty.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client_id must not be empty".into()));
        }
        if self.domains.iter().all(|d| d.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "at least one trusted domain is required".into(),
            ));
        }
        Ok(())
    }

    /// UAA domain of an XSUAA configuration (first trusted domain)
    pub fn uaa_domain(&self) -> Option<&str> {
        self.domains.first().map(String::as_str)
    }

    /// Every client id a token may be issued for: `client_id`, `app_id`,
    /// then `trusted_client_ids`, without duplicates
    pub fn trusted_client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(2 + self.trusted_client_ids.len());
        let candidates = std::iter::once(&self.client_id)
            .chain(self.app_id.iter())
            .chain(self.trusted_client_ids.iter());
        for id in candidates {
            let id = id.trim();
            if !id.is_empty() && !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }
}

/// Fluent construction of a [`TrustConfiguration`]
#[derive(Debug, Clone)]
pub struct TrustConfigurationBuilder {
    config: TrustConfiguration,
}

impl TrustConfigurationBuilder {
    fn new(service: Service) -> Self {
        Self {
            config: TrustConfiguration {
                service,
                client_id: String::new(),
                app_id: None,
                url: None,
                domains: Vec::new(),
                zone_id: None,
                verification_key: None,
                trusted_client_ids: Vec::new(),
                cache: CacheConfiguration::default(),
            },
        }
    }

    /// Expected client id
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// XSUAA application name
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.app_id = Some(app_id.into());
        self
    }

    /// Identity service base URL
    pub fn url(mut self, url: Url) -> Self {
        self.config.url = Some(url);
        self
    }

    /// Add a trusted domain
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.config.domains.push(domain.into());
        self
    }

    /// Required zone or tenant
    pub fn zone_id(mut self, zone_id: impl Into<String>) -> Self {
        self.config.zone_id = Some(zone_id.into());
        self
    }

    /// PEM public key for offline validation or fallback
    pub fn verification_key(mut self, pem: impl Into<String>) -> Self {
        self.config.verification_key = Some(pem.into());
        self
    }

    /// Accept tokens of another client id as well
    pub fn trusted_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.trusted_client_ids.push(client_id.into());
        self
    }

    /// Key cache limits
    pub fn cache(mut self, cache: CacheConfiguration) -> Self {
        self.config.cache = cache;
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    ///
    /// See [`TrustConfiguration::validate`].
    pub fn build(self) -> Result<TrustConfiguration> {
        self.config.validate()?;
        Ok(self.config)
    }
}
