//! Validator chain construction
//!
//! [`ValidatorBuilder`] turns a [`TrustConfiguration`] into the validator
//! chain for its identity service:
//!
//! ```text
//! TrustedIssuerGuard -> SignatureValidator -> ExpirationValidator
//!     -> AudienceValidator -> ZoneValidator (zone_id set) -> custom validators
//! ```
//!
//! In offline mode the configured verification key is the only key source;
//! no keys are fetched and the guard is left out.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::info;

use crate::config::{CacheConfiguration, TrustConfiguration};
use crate::error::Result;
use crate::jwks::JwksKeyCache;
use crate::key_service::{
    CachingOidcConfigurationService, HttpOidcConfigurationService, HttpTokenKeyService,
    OidcConfigurationService, TokenKeyService, default_http_client,
};
use crate::token::Token;
use crate::validation::{CombiningValidator, ValidationListener, Validator};
use crate::validators::{
    AudienceValidator, Clock, ExpirationValidator, SignatureValidator, TrustedIssuerGuard,
    ZoneValidator,
};

/// Builds the [`CombiningValidator`] for a [`TrustConfiguration`]
pub struct ValidatorBuilder {
    config: TrustConfiguration,
    custom_validators: Vec<Box<dyn Validator<Token>>>,
    audience_validator: Option<Box<dyn Validator<Token>>>,
    listeners: Vec<Arc<dyn ValidationListener>>,
    token_key_service: Option<Arc<dyn TokenKeyService>>,
    oidc_service: Option<Arc<dyn OidcConfigurationService>>,
    http_client: Option<Client>,
    cache_config: Option<CacheConfiguration>,
    key_cache: Option<Arc<JwksKeyCache>>,
    offline: bool,
    tenant_check: bool,
    leeway: Duration,
    clock: Option<Clock>,
}

impl ValidatorBuilder {
    /// Builder for `config`
    pub fn new(config: TrustConfiguration) -> Self {
        Self {
            config,
            custom_validators: Vec::new(),
            audience_validator: None,
            listeners: Vec::new(),
            token_key_service: None,
            oidc_service: None,
            http_client: None,
            cache_config: None,
            key_cache: None,
            offline: false,
            tenant_check: true,
            leeway: Duration::ZERO,
            clock: None,
        }
    }

    /// Configuration the chain is built for
    pub fn configuration(&self) -> &TrustConfiguration {
        &self.config
    }

    /// Append a validator after the built-in ones
    pub fn with(mut self, validator: impl Validator<Token> + 'static) -> Self {
        self.custom_validators.push(Box::new(validator));
        self
    }

    /// Replace the default [`AudienceValidator`]
    pub fn with_audience_validator(mut self, validator: impl Validator<Token> + 'static) -> Self {
        self.audience_validator = Some(Box::new(validator));
        self
    }

    /// Register a listener on the built chain
    pub fn with_listener(mut self, listener: Arc<dyn ValidationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Fetch key sets through `service` instead of HTTP
    pub fn with_token_key_service(mut self, service: Arc<dyn TokenKeyService>) -> Self {
        self.token_key_service = Some(service);
        self
    }

    /// Resolve IAS key endpoints through `service` instead of HTTP discovery
    pub fn with_oidc_configuration_service(
        mut self,
        service: Arc<dyn OidcConfigurationService>,
    ) -> Self {
        self.oidc_service = Some(service);
        self
    }

    /// HTTP client for the default key and discovery services
    ///
    /// # Warning
    /// The client must not follow redirects.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Override the cache limits of the configuration
    pub fn with_cache_configuration(mut self, cache: CacheConfiguration) -> Self {
        self.cache_config = Some(cache);
        self
    }

    /// Share a key cache between chains; its key service takes precedence
    /// over [`with_token_key_service`](Self::with_token_key_service)
    pub fn with_key_cache(mut self, cache: Arc<JwksKeyCache>) -> Self {
        self.key_cache = Some(cache);
        self
    }

    /// Validate with the configured verification key only
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// Accept IAS tokens of foreign issuers without `app_tid`
    pub fn disable_tenant_id_check(mut self) -> Self {
        self.tenant_check = false;
        self
    }

    /// Clock skew tolerated for `exp` and `nbf`
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Time source of the expiration check
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Assemble the chain
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::ConfigError) when the configuration is
    /// invalid, the verification key cannot be parsed, offline mode has no
    /// verification key, or the HTTP client cannot be built.
    pub fn build(self) -> Result<CombiningValidator<Token>> {
        self.config.validate()?;
        let config = &self.config;
        let cache_config = self.cache_config.unwrap_or(config.cache);

        let mut validators: Vec<Box<dyn Validator<Token>>> = Vec::new();
        let signature = if self.offline {
            SignatureValidator::offline(config)?
        } else {
            validators.push(Box::new(TrustedIssuerGuard::new(config.service, &config.domains)));

            let mut client = self.http_client;
            let mut http_client = || -> Result<Client> {
                if let Some(client) = &client {
                    return Ok(client.clone());
                }
                let built = default_http_client()?;
                client = Some(built.clone());
                Ok(built)
            };

            let cache = match self.key_cache {
                Some(cache) => cache,
                None => {
                    let key_service: Arc<dyn TokenKeyService> = match self.token_key_service {
                        Some(service) => service,
                        None => Arc::new(HttpTokenKeyService::from_client(http_client()?)),
                    };
                    Arc::new(JwksKeyCache::new(key_service, cache_config))
                }
            };
            let discovery: Arc<dyn OidcConfigurationService> = match self.oidc_service {
                Some(service) => service,
                None => Arc::new(HttpOidcConfigurationService::from_client(http_client()?)),
            };
            let discovery = Arc::new(CachingOidcConfigurationService::new(
                discovery,
                cache_config.ttl,
                cache_config.max_size,
            ));
            SignatureValidator::online(config, cache, discovery)?
        };
        let signature = if self.tenant_check {
            signature
        } else {
            signature.disable_tenant_id_check()
        };
        validators.push(Box::new(signature));

        let mut expiration = ExpirationValidator::new().with_leeway(self.leeway);
        if let Some(clock) = self.clock {
            expiration = expiration.with_clock(clock);
        }
        validators.push(Box::new(expiration));

        match self.audience_validator {
            Some(audience) => validators.push(audience),
            None => validators.push(Box::new(AudienceValidator::from_configuration(config))),
        }
        if let Some(zone_id) = &config.zone_id {
            validators.push(Box::new(ZoneValidator::new(config.service, zone_id.clone())));
        }
        validators.extend(self.custom_validators);

        let chain = CombiningValidator::new(validators);
        for listener in self.listeners {
            chain.register_listener(listener);
        }
        info!(
            service = ?config.service,
            offline = self.offline,
            validators = chain.len(),
            "Built token validator chain"
        );
        Ok(chain)
    }
}
