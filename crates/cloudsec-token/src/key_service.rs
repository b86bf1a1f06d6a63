//! Remote key and discovery endpoints
//!
//! Two collaborators talk to the identity service:
//!
//! - [`TokenKeyService`] downloads the JSON Web Key Set from a key endpoint.
//! - [`OidcConfigurationService`] resolves the key endpoint of an issuer via
//!   OpenID Connect discovery (IAS tokens carry no `jku`).
//!
//! The default implementations use a blocking `reqwest` client that does not
//! follow redirects. Applications that need mutual TLS or a proxy pass their
//! own client through `from_client`.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use reqwest::redirect::Policy;
use serde::Deserialize;
use tracing::{debug, error, info};
use url::Url;

use crate::error::KeyServiceError;

/// Header carrying the zone or tenant on key requests
pub const ZONE_UUID_HEADER: &str = "x-zone_uuid";

/// Path of the OpenID Connect discovery document relative to the issuer
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Downloads JSON Web Key Sets
pub trait TokenKeyService: Send + Sync + fmt::Debug {
    /// Fetch the key set document at `jwks_uri`.
    ///
    /// `zone_id` is sent as the `x-zone_uuid` header when present.
    ///
    /// # Errors
    ///
    /// Returns [`KeyServiceError`] on transport failures and non-success
    /// responses.
    fn retrieve_token_keys(
        &self,
        jwks_uri: &Url,
        zone_id: Option<&str>,
    ) -> Result<String, KeyServiceError>;
}

/// Resolves the key endpoint of an OpenID Connect issuer
pub trait OidcConfigurationService: Send + Sync + fmt::Debug {
    /// Return the `jwks_uri` published by `issuer`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyServiceError`] when discovery fails or the document has
    /// no usable `jwks_uri`.
    fn retrieve_jwks_uri(&self, issuer: &Url) -> Result<Url, KeyServiceError>;
}

/// Blocking HTTP client with redirects disabled
///
/// # Errors
///
/// Returns the `reqwest` error if the TLS backend cannot be initialized.
pub fn default_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .redirect(Policy::none())
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("cloudsec-token/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn get(client: &Client, url: &Url, zone_id: Option<&str>) -> Result<String, KeyServiceError> {
    let mut request = client.get(url.clone()).header(ACCEPT, "application/json");
    if let Some(zone_id) = zone_id {
        request = request.header(ZONE_UUID_HEADER, zone_id);
    }

    let response = request.send().map_err(|e| {
        error!(uri = %url, error = %e, "Request to identity service failed");
        KeyServiceError::Transport {
            uri: url.to_string(),
            message: e.to_string(),
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        error!(uri = %url, status = %status, "Identity service returned error status");
        return Err(KeyServiceError::Status {
            uri: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().map_err(|e| KeyServiceError::Transport {
        uri: url.to_string(),
        message: e.to_string(),
    })
}

/// [`TokenKeyService`] over HTTP
#[derive(Clone)]
pub struct HttpTokenKeyService {
    client: Client,
}

impl HttpTokenKeyService {
    /// Service using [`default_http_client`]
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the client cannot be built.
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self::from_client(default_http_client()?))
    }

    /// Service using an existing client
    ///
    /// # Warning
    /// Configure the client with `redirect::Policy::none()`; a redirect would
    /// bypass the trusted-domain check of the key URL.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl fmt::Debug for HttpTokenKeyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTokenKeyService").finish_non_exhaustive()
    }
}

impl TokenKeyService for HttpTokenKeyService {
    fn retrieve_token_keys(
        &self,
        jwks_uri: &Url,
        zone_id: Option<&str>,
    ) -> Result<String, KeyServiceError> {
        info!(jwks_uri = %jwks_uri, zone_id, "Fetching token keys");
        let body = get(&self.client, jwks_uri, zone_id)?;
        debug!(jwks_uri = %jwks_uri, bytes = body.len(), "Fetched token keys");
        Ok(body)
    }
}

/// Discovery document members this crate uses
#[derive(Debug, Deserialize)]
struct OidcDiscoveryDocument {
    jwks_uri: String,
}

/// `{issuer}/.well-known/openid-configuration`
pub fn discovery_url(issuer: &Url) -> Url {
    let mut url = issuer.clone();
    let path = format!("{}/{DISCOVERY_PATH}", issuer.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// [`OidcConfigurationService`] over HTTP
#[derive(Clone)]
pub struct HttpOidcConfigurationService {
    client: Client,
}

impl HttpOidcConfigurationService {
    /// Service using [`default_http_client`]
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the client cannot be built.
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self::from_client(default_http_client()?))
    }

    /// Service using an existing client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl fmt::Debug for HttpOidcConfigurationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOidcConfigurationService")
            .finish_non_exhaustive()
    }
}

impl OidcConfigurationService for HttpOidcConfigurationService {
    fn retrieve_jwks_uri(&self, issuer: &Url) -> Result<Url, KeyServiceError> {
        let url = discovery_url(issuer);
        debug!(issuer = %issuer, discovery_url = %url, "Attempting OIDC discovery");

        let body = get(&self.client, &url, None)?;
        let invalid = |message: String| KeyServiceError::InvalidResponse {
            uri: url.to_string(),
            message,
        };
        let document: OidcDiscoveryDocument =
            serde_json::from_str(&body).map_err(|e| invalid(e.to_string()))?;
        let jwks_uri = Url::parse(&document.jwks_uri)
            .map_err(|e| invalid(format!("jwks_uri is not a valid URL: {e}")))?;

        info!(issuer = %issuer, jwks_uri = %jwks_uri, "Discovered JWKS URI");
        Ok(jwks_uri)
    }
}

/// Caches discovered key endpoints per issuer
pub struct CachingOidcConfigurationService {
    inner: Arc<dyn OidcConfigurationService>,
    entries: Mutex<LruCache<String, (Url, Instant)>>,
    ttl: Duration,
}

impl CachingOidcConfigurationService {
    /// Wrap `inner`, keeping up to `max_size` issuers for `ttl`
    pub fn new(inner: Arc<dyn OidcConfigurationService>, ttl: Duration, max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }
}

impl fmt::Debug for CachingOidcConfigurationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingOidcConfigurationService")
            .field("inner", &self.inner)
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl OidcConfigurationService for CachingOidcConfigurationService {
    fn retrieve_jwks_uri(&self, issuer: &Url) -> Result<Url, KeyServiceError> {
        let key = issuer.as_str().trim_end_matches('/').to_string();
        {
            let mut entries = self.entries.lock();
            if let Some((jwks_uri, fetched_at)) = entries.get(&key) {
                if fetched_at.elapsed() < self.ttl {
                    debug!(issuer = %issuer, "Using cached JWKS URI");
                    return Ok(jwks_uri.clone());
                }
                entries.pop(&key);
            }
        }

        let jwks_uri = self.inner.retrieve_jwks_uri(issuer)?;
        self.entries
            .lock()
            .put(key, (jwks_uri.clone(), Instant::now()));
        Ok(jwks_uri)
    }
}
