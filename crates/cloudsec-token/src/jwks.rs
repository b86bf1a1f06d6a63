//! Verification key cache
//!
//! Keys are cached individually under `(key endpoint, zone, key id, key
//! type)`. A miss downloads the whole key set of the endpoint once and caches
//! every usable key in it, so a token signed with a sibling key is served
//! from the cache afterwards.
//!
//! - **TTL**: an entry older than the configured TTL is never returned; the
//!   next lookup fetches again.
//! - **Size**: at most `max_size` keys are kept; the least recently used key
//!   is evicted to make room.
//! - **Failures**: a failed fetch leaves the cache untouched and is reported
//!   to the caller, who may retry.
//!
//! Lookups may run concurrently from many threads. The cache lock is never
//! held during a fetch, so two threads missing the same key may both fetch
//! it; the later insert wins.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use cloudsec_keys::{JsonWebKeySet, KeyType, VerificationKey};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CacheConfiguration;
use crate::error::KeyServiceError;
use crate::key_service::TokenKeyService;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    jwks_uri: String,
    zone_id: Option<String>,
    key_id: String,
    key_type: KeyType,
}

#[derive(Debug, Clone)]
struct CachedKey {
    key: Arc<VerificationKey>,
    fetched_at: Instant,
}

/// Hit and miss counters of a [`JwksKeyCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that required a fetch
    pub misses: u64,
}

/// Thread-safe, size- and time-bounded cache of verification keys
pub struct JwksKeyCache {
    entries: Mutex<LruCache<CacheKey, CachedKey>>,
    key_service: Arc<dyn TokenKeyService>,
    config: CacheConfiguration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl JwksKeyCache {
    /// Cache backed by `key_service` with the given limits.
    ///
    /// Limits below the recommended values are honored and logged. A
    /// `max_size` of zero is treated as one.
    pub fn new(key_service: Arc<dyn TokenKeyService>, config: CacheConfiguration) -> Self {
        config.warn_if_below_recommended();
        let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            key_service,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache with the default limits (10 minutes, 1000 keys)
    pub fn with_defaults(key_service: Arc<dyn TokenKeyService>) -> Self {
        Self::new(key_service, CacheConfiguration::default())
    }

    /// Configured limits
    pub fn configuration(&self) -> &CacheConfiguration {
        &self.config
    }

    /// Return the key `key_id` of `key_type` published at `jwks_uri`.
    ///
    /// Serves a cached key younger than the TTL; otherwise fetches the key
    /// set, caches all usable keys and returns the requested one.
    /// `Ok(None)` means the freshly fetched key set has no such key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyServiceError`] when the key set cannot be fetched or
    /// parsed. The cache is not modified in that case.
    pub fn get_or_fetch(
        &self,
        jwks_uri: &Url,
        zone_id: Option<&str>,
        key_id: &str,
        key_type: KeyType,
    ) -> Result<Option<Arc<VerificationKey>>, KeyServiceError> {
        let cache_key = CacheKey {
            jwks_uri: jwks_uri.to_string(),
            zone_id: zone_id.map(str::to_string),
            key_id: key_id.to_string(),
            key_type,
        };

        if let Some(key) = self.lookup(&cache_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(jwks_uri = %jwks_uri, kid = key_id, "Using cached verification key");
            return Ok(Some(key));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let body = self.key_service.retrieve_token_keys(jwks_uri, zone_id)?;
        let key_set = JsonWebKeySet::from_json(&body).map_err(|e| {
            warn!(jwks_uri = %jwks_uri, error = %e, "Identity service returned an invalid key set");
            KeyServiceError::InvalidResponse {
                uri: jwks_uri.to_string(),
                message: e.to_string(),
            }
        })?;

        let fetched_at = Instant::now();
        let keys = key_set.verification_keys();
        info!(
            jwks_uri = %jwks_uri,
            published = key_set.keys.len(),
            usable = keys.len(),
            "Caching verification keys"
        );

        let mut requested = None;
        let mut entries = self.entries.lock();
        for key in keys {
            let entry_key = CacheKey {
                jwks_uri: cache_key.jwks_uri.clone(),
                zone_id: cache_key.zone_id.clone(),
                key_id: key.key_id().to_string(),
                key_type: key.key_type(),
            };
            let key = Arc::new(key);
            if entry_key == cache_key {
                requested = Some(Arc::clone(&key));
            }
            entries.put(entry_key, CachedKey { key, fetched_at });
        }
        drop(entries);

        if requested.is_none() {
            debug!(jwks_uri = %jwks_uri, kid = key_id, key_type = %key_type, "Key set has no matching key");
        }
        Ok(requested)
    }

    fn lookup(&self, cache_key: &CacheKey) -> Option<Arc<VerificationKey>> {
        let mut entries = self.entries.lock();
        let fresh = entries
            .get(cache_key)
            .map(|entry| (entry.fetched_at.elapsed() < self.config.ttl, Arc::clone(&entry.key)));
        match fresh {
            Some((true, key)) => Some(key),
            Some((false, _)) => {
                entries.pop(cache_key);
                None
            }
            None => None,
        }
    }

    /// Drop every cached key
    pub fn clear(&self) {
        self.entries.lock().clear();
        debug!("Verification key cache cleared");
    }

    /// Number of cached keys, including ones past their TTL that were not
    /// looked up since
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit and miss counters since creation
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for JwksKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksKeyCache")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
