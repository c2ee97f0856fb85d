//! Apple public key fetching and caching.
//!
//! Apple signs identity tokens with keys published at
//! `https://appleid.apple.com/auth/keys`. This module keeps a single cached
//! copy of that key set.
//!
//! # Overview
//!
//! - [`AppleKeyCache`] - time-boxed cache with stale-on-failure fallback
//! - [`AppleKeyFetcher`] - source of key sets ([`HttpAppleKeyFetcher`] in production)
//! - [`KeyCacheError`] - fetch and availability errors
//!
//! # Refresh Semantics
//!
//! A cached set younger than the TTL is served as-is. Once it ages out the
//! next caller refetches; if that fails the previous set is served with
//! `stale = true` and a warning is logged. The cache only fails when nothing
//! has ever been fetched. Concurrent callers may refetch at the same time;
//! the last successful fetch wins the slot.
//!
//! # Security Considerations
//!
//! - Only HTTPS key endpoints are allowed (configurable for testing)
//! - HTTP timeouts prevent hanging on slow endpoints
//! - Response size is limited

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use time::OffsetDateTime;
use url::Url;

use crate::clock::{Clock, to_time_duration};

/// Configuration for fetching Apple's key set.
#[derive(Debug, Clone)]
pub struct AppleKeyCacheConfig {
    /// How long a fetched key set is fresh (default: 5 minutes).
    pub ttl: Duration,

    /// HTTP request timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Whether to allow HTTP (non-HTTPS) key URLs.
    /// This should only be enabled for testing.
    pub allow_http: bool,
}

impl Default for AppleKeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl AppleKeyCacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the freshness TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Allows HTTP (non-HTTPS) key URLs.
    ///
    /// # Warning
    ///
    /// This should only be used for testing.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Errors that can occur while obtaining Apple's key set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyCacheError {
    /// A network error occurred while fetching the key set.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The response could not be parsed as a JWK set.
    #[error("Failed to parse JWKS: {0}")]
    ParseError(String),

    /// The key URL scheme is not allowed (must be HTTPS in production).
    #[error("Invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },

    /// The fetch failed and no key set was ever cached.
    #[error("Apple keys unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Fetcher
// ============================================================================

/// Source of Apple key sets.
#[async_trait]
pub trait AppleKeyFetcher: Send + Sync {
    /// Fetches the current key set.
    ///
    /// # Errors
    ///
    /// Returns an error on network, status, size or parse failures.
    async fn fetch(&self) -> Result<JwkSet, KeyCacheError>;
}

/// Fetches Apple's key set over HTTPS.
pub struct HttpAppleKeyFetcher {
    http_client: reqwest::Client,
    keys_url: Url,
    config: AppleKeyCacheConfig,
}

impl HttpAppleKeyFetcher {
    /// Creates a fetcher for `keys_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScheme` for non-HTTPS URLs (unless allowed) and
    /// `NetworkError` if the HTTP client cannot be built.
    pub fn new(keys_url: Url, config: AppleKeyCacheConfig) -> Result<Self, KeyCacheError> {
        validate_scheme(&keys_url, config.allow_http)?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| KeyCacheError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            keys_url,
            config,
        })
    }
}

#[async_trait]
impl AppleKeyFetcher for HttpAppleKeyFetcher {
    async fn fetch(&self) -> Result<JwkSet, KeyCacheError> {
        tracing::debug!("Fetching Apple keys from {}", self.keys_url);

        let response = self
            .http_client
            .get(self.keys_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| KeyCacheError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyCacheError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(KeyCacheError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| KeyCacheError::NetworkError(e.to_string()))?;
        if body.len() > self.config.max_response_size {
            return Err(KeyCacheError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let jwks: JwkSet =
            serde_json::from_slice(&body).map_err(|e| KeyCacheError::ParseError(e.to_string()))?;

        tracing::debug!("Fetched {} Apple keys", jwks.keys.len());
        Ok(jwks)
    }
}

fn validate_scheme(uri: &Url, allow_http: bool) -> Result<(), KeyCacheError> {
    match uri.scheme() {
        "https" => Ok(()),
        "http" if allow_http => Ok(()),
        _ => Err(KeyCacheError::InvalidScheme),
    }
}

// ============================================================================
// Cache
// ============================================================================

struct CachedKeySet {
    keys: Arc<JwkSet>,
    fetched_at: OffsetDateTime,
}

/// Key set returned by [`AppleKeyCache::get_keys`].
#[derive(Clone)]
pub struct KeySetSnapshot {
    /// The keys.
    pub keys: Arc<JwkSet>,
    /// When the keys were fetched.
    pub fetched_at: OffsetDateTime,
    /// `true` when served past the TTL because a refetch failed.
    pub stale: bool,
}

impl KeySetSnapshot {
    /// Finds a key by `kid`.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.find(kid)
    }
}

/// Single-slot cache of Apple's key set.
pub struct AppleKeyCache {
    fetcher: Arc<dyn AppleKeyFetcher>,
    clock: Arc<dyn Clock>,
    ttl: time::Duration,
    slot: ArcSwapOption<CachedKeySet>,
}

impl AppleKeyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(fetcher: Arc<dyn AppleKeyFetcher>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            clock,
            ttl: to_time_duration(ttl),
            slot: ArcSwapOption::empty(),
        }
    }

    /// Returns the current key set, refetching once the cached copy is older
    /// than the TTL.
    ///
    /// # Errors
    ///
    /// Returns `KeyCacheError::Unavailable` only if the fetch fails and no
    /// key set has ever been cached.
    pub async fn get_keys(&self) -> Result<KeySetSnapshot, KeyCacheError> {
        let now = self.clock.now();
        let cached = self.slot.load_full();

        if let Some(entry) = cached.as_deref()
            && now - entry.fetched_at < self.ttl
        {
            tracing::trace!("Apple key cache hit");
            return Ok(KeySetSnapshot {
                keys: Arc::clone(&entry.keys),
                fetched_at: entry.fetched_at,
                stale: false,
            });
        }

        match self.fetcher.fetch().await {
            Ok(jwks) => {
                let fresh = Arc::new(CachedKeySet {
                    keys: Arc::new(jwks),
                    fetched_at: self.clock.now(),
                });
                self.slot.store(Some(Arc::clone(&fresh)));
                Ok(KeySetSnapshot {
                    keys: Arc::clone(&fresh.keys),
                    fetched_at: fresh.fetched_at,
                    stale: false,
                })
            }
            Err(err) => match cached {
                Some(entry) => {
                    tracing::warn!(
                        error = %err,
                        fetched_at = %entry.fetched_at,
                        "Apple key refresh failed; serving stale keys"
                    );
                    Ok(KeySetSnapshot {
                        keys: Arc::clone(&entry.keys),
                        fetched_at: entry.fetched_at,
                        stale: true,
                    })
                }
                None => {
                    tracing::error!(error = %err, "Apple keys unavailable and nothing cached");
                    Err(KeyCacheError::Unavailable(err.to_string()))
                }
            },
        }
    }

    /// Drops the cached key set.
    pub fn invalidate(&self) {
        self.slot.store(None);
        tracing::debug!("Invalidated Apple key cache");
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot.load().is_none()
    }
}
