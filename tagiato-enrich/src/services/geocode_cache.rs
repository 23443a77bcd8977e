//! Persistent geocode cache
//!
//! Append-only map from normalized query to result, persisted next to the
//! state file. A `None` result ("nothing at this position") is cached like any
//! other answer; lookup errors are never cached.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use tagiato_common::persist::{read_json, write_json_atomic};
use tagiato_common::GpsCoordinates;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::services::collaborators::Geocoder;

/// Geocoding collaborator errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeocodeError {
    /// Network hiccup, rate limiting, upstream 5xx
    #[error("Transient geocode failure: {0}")]
    Transient(String),

    #[error("Geocode failed: {0}")]
    Permanent(String),
}

impl GeocodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GeocodeError::Transient(_))
    }
}

type Entries = BTreeMap<String, Option<String>>;

/// Cache key for a coordinate lookup (4 decimals, about 11 m)
pub fn coords_key(gps: GpsCoordinates) -> String {
    format!("{:.4},{:.4}", gps.latitude, gps.longitude)
}

/// Cache key for a free-text lookup
pub fn text_key(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Key → result store
pub struct GeocodeCache {
    path: Option<PathBuf>,
    entries: RwLock<Entries>,
}

impl GeocodeCache {
    /// Cache that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(Entries::new()),
        }
    }

    /// Load from `path`; a missing or unreadable file starts an empty cache
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_json::<Entries>(&path).await {
            Ok(Some(entries)) => {
                tracing::debug!(path = %path.display(), entries = entries.len(), "Geocode cache loaded");
                entries
            }
            Ok(None) => Entries::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Geocode cache unreadable, starting empty");
                Entries::new()
            }
        };

        Self {
            path: Some(path),
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `Some(result)` on hit, `None` on miss
    pub async fn get(&self, key: &str) -> Option<Option<String>> {
        self.entries.read().await.get(key).cloned()
    }

    /// Insert a result; an existing entry for `key` is kept
    ///
    /// Returns whether the entry was new.
    pub async fn put(&self, key: impl Into<String>, result: Option<String>) -> bool {
        let mut entries = self.entries.write().await;
        let key = key.into();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, result);
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Persist atomically; no-op for an in-memory cache
    pub async fn save(&self) -> tagiato_common::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.entries.read().await.clone();
        write_json_atomic(path, &snapshot).await
    }
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Rate-limited geocoder behind the cache
pub struct CachedGeocoder<G> {
    inner: G,
    cache: Arc<GeocodeCache>,
    rate_limiter: DirectLimiter,
}

impl<G: Geocoder> CachedGeocoder<G> {
    pub fn new(inner: G, cache: Arc<GeocodeCache>, requests_per_second: NonZeroU32) -> Self {
        Self {
            inner,
            cache,
            rate_limiter: RateLimiter::direct(Quota::per_second(requests_per_second)),
        }
    }

    pub fn cache(&self) -> &Arc<GeocodeCache> {
        &self.cache
    }
}

#[async_trait]
impl<G: Geocoder> Geocoder for CachedGeocoder<G> {
    async fn reverse(&self, gps: GpsCoordinates) -> Result<Option<String>, GeocodeError> {
        let key = coords_key(gps);
        if let Some(hit) = self.cache.get(&key).await {
            tracing::trace!(key = %key, "Geocode cache hit");
            return Ok(hit);
        }

        tracing::debug!(key = %key, "Geocode cache miss");
        self.rate_limiter.until_ready().await;

        let result = self.inner.reverse(gps).await?;
        if self.cache.put(key.clone(), result.clone()).await {
            if let Err(e) = self.cache.save().await {
                tracing::warn!(key = %key, error = %e, "Failed to persist geocode cache");
            }
        }
        Ok(result)
    }
}
