//! Cache manager.

use super::backend::{CacheBackend, MemoryCache, NullCache};
use super::key::{CacheKey, CacheKeyKind};
use crate::{Error, ErrorContext, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for `element_<id>` point lookups.
    #[serde(rename = "element_ttl_ms", with = "crate::utils::duration_ms")]
    pub element_ttl: Duration,
    /// TTL for `search_<term>` result lists. Updates and deletes only touch the
    /// point entry, so a cached list may show stale elements for up to this long.
    #[serde(rename = "search_ttl_ms", with = "crate::utils::duration_ms")]
    pub search_ttl: Duration,
    pub max_entries: usize,
    pub max_entry_size: usize,
    pub key_prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            element_ttl: Duration::from_secs(30 * 60),
            search_ttl: Duration::from_secs(5 * 60),
            max_entries: 10_000,
            max_entry_size: 10 * 1024 * 1024,
            key_prefix: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_element_ttl(mut self, ttl: Duration) -> Self {
        self.element_ttl = ttl;
        self
    }
    pub fn with_search_ttl(mut self, ttl: Duration) -> Self {
        self.search_ttl = ttl;
        self
    }
    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (field, ttl) in [
            ("cache.element_ttl_ms", self.element_ttl),
            ("cache.search_ttl_ms", self.search_ttl),
        ] {
            if ttl.is_zero() {
                return Err(Error::configuration_with_context(
                    "cache TTL must be greater than zero",
                    ErrorContext::new().with_field_path(field).with_source("cache"),
                ));
            }
        }
        if self.max_entries == 0 {
            return Err(Error::configuration_with_context(
                "cache must hold at least one entry",
                ErrorContext::new()
                    .with_field_path("cache.max_entries")
                    .with_source("cache"),
            ));
        }
        Ok(())
    }

    /// Default TTL for a key, chosen by its naming scheme.
    pub fn ttl_for(&self, key: &CacheKey) -> Duration {
        match key.kind() {
            CacheKeyKind::Search => self.search_ttl,
            CacheKeyKind::Element | CacheKeyKind::Other => self.element_ttl,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Typed read-through/write-through cache over a byte-oriented backend.
///
/// A miss is `Ok(None)`, never an error; the caller fetches from the source and
/// stores the fresh value. Undecodable entries count as misses.
pub struct CacheManager {
    config: CacheConfig,
    backend: Box<dyn CacheBackend>,
    stats: AtomicStats,
}

impl CacheManager {
    pub fn new(config: CacheConfig, backend: Box<dyn CacheBackend>) -> Self {
        Self {
            config,
            backend,
            stats: AtomicStats::default(),
        }
    }

    /// Memory-backed manager, or a [`NullCache`] one when caching is disabled.
    pub fn from_config(config: CacheConfig) -> Self {
        let backend: Box<dyn CacheBackend> = if config.enabled {
            Box::new(MemoryCache::new(config.max_entries))
        } else {
            Box::new(NullCache::new())
        };
        Self::new(config, backend)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let prefixed = self.prefix_key(key);
        match self.backend.get(&prefixed).await {
            Ok(Some(data)) => match serde_json::from_slice(&data) {
                Ok(val) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "cache hit");
                    Ok(Some(val))
                }
                Err(_) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    Ok(None)
                }
            },
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache miss");
                Ok(None)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Store `value` with the default TTL for the key's class.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.config.ttl_for(key)).await
    }

    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let data = serde_json::to_vec(value)?;
        if data.len() > self.config.max_entry_size {
            debug!(key = %key, size = data.len(), "entry exceeds max size, not cached");
            return Ok(());
        }
        let prefixed = self.prefix_key(key);
        match self.backend.set(&prefixed, &data, ttl).await {
            Ok(()) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Remove `key`; returns whether an entry was present.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        let prefixed = self.prefix_key(key);
        match self.backend.delete(&prefixed).await {
            Ok(d) => {
                if d {
                    self.stats.deletes.fetch_add(1, Ordering::Relaxed);
                }
                Ok(d)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.backend.len().await
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn prefix_key(&self, key: &CacheKey) -> CacheKey {
        if let Some(ref p) = self.config.key_prefix {
            CacheKey::new(format!("{}:{}", p, key))
        } else {
            key.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.element_ttl, Duration::from_secs(1800));
        assert_eq!(config.search_ttl, Duration::from_secs(300));
        assert!(config.validate().is_ok());
        assert!(config.with_search_ttl(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_ttl_by_key_class() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_for(&CacheKey::element(1)), config.element_ttl);
        assert_eq!(config.ttl_for(&CacheKey::search("x")), config.search_ttl);
    }

    #[tokio::test]
    async fn test_typed_round_trip_and_stats() {
        let cache = CacheManager::from_config(CacheConfig::default());
        let key = CacheKey::search("dragon");

        assert_eq!(cache.get::<Vec<String>>(&key).await.unwrap(), None);
        cache.set(&key, &vec!["Smaug".to_string()]).await.unwrap();
        assert_eq!(
            cache.get::<Vec<String>>(&key).await.unwrap(),
            Some(vec!["Smaug".to_string()])
        );
        assert!(cache.invalidate(&key).await.unwrap());
        assert_eq!(cache.get::<Vec<String>>(&key).await.unwrap(), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 1);
        assert!((stats.hit_ratio() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_entries_expire_before_elements() {
        let config = CacheConfig::new()
            .with_element_ttl(Duration::from_secs(600))
            .with_search_ttl(Duration::from_secs(60));
        let cache = CacheManager::from_config(config);
        cache.set(&CacheKey::element(1), &"aria").await.unwrap();
        cache.set(&CacheKey::search("a"), &vec![1]).await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(cache.get::<String>(&CacheKey::element(1)).await.unwrap(), Some("aria".into()));
        assert_eq!(cache.get::<Vec<i32>>(&CacheKey::search("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_type_counts_as_miss() {
        let cache = CacheManager::from_config(CacheConfig::default());
        let key = CacheKey::element(3);
        cache.set(&key, &"not a number").await.unwrap();
        assert_eq!(cache.get::<u64>(&key).await.unwrap(), None);
        assert_eq!(cache.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = CacheManager::from_config(CacheConfig::new().with_enabled(false));
        let key = CacheKey::element(1);
        cache.set(&key, &1u32).await.unwrap();
        assert_eq!(cache.get::<u32>(&key).await.unwrap(), None);
        assert_eq!(cache.backend_name(), "null");
    }

    #[tokio::test]
    async fn test_key_prefix_isolates_namespaces() {
        let cache = CacheManager::from_config(CacheConfig::new().with_key_prefix("project_a"));
        let key = CacheKey::element(5);
        cache.set(&key, &5u32).await.unwrap();
        assert_eq!(cache.get::<u32>(&key).await.unwrap(), Some(5));
        assert_eq!(cache.len().await.unwrap(), 1);
    }
}
