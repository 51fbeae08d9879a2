//! Cache backend implementations.

use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            data,
            expires_at: now + ttl,
            last_accessed: now,
        }
    }
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    async fn exists(&self, key: &CacheKey) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    async fn len(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// In-process TTL store.
///
/// Entries are sharded across a concurrent map so writes to one key do not block
/// readers of another. Expired entries are dropped lazily on read, and purged in bulk
/// before a write would exceed `max_entries`; the least recently read entry goes next.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn evict_if_needed(&self, incoming: &str) {
        if self.entries.contains_key(incoming) || self.entries.len() < self.max_entries {
            return;
        }
        let now = Instant::now();
        self.entries.retain(|_, e| !e.is_expired(now));
        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().last_accessed)
                .map(|e| e.key().clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let expired = match self.entries.get_mut(key.as_str()) {
            Some(mut entry) => {
                if entry.is_expired(now) {
                    true
                } else {
                    entry.last_accessed = now;
                    return Ok(Some(entry.data.clone()));
                }
            }
            None => return Ok(None),
        };
        if expired {
            self.entries
                .remove_if(key.as_str(), |_, e| e.is_expired(Instant::now()));
        }
        Ok(None)
    }
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        self.evict_if_needed(key.as_str());
        self.entries
            .insert(key.as_str().to_string(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }
    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.remove(key.as_str()).is_some())
    }
    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key.as_str())
            .map(|e| !e.is_expired(now))
            .unwrap_or(false))
    }
    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self.entries.iter().filter(|e| !e.is_expired(now)).count())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct NullCache;
impl NullCache {
    pub fn new() -> Self {
        Self
    }
}
impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn set(&self, _: &CacheKey, _: &[u8], _: Duration) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn exists(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
