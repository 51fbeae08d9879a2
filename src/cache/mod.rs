//! TTL read-through / write-through cache.
//!
//! The facade consults the cache before touching the wrapped service for reads and
//! refreshes it after every successful write, so a read right after an update is
//! answered locally.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | Typed get/set/invalidate with per-class TTLs and statistics |
//! | [`CacheConfig`] | TTLs for element and search entries, capacity, key prefix |
//! | [`CacheBackend`] | Trait for byte-oriented storage backends |
//! | [`MemoryCache`] | Bounded in-process backend |
//! | [`NullCache`] | No-op backend used when caching is disabled |
//! | [`CacheKey`] | `element_<id>` and `search_<term>` keys |
//!
//! ## Example
//!
//! ```rust
//! use story_resilience::cache::{CacheConfig, CacheKey, CacheManager};
//! use std::time::Duration;
//!
//! # async fn demo() -> story_resilience::Result<()> {
//! let cache = CacheManager::from_config(
//!     CacheConfig::new().with_search_ttl(Duration::from_secs(120)),
//! );
//! cache.set(&CacheKey::search("castle"), &vec![3_i64, 9]).await?;
//! let ids: Option<Vec<i64>> = cache.get(&CacheKey::search("castle")).await?;
//! assert_eq!(ids, Some(vec![3, 9]));
//! # Ok(())
//! # }
//! ```

mod backend;
mod key;
mod manager;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use key::{CacheKey, CacheKeyKind};
pub use manager::{CacheConfig, CacheManager, CacheStats};
