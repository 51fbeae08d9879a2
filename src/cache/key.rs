//! Cache key naming.

use serde::{Deserialize, Serialize};

/// Point lookups live under `element_<id>`, search results under `search_<term>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn element(id: i64) -> Self {
        Self(format!("element_{}", id))
    }

    pub fn search(term: &str) -> Self {
        Self(format!("search_{}", term))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Which TTL class this key falls into.
    pub fn kind(&self) -> CacheKeyKind {
        if self.0.starts_with("element_") {
            CacheKeyKind::Element
        } else if self.0.starts_with("search_") {
            CacheKeyKind::Search
        } else {
            CacheKeyKind::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKeyKind {
    Element,
    Search,
    Other,
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
