//! Resilience profile loaded from YAML, with environment overrides.
//!
//! ```yaml
//! circuit_breaker:
//!   failure_threshold: 5
//!   recovery_timeout_ms: 30000
//! retry:
//!   max_retries: 3
//!   initial_delay_ms: 200
//! cache:
//!   element_ttl_ms: 1800000
//! queue:
//!   worker_count: 2
//! ```
//!
//! Only `circuit_breaker` is required; the other sections fall back to their defaults.

use crate::cache::CacheConfig;
use crate::queue::QueueConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::RetryConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_BREAKER_FAILURE_THRESHOLD: &str = "STORY_RESILIENCE_BREAKER_FAILURE_THRESHOLD";
pub const ENV_BREAKER_RECOVERY_MS: &str = "STORY_RESILIENCE_BREAKER_RECOVERY_MS";
pub const ENV_MAX_RETRIES: &str = "STORY_RESILIENCE_MAX_RETRIES";
pub const ENV_RETRY_INITIAL_MS: &str = "STORY_RESILIENCE_RETRY_INITIAL_MS";
pub const ENV_RETRY_MAX_MS: &str = "STORY_RESILIENCE_RETRY_MAX_MS";
pub const ENV_CACHE_ENABLED: &str = "STORY_RESILIENCE_CACHE_ENABLED";
pub const ENV_QUEUE_WORKERS: &str = "STORY_RESILIENCE_QUEUE_WORKERS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

impl ResilienceConfig {
    pub fn new(circuit_breaker: CircuitBreakerConfig) -> Self {
        Self {
            circuit_breaker,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read config file: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Apply `STORY_RESILIENCE_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`. Unparsable values are skipped with a warning.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var::<u32, _>(&lookup, ENV_BREAKER_FAILURE_THRESHOLD) {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, ENV_BREAKER_RECOVERY_MS) {
            self.circuit_breaker.recovery_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<i32, _>(&lookup, ENV_MAX_RETRIES) {
            self.retry.max_retries = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, ENV_RETRY_INITIAL_MS) {
            self.retry.initial_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, ENV_RETRY_MAX_MS) {
            self.retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<bool, _>(&lookup, ENV_CACHE_ENABLED) {
            self.cache.enabled = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, ENV_QUEUE_WORKERS) {
            self.queue.worker_count = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.circuit_breaker.validate()?;
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(Error::configuration_with_context(
                "backoff multiplier must be at least 1.0",
                ErrorContext::new()
                    .with_field_path("retry.backoff_multiplier")
                    .with_source("config"),
            ));
        }
        self.cache.validate()?;
        self.queue.validate()
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = raw.as_str(), "ignoring unparsable override");
            None
        }
    }
}
