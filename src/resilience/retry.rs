//! Bounded exponential-backoff retry executor.
//!
//! Every failure is treated as transient until the retry budget is spent; the last
//! failure is then handed back exactly as the call produced it.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry budget used when a configuration supplies a negative `max_retries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for retry logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. `0` means a single attempt; negative values
    /// are invalid and replaced by [`DEFAULT_MAX_RETRIES`].
    pub max_retries: i32,
    #[serde(rename = "initial_delay_ms", with = "crate::utils::duration_ms")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "crate::utils::duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES as i32,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }
}

/// Retry executor with per-operation attempt bookkeeping.
///
/// Records are keyed by the caller-supplied operation id, so calls sharing an id
/// overwrite each other's count. The last writer wins.
pub struct RetryPolicy {
    config: RetryConfig,
    max_retries: u32,
    records: DashMap<String, u32>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        let max_retries = match u32::try_from(config.max_retries) {
            Ok(n) => n,
            Err(_) => {
                warn!(
                    configured = config.max_retries,
                    fallback = DEFAULT_MAX_RETRIES,
                    "negative max_retries, using default"
                );
                DEFAULT_MAX_RETRIES
            }
        };
        Self {
            config,
            max_retries,
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retry budget actually applied after validation.
    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff before retry number `attempt + 1`: `initial * multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap = self.config.max_delay.as_secs_f64();
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.config.initial_delay.as_secs_f64() * self.config.backoff_multiplier.powi(exp);
        if raw.is_finite() && raw < cap {
            Duration::from_secs_f64(raw.max(0.0))
        } else {
            self.config.max_delay
        }
    }

    /// Invoke `call` until it succeeds or the retry budget is exhausted.
    pub async fn execute<T, E, F, Fut>(&self, operation_id: &str, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match call().await {
                Ok(value) => {
                    self.records.insert(operation_id.to_string(), attempt);
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= self.max_retries {
                        self.records.insert(operation_id.to_string(), attempt);
                        error!(
                            operation_id,
                            attempts = attempt + 1,
                            max_retries = self.max_retries,
                            error = %err,
                            "retries exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation_id,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Retries consumed by the most recent call recorded under `operation_id`.
    pub fn get_retry_count(&self, operation_id: &str) -> u32 {
        self.records.get(operation_id).map(|r| *r.value()).unwrap_or(0)
    }

    pub fn clear_retry_count(&self, operation_id: &str) {
        self.records.remove(operation_id);
    }

    /// Number of operation ids whose last call needed at least one retry.
    pub fn get_active_retry_count(&self) -> usize {
        self.records.iter().filter(|r| *r.value() > 0).count()
    }
}
