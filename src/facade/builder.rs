use super::resilient::ResilientElementService;
use crate::cache::CacheManager;
use crate::config::ResilienceConfig;
use crate::queue::BackgroundTaskQueue;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retry::RetryPolicy;
use crate::service::ElementService;
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use tracing::debug;

/// Builder for [`ResilientElementService`].
///
/// Components can be injected (to share them between facades, or to inspect them in
/// tests); whatever is missing is built from the [`ResilienceConfig`]. `build` starts
/// queue workers and must run inside a Tokio runtime.
#[derive(Default)]
pub struct ResilientServiceBuilder {
    config: Option<ResilienceConfig>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<Arc<RetryPolicy>>,
    cache: Option<Arc<CacheManager>>,
    queue: Option<Arc<BackgroundTaskQueue>>,
}

impl ResilientServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an existing breaker, e.g. one shared by several facades.
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn retry_policy(mut self, retry: Arc<RetryPolicy>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn queue(mut self, queue: Arc<BackgroundTaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build<S: ElementService + 'static>(self, inner: Arc<S>) -> Result<ResilientElementService<S>> {
        if let Some(config) = &self.config {
            config.validate()?;
        }

        let breaker = match (self.breaker, &self.config) {
            (Some(b), _) => b,
            (None, Some(cfg)) => Arc::new(CircuitBreaker::new(cfg.circuit_breaker.clone())),
            (None, None) => {
                return Err(Error::configuration_with_context(
                    "circuit breaker thresholds are required",
                    ErrorContext::new()
                        .with_field_path("circuit_breaker")
                        .with_details("inject a CircuitBreaker or supply a ResilienceConfig")
                        .with_source("resilient_service_builder"),
                ))
            }
        };
        let retry = self.retry.unwrap_or_else(|| {
            Arc::new(RetryPolicy::new(
                self.config.as_ref().map(|c| c.retry.clone()).unwrap_or_default(),
            ))
        });
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(CacheManager::from_config(
                self.config.as_ref().map(|c| c.cache.clone()).unwrap_or_default(),
            ))
        });
        let queue = match self.queue {
            Some(q) => q,
            None => Arc::new(BackgroundTaskQueue::start(
                self.config.as_ref().map(|c| c.queue.clone()).unwrap_or_default(),
            )?),
        };

        debug!(
            failure_threshold = breaker.config().failure_threshold,
            max_retries = retry.effective_max_retries(),
            cache_backend = cache.backend_name(),
            "resilient element service assembled"
        );
        Ok(ResilientElementService::new(inner, breaker, retry, cache, queue))
    }
}
