//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use story_resilience::cache::CacheConfig;
use story_resilience::queue::QueueConfig;
use story_resilience::resilience::{CircuitBreakerConfig, RetryConfig};
use story_resilience::service::InMemoryElementService;
use story_resilience::{ResilienceConfig, ResilientElementService, ResilientServiceBuilder};

pub const RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Fast-retrying profile with the given breaker threshold and retry budget.
pub fn profile(failure_threshold: u32, max_retries: i32) -> ResilienceConfig {
    ResilienceConfig::new(CircuitBreakerConfig::new(failure_threshold, RECOVERY_TIMEOUT))
        .with_retry(
            RetryConfig::new()
                .with_max_retries(max_retries)
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(4)),
        )
        .with_cache(CacheConfig::new())
        .with_queue(QueueConfig::new().with_worker_count(1))
}

pub struct Fixture {
    pub backend: Arc<InMemoryElementService>,
    pub svc: ResilientElementService<InMemoryElementService>,
}

pub fn fixture_with(config: ResilienceConfig) -> Fixture {
    let backend = Arc::new(InMemoryElementService::new());
    let svc = ResilientServiceBuilder::new()
        .config(config)
        .build(backend.clone())
        .expect("valid test profile");
    Fixture { backend, svc }
}

pub fn fixture() -> Fixture {
    fixture_with(profile(5, 2))
}
