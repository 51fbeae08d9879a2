//! Resilient decorator over a story-element service.
//!
//! [`ResilientElementService`] layers the cache, circuit breaker, retry policy and
//! background queue around any [`ElementService`](crate::service::ElementService):
//!
//! 1. Reads consult the cache first.
//! 2. Backend calls run as `breaker(retry(call))`.
//! 3. On failure the caller receives an offline placeholder (see [`fallback`]) and a
//!    High-priority reconciliation task is queued to replay the call later.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use story_resilience::config::ResilienceConfig;
//! use story_resilience::facade::ResilientServiceBuilder;
//! use story_resilience::resilience::CircuitBreakerConfig;
//! use story_resilience::service::{ElementService, ElementType, InMemoryElementService};
//!
//! # async fn demo() -> story_resilience::Result<()> {
//! let config = ResilienceConfig::new(CircuitBreakerConfig::new(5, Duration::from_secs(30)));
//! let svc = ResilientServiceBuilder::new()
//!     .config(config)
//!     .build(Arc::new(InMemoryElementService::new()))?;
//! let aria = svc.create_element(ElementType::Character, "Aria", "A wandering bard").await?;
//! assert_eq!(svc.get_element_by_id(aria.id).await?, Some(aria));
//! svc.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod builder;
pub mod fallback;
mod resilient;
mod signals;

pub use builder::ResilientServiceBuilder;
pub use resilient::{operations, reconcile_category, ResilientElementService};
pub use signals::ResilienceSnapshot;
