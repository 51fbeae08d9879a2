//! Call-wrapping fault-tolerance primitives.
//!
//! Both components are pure decorators around an async call: they add short-circuiting
//! and backoff but never turn a failure into a success, and they know nothing about
//! the cache or the background queue.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Per-key Closed/Open/HalfOpen breaker that fails fast |
//! | [`retry`] | Bounded exponential-backoff retry executor |
//!
//! They compose with retries inside the breaker, so one exhausted retry loop counts as
//! a single breaker failure:
//!
//! ```rust
//! use story_resilience::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use story_resilience::resilience::retry::{RetryConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn demo() -> story_resilience::Result<u32> {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(5, Duration::from_secs(30)));
//! let retry = RetryPolicy::new(RetryConfig::new().with_max_retries(2));
//!
//! breaker
//!     .execute("element_42", || retry.execute("get_element", || async { Ok(42) }))
//!     .await
//! # }
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitSnapshot, CircuitState,
};
pub use retry::{RetryConfig, RetryPolicy, DEFAULT_MAX_RETRIES};
