//! # story-resilience
//!
//! Fault-tolerance layer for a story-element service, keeping an authoring
//! application usable while its backend is slow, flaky or unreachable.
//!
//! ## Overview
//!
//! The crate wraps any [`service::ElementService`] in a drop-in decorator,
//! [`ResilientElementService`]. Calls are answered from a TTL cache when possible,
//! otherwise they run through a circuit breaker around a bounded retry loop. When
//! that path fails the caller still gets an answer right away (an offline placeholder
//! or an empty result) and a High-priority background task replays the original
//! request against the unwrapped service later.
//!
//! ## Key Features
//!
//! - **Circuit breaker**: per-key Closed/Open/HalfOpen state with a single trial call
//! - **Retry**: exponential backoff capped at a maximum delay, last error returned untouched
//! - **Cache**: typed TTL cache with separate element and search lifetimes
//! - **Background queue**: priority work queue drained by Tokio workers
//! - **Offline fallback**: placeholders plus reconciliation tasks for every operation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use story_resilience::config::ResilienceConfig;
//! use story_resilience::service::{ElementService, ElementType, InMemoryElementService};
//! use story_resilience::ResilientServiceBuilder;
//!
//! #[tokio::main]
//! async fn main() -> story_resilience::Result<()> {
//!     story_resilience::logging::init_tracing("story_resilience=info");
//!     let config = ResilienceConfig::from_yaml_file("resilience.yaml")?.with_env_overrides();
//!     let svc = ResilientServiceBuilder::new()
//!         .config(config)
//!         .build(Arc::new(InMemoryElementService::new()))?;
//!
//!     let keep = svc.create_element(ElementType::Location, "Keep", "Old stones").await?;
//!     println!("{} -> {}", keep.id, keep.title);
//!     svc.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Circuit breaker and retry policy |
//! | [`cache`] | TTL cache manager and backends |
//! | [`queue`] | Background priority task queue |
//! | [`service`] | Wrapped service contract and in-memory implementation |
//! | [`facade`] | Resilient decorator, builder, offline fallbacks |
//! | [`config`] | YAML configuration with environment overrides |
//! | [`logging`] | Tracing subscriber bootstrap |
//! | [`error`] | Error types |

pub mod cache;
pub mod config;
pub mod facade;
pub mod logging;
pub mod queue;
pub mod resilience;
pub mod service;
pub mod utils;

pub use config::ResilienceConfig;
pub use facade::{ResilienceSnapshot, ResilientElementService, ResilientServiceBuilder};
pub use service::{Element, ElementService, ElementType};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

// Re-export error types
pub mod error;
pub use error::{Error, ErrorContext};
