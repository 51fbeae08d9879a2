//! Background task queue for deferred reconciliation.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BackgroundTaskQueue`] | Priority queue drained by a pool of Tokio workers |
//! | [`QueueConfig`] | Worker pool size |
//! | [`TaskPriority`] | `High` > `Normal` > `Low`, FIFO within a band |
//! | [`QueueStats`] | Enqueue/outcome counters |
//!
//! Tasks carry an explicit category tag used for the per-category counters. Delivery
//! is at-most-once and in-memory only.
//!
//! ```rust
//! use story_resilience::queue::{BackgroundTaskQueue, QueueConfig, TaskPriority};
//!
//! # async fn demo() -> story_resilience::Result<()> {
//! let queue = BackgroundTaskQueue::start(QueueConfig::default())?;
//! queue.enqueue_with_priority(
//!     "reconcile_link_elements",
//!     |(a, b): (i64, i64)| async move {
//!         println!("linking {a} and {b}");
//!         Ok(())
//!     },
//!     (1, 2),
//!     TaskPriority::High,
//! )?;
//! queue.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod executor;
mod task;

pub use executor::{BackgroundTaskQueue, QueueConfig, QueueStats};
pub use task::{TaskId, TaskPriority};
