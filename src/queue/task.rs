//! Background task types.

use crate::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tokio::time::Instant;

/// Scheduling band. Higher bands are always dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
        };
        f.write_str(s)
    }
}

/// Monotonic id assigned at enqueue time; doubles as the FIFO tiebreaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

pub(crate) type TaskAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A unit of deferred work. Runs at most once and is never retried by the queue.
pub(crate) struct BackgroundTask {
    pub id: TaskId,
    pub category: String,
    pub priority: TaskPriority,
    pub enqueued_at: Instant,
    pub action: TaskAction,
}

impl PartialEq for BackgroundTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BackgroundTask {}

impl PartialOrd for BackgroundTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Max-heap order: higher priority first, then lower id (earlier enqueue) first.
impl Ord for BackgroundTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn task(id: u64, priority: TaskPriority) -> BackgroundTask {
        BackgroundTask {
            id: TaskId(id),
            category: "test".into(),
            priority,
            enqueued_at: Instant::now(),
            action: Box::new(|| Box::pin(async { Ok(()) })),
        }
    }

    #[test]
    fn test_heap_orders_by_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(task(1, TaskPriority::Low));
        heap.push(task(2, TaskPriority::Normal));
        heap.push(task(3, TaskPriority::High));
        heap.push(task(4, TaskPriority::Normal));
        heap.push(task(5, TaskPriority::High));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|t| t.id.0)).collect();
        assert_eq!(order, vec![3, 5, 2, 4, 1]);
    }

    #[test]
    fn test_priority_default_and_display() {
        assert_eq!(TaskPriority::default(), TaskPriority::Normal);
        assert_eq!(TaskPriority::High.to_string(), "high");
        assert_eq!(TaskId(7).to_string(), "task-7");
    }
}
