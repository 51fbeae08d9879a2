//! Priority work queue drained by a pool of Tokio workers.

use super::task::{BackgroundTask, TaskAction, TaskId, TaskPriority};
use crate::{Error, ErrorContext, Result};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of worker loops draining the queue concurrently.
    pub worker_count: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { worker_count: 2 }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::configuration_with_context(
                "queue needs at least one worker",
                ErrorContext::new()
                    .with_field_path("queue.worker_count")
                    .with_source("background_queue"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued_high: u64,
    pub enqueued_normal: u64,
    pub enqueued_low: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub rejected: u64,
}

impl QueueStats {
    pub fn enqueued(&self, priority: TaskPriority) -> u64 {
        match priority {
            TaskPriority::High => self.enqueued_high,
            TaskPriority::Normal => self.enqueued_normal,
            TaskPriority::Low => self.enqueued_low,
        }
    }
    pub fn total_enqueued(&self) -> u64 {
        self.enqueued_high + self.enqueued_normal + self.enqueued_low
    }
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.panicked
    }
}

#[derive(Default)]
struct AtomicQueueStats {
    enqueued_high: AtomicU64,
    enqueued_normal: AtomicU64,
    enqueued_low: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    rejected: AtomicU64,
}

impl AtomicQueueStats {
    fn record_enqueue(&self, priority: TaskPriority) {
        let counter = match priority {
            TaskPriority::High => &self.enqueued_high,
            TaskPriority::Normal => &self.enqueued_normal,
            TaskPriority::Low => &self.enqueued_low,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn to_stats(&self) -> QueueStats {
        QueueStats {
            enqueued_high: self.enqueued_high.load(Ordering::Relaxed),
            enqueued_normal: self.enqueued_normal.load(Ordering::Relaxed),
            enqueued_low: self.enqueued_low.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct Pending {
    heap: BinaryHeap<BackgroundTask>,
    /// Queued plus running tasks, per category.
    outstanding: HashMap<String, usize>,
    outstanding_total: usize,
}

struct Shared {
    pending: Mutex<Pending>,
    task_ready: Notify,
    idle: Notify,
    closed: AtomicBool,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    stats: AtomicQueueStats,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self) -> Option<BackgroundTask> {
        self.lock().heap.pop()
    }

    fn finish(&self, category: &str) {
        let mut pending = self.lock();
        if let Some(count) = pending.outstanding.get_mut(category) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pending.outstanding.remove(category);
            }
        }
        pending.outstanding_total = pending.outstanding_total.saturating_sub(1);
        if pending.outstanding_total == 0 {
            self.idle.notify_waiters();
        }
    }

    async fn run(&self, task: BackgroundTask, worker: usize) {
        let BackgroundTask {
            id,
            category,
            priority,
            enqueued_at,
            action,
        } = task;
        debug!(
            worker,
            task_id = %id,
            category = category.as_str(),
            priority = %priority,
            queued_ms = enqueued_at.elapsed().as_millis() as u64,
            "running background task"
        );

        let outcome = AssertUnwindSafe(async move { action().await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker,
                    task_id = %id,
                    category = category.as_str(),
                    priority = %priority,
                    error = %e,
                    "background task failed"
                );
            }
            Err(panic) => {
                self.stats.panicked.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker,
                    task_id = %id,
                    category = category.as_str(),
                    priority = %priority,
                    panic = panic_message(&panic),
                    "background task panicked"
                );
            }
        }
        self.finish(&category);
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) {
    debug!(worker, "background worker started");
    loop {
        let notified = shared.task_ready.notified();
        let task = match shared.pop() {
            Some(task) => task,
            None => {
                if shared.shutdown.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = notified => {}
                    _ = shared.shutdown.cancelled() => {}
                }
                continue;
            }
        };
        shared.run(task, worker).await;
    }
    debug!(worker, "background worker stopped");
}

/// In-memory priority queue for best-effort deferred work.
///
/// `enqueue` returns as soon as the task is accepted. Workers always take the highest
/// priority task first and keep FIFO order within a band. Task errors and panics are
/// logged and counted; they never stop a worker. Nothing is persisted: tasks still
/// queued when the process exits are lost.
///
/// Shutdown drains: the queue stops accepting work, workers finish every task that was
/// already accepted, then exit.
pub struct BackgroundTaskQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTaskQueue {
    /// Spawn the worker pool on the current Tokio runtime.
    pub fn start(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::runtime_with_context(
                "background queue must be started inside a Tokio runtime",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("background_queue"),
            )
        })?;
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            task_ready: Notify::new(),
            idle: Notify::new(),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            stats: AtomicQueueStats::default(),
        });
        let workers = (0..config.worker_count)
            .map(|worker| handle.spawn(worker_loop(shared.clone(), worker)))
            .collect();
        debug!(workers = config.worker_count, "background queue started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue at [`TaskPriority::Normal`].
    pub fn enqueue<A, F, Fut>(&self, category: impl Into<String>, action: F, argument: A) -> Result<TaskId>
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.enqueue_with_priority(category, action, argument, TaskPriority::Normal)
    }

    /// Accept `action(argument)` for later execution under `category`.
    ///
    /// Fails with [`Error::QueueClosed`] once shutdown has begun.
    pub fn enqueue_with_priority<A, F, Fut>(
        &self,
        category: impl Into<String>,
        action: F,
        argument: A,
        priority: TaskPriority,
    ) -> Result<TaskId>
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let category = category.into();
        let action: TaskAction = Box::new(move || action(argument).boxed());
        let id = {
            let mut pending = self.shared.lock();
            if self.shared.closed.load(Ordering::Acquire) {
                self.shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(Error::QueueClosed { category });
            }
            let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
            *pending.outstanding.entry(category.clone()).or_insert(0) += 1;
            pending.outstanding_total += 1;
            pending.heap.push(BackgroundTask {
                id,
                category: category.clone(),
                priority,
                enqueued_at: Instant::now(),
                action,
            });
            id
        };
        self.shared.stats.record_enqueue(priority);
        self.shared.task_ready.notify_one();
        debug!(task_id = %id, category = category.as_str(), priority = %priority, "task enqueued");
        Ok(id)
    }

    /// Outstanding (queued or running) tasks in `category`.
    pub fn get_task_count(&self, category: &str) -> usize {
        self.shared
            .lock()
            .outstanding
            .get(category)
            .copied()
            .unwrap_or(0)
    }

    pub fn get_total_task_count(&self) -> usize {
        self.shared.lock().outstanding_total
    }

    pub fn get_all_task_counts(&self) -> HashMap<String, usize> {
        self.shared.lock().outstanding.clone()
    }

    /// Tasks accepted but not yet picked up by a worker.
    pub fn queued_count(&self) -> usize {
        self.shared.lock().heap.len()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats.to_stats()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Resolve once no task is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if self.get_total_task_count() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stop accepting work, let workers drain the accepted tasks, and join them.
    pub async fn shutdown(&self) {
        self.close();
        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "background worker terminated abnormally");
            }
        }
        info!(stats = ?self.stats(), "background queue shut down");
    }

    fn close(&self) {
        {
            let _pending = self.shared.lock();
            self.shared.closed.store(true, Ordering::Release);
        }
        self.shared.shutdown.cancel();
    }
}

impl Drop for BackgroundTaskQueue {
    fn drop(&mut self) {
        // Detached workers still drain what was accepted, then exit.
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    fn queue(workers: usize) -> BackgroundTaskQueue {
        BackgroundTaskQueue::start(QueueConfig::new().with_worker_count(workers)).unwrap()
    }

    /// Occupies the single worker until the returned sender fires.
    fn block_worker(q: &BackgroundTaskQueue) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel::<()>();
        q.enqueue_with_priority(
            "gate",
            |rx: oneshot::Receiver<()>| async move {
                let _ = rx.await;
                Ok(())
            },
            rx,
            TaskPriority::High,
        )
        .unwrap();
        tx
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let result = BackgroundTaskQueue::start(QueueConfig::default());
        assert!(matches!(result, Err(Error::Runtime { .. })));
    }

    #[test]
    fn test_config_validation() {
        assert!(QueueConfig::new().with_worker_count(0).validate().is_err());
        assert_eq!(QueueConfig::default().worker_count, 2);
    }

    #[tokio::test]
    async fn test_runs_by_priority_then_fifo() {
        let q = queue(1);
        let gate = block_worker(&q);
        tokio::task::yield_now().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, priority) in [
            ("low", TaskPriority::Low),
            ("normal-1", TaskPriority::Normal),
            ("high-1", TaskPriority::High),
            ("normal-2", TaskPriority::Normal),
            ("high-2", TaskPriority::High),
        ] {
            let order = order.clone();
            q.enqueue_with_priority(
                "ordering",
                move |label: &'static str| async move {
                    order.lock().unwrap().push(label);
                    Ok(())
                },
                label,
                priority,
            )
            .unwrap();
        }
        assert_eq!(q.get_task_count("ordering"), 5);

        gate.send(()).unwrap();
        q.wait_idle().await;
        assert_eq!(
            *order.lock().unwrap(),
            vec!["high-1", "high-2", "normal-1", "normal-2", "low"]
        );
        assert_eq!(q.get_total_task_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_task_does_not_stop_worker() {
        let q = queue(1);
        let ran = Arc::new(AtomicUsize::new(0));

        q.enqueue("broken", |_: ()| async { Err(Error::runtime_with_context("boom", ErrorContext::new())) }, ())
            .unwrap();
        q.enqueue(
            "broken",
            |explode: bool| async move {
                if explode {
                    panic!("worse");
                }
                Ok(())
            },
            true,
        )
        .unwrap();
        let counter = ran.clone();
        q.enqueue(
            "healthy",
            move |n: usize| async move {
                counter.fetch_add(n, Ordering::SeqCst);
                Ok(())
            },
            3,
        )
        .unwrap();

        q.wait_idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        let stats = q.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.enqueued(TaskPriority::Normal), 3);
    }

    #[tokio::test]
    async fn test_counts_grouped_by_category() {
        let q = queue(1);
        let gate = block_worker(&q);
        for _ in 0..2 {
            q.enqueue("reconcile_create_element", |_: ()| async { Ok(()) }, ()).unwrap();
        }
        q.enqueue("refresh_search", |_: ()| async { Ok(()) }, ()).unwrap();

        assert_eq!(q.get_task_count("reconcile_create_element"), 2);
        assert_eq!(q.get_task_count("refresh_search"), 1);
        assert_eq!(q.get_task_count("unknown"), 0);
        let all = q.get_all_task_counts();
        assert_eq!(all.get("gate"), Some(&1));
        assert_eq!(q.get_total_task_count(), 4);

        gate.send(()).unwrap();
        q.wait_idle().await;
        assert!(q.get_all_task_counts().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let q = queue(2);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let ran = ran.clone();
            q.enqueue_with_priority(
                "work",
                move |_: ()| async move {
                    tokio::task::yield_now().await;
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                (),
                TaskPriority::Low,
            )
            .unwrap();
        }

        q.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert!(q.is_closed());

        let rejected = q.enqueue("work", |_: ()| async { Ok(()) }, ());
        assert!(matches!(rejected, Err(Error::QueueClosed { ref category }) if category == "work"));
        assert_eq!(q.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_enqueue_does_not_wait_for_execution() {
        let q = queue(1);
        let (tx, rx) = oneshot::channel::<()>();
        q.enqueue("slow", |rx: oneshot::Receiver<()>| async move {
            let _ = rx.await;
            Ok(())
        }, rx)
        .unwrap();
        // Returned immediately although the task is still blocked
        assert_eq!(q.get_task_count("slow"), 1);
        tx.send(()).unwrap();
        q.wait_idle().await;
        assert_eq!(q.stats().completed, 1);
    }
}
