//! Resilient decorator around an [`ElementService`].

use super::fallback;
use super::signals::ResilienceSnapshot;
use crate::cache::{CacheKey, CacheManager};
use crate::queue::{BackgroundTaskQueue, TaskPriority};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retry::RetryPolicy;
use crate::service::{Element, ElementService, ElementType};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Logical operation names. They key the retry records, name the circuits of
/// operations without an element id, and prefix reconciliation task categories.
pub mod operations {
    pub const CREATE_ELEMENT: &str = "create_element";
    pub const GET_ELEMENT: &str = "get_element_by_id";
    pub const SEARCH_ELEMENTS: &str = "search_elements";
    pub const UPDATE_ELEMENT: &str = "update_element";
    pub const DELETE_ELEMENT: &str = "delete_element";
    pub const LINK_ELEMENTS: &str = "link_elements";
    pub const LOAD_LARGE_DATASET: &str = "load_large_dataset";
}

use operations as ops;

/// Category under which the reconciliation task for `operation` is queued.
pub fn reconcile_category(operation: &str) -> String {
    format!("reconcile_{}", operation)
}

/// The wrapped service and cache, handed to reconciliation tasks.
struct Reconcile<S> {
    inner: Arc<S>,
    cache: Arc<CacheManager>,
}

/// Fault-tolerant façade exposing the same operations as the service it wraps.
///
/// Reads are answered from the cache when possible. Everything else goes through
/// `breaker(retry(service))`, so an exhausted retry loop is one breaker failure.
/// When that path fails the caller gets an offline placeholder right away and a
/// High-priority task re-runs the original call against the unwrapped service later.
pub struct ResilientElementService<S> {
    inner: Arc<S>,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryPolicy>,
    cache: Arc<CacheManager>,
    queue: Arc<BackgroundTaskQueue>,
}

impl<S: ElementService + 'static> ResilientElementService<S> {
    pub fn new(
        inner: Arc<S>,
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryPolicy>,
        cache: Arc<CacheManager>,
        queue: Arc<BackgroundTaskQueue>,
    ) -> Self {
        Self {
            inner,
            breaker,
            retry,
            cache,
            queue,
        }
    }

    /// The unwrapped service.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
    pub fn retry_policy(&self) -> &Arc<RetryPolicy> {
        &self.retry
    }
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }
    pub fn queue(&self) -> &Arc<BackgroundTaskQueue> {
        &self.queue
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        ResilienceSnapshot {
            circuits: self.breaker.get_all_states(),
            active_retries: self.retry.get_active_retry_count(),
            queued_tasks: self.queue.get_all_task_counts(),
            queue: self.queue.stats(),
            cache: self.cache.stats(),
        }
    }

    /// Drain pending reconciliation work and stop the workers.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    async fn call_through<T, F, Fut>(&self, circuit_key: &str, operation_id: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker
            .execute(circuit_key, || self.retry.execute(operation_id, call))
            .await
    }

    async fn cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store<T: Serialize + Sync>(&self, key: &CacheKey, value: &T) {
        if let Err(e) = self.cache.set(key, value).await {
            warn!(key = %key, error = %e, "cache write failed");
        }
    }

    async fn evict(&self, key: &CacheKey) {
        if let Err(e) = self.cache.invalidate(key).await {
            warn!(key = %key, error = %e, "cache invalidation failed");
        }
    }

    fn reconcile_ctx(&self) -> Reconcile<S> {
        Reconcile {
            inner: self.inner.clone(),
            cache: self.cache.clone(),
        }
    }

    /// Log the degraded outcome and queue `action(argument)` at High priority.
    fn degrade<A, F, Fut>(&self, operation: &str, cause: &Error, action: F, argument: A)
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        error!(
            operation,
            error = %cause,
            circuit_open = cause.is_circuit_open(),
            "backend call failed, serving offline fallback"
        );
        match self.queue.enqueue_with_priority(
            reconcile_category(operation),
            action,
            argument,
            TaskPriority::High,
        ) {
            Ok(task_id) => debug!(operation, task_id = %task_id, "reconciliation scheduled"),
            Err(e) => error!(operation, error = %e, "could not schedule reconciliation"),
        }
    }
}

#[async_trait]
impl<S: ElementService + 'static> ElementService for ResilientElementService<S> {
    async fn create_element(
        &self,
        element_type: ElementType,
        title: &str,
        description: &str,
    ) -> Result<Element> {
        let inner = &self.inner;
        let outcome = self
            .call_through(ops::CREATE_ELEMENT, ops::CREATE_ELEMENT, || {
                inner.create_element(element_type, title, description)
            })
            .await;
        match outcome {
            Ok(created) => {
                self.store(&CacheKey::element(created.id), &created).await;
                Ok(created)
            }
            Err(e) => {
                self.degrade(
                    ops::CREATE_ELEMENT,
                    &e,
                    |(ctx, element_type, title, description): (Reconcile<S>, ElementType, String, String)| async move {
                        let created = ctx
                            .inner
                            .create_element(element_type, &title, &description)
                            .await?;
                        ctx.cache.set(&CacheKey::element(created.id), &created).await
                    },
                    (
                        self.reconcile_ctx(),
                        element_type,
                        title.to_string(),
                        description.to_string(),
                    ),
                );
                Ok(fallback::offline_created(element_type, title, description))
            }
        }
    }

    async fn get_element_by_id(&self, id: i64) -> Result<Option<Element>> {
        let key = CacheKey::element(id);
        if let Some(hit) = self.cached::<Element>(&key).await {
            return Ok(Some(hit));
        }
        let inner = &self.inner;
        let outcome = self
            .call_through(key.as_str(), ops::GET_ELEMENT, || inner.get_element_by_id(id))
            .await;
        match outcome {
            Ok(found) => {
                if let Some(element) = &found {
                    self.store(&key, element).await;
                }
                Ok(found)
            }
            Err(e) => {
                self.degrade(
                    ops::GET_ELEMENT,
                    &e,
                    |(ctx, id): (Reconcile<S>, i64)| async move {
                        match ctx.inner.get_element_by_id(id).await? {
                            Some(element) => ctx.cache.set(&CacheKey::element(id), &element).await,
                            None => Ok(()),
                        }
                    },
                    (self.reconcile_ctx(), id),
                );
                Ok(None)
            }
        }
    }

    async fn search_elements(&self, term: &str) -> Result<Vec<Element>> {
        let key = CacheKey::search(term);
        if let Some(hit) = self.cached::<Vec<Element>>(&key).await {
            return Ok(hit);
        }
        let inner = &self.inner;
        let outcome = self
            .call_through(ops::SEARCH_ELEMENTS, ops::SEARCH_ELEMENTS, || {
                inner.search_elements(term)
            })
            .await;
        match outcome {
            Ok(found) => {
                self.store(&key, &found).await;
                Ok(found)
            }
            Err(e) => {
                self.degrade(
                    ops::SEARCH_ELEMENTS,
                    &e,
                    |(ctx, term): (Reconcile<S>, String)| async move {
                        let found = ctx.inner.search_elements(&term).await?;
                        ctx.cache.set(&CacheKey::search(&term), &found).await
                    },
                    (self.reconcile_ctx(), term.to_string()),
                );
                Ok(Vec::new())
            }
        }
    }

    async fn update_element(&self, element: Element) -> Result<Element> {
        let key = CacheKey::element(element.id);
        let inner = &self.inner;
        let outcome = self
            .call_through(key.as_str(), ops::UPDATE_ELEMENT, || {
                inner.update_element(element.clone())
            })
            .await;
        match outcome {
            Ok(updated) => {
                self.store(&key, &updated).await;
                Ok(updated)
            }
            Err(e) => {
                let placeholder = fallback::offline_updated(&element);
                self.degrade(
                    ops::UPDATE_ELEMENT,
                    &e,
                    |(ctx, element): (Reconcile<S>, Element)| async move {
                        let updated = ctx.inner.update_element(element).await?;
                        ctx.cache.set(&CacheKey::element(updated.id), &updated).await
                    },
                    (self.reconcile_ctx(), element),
                );
                Ok(placeholder)
            }
        }
    }

    async fn delete_element(&self, id: i64) -> Result<bool> {
        let key = CacheKey::element(id);
        let inner = &self.inner;
        let outcome = self
            .call_through(key.as_str(), ops::DELETE_ELEMENT, || inner.delete_element(id))
            .await;
        // The element is gone or going; either way the cached copy is stale.
        self.evict(&key).await;
        match outcome {
            Ok(deleted) => Ok(deleted),
            Err(e) => {
                self.degrade(
                    ops::DELETE_ELEMENT,
                    &e,
                    |(ctx, id): (Reconcile<S>, i64)| async move {
                        ctx.inner.delete_element(id).await?;
                        ctx.cache.invalidate(&CacheKey::element(id)).await.map(|_| ())
                    },
                    (self.reconcile_ctx(), id),
                );
                Ok(true)
            }
        }
    }

    async fn link_elements(&self, a: i64, b: i64) -> Result<bool> {
        let inner = &self.inner;
        let outcome = self
            .call_through(ops::LINK_ELEMENTS, ops::LINK_ELEMENTS, || inner.link_elements(a, b))
            .await;
        match outcome {
            Ok(linked) => Ok(linked),
            Err(e) => {
                self.degrade(
                    ops::LINK_ELEMENTS,
                    &e,
                    |(inner, a, b): (Arc<S>, i64, i64)| async move {
                        inner.link_elements(a, b).await.map(|_| ())
                    },
                    (self.inner.clone(), a, b),
                );
                Ok(true)
            }
        }
    }

    async fn load_large_dataset(&self, count: usize) -> Result<()> {
        let inner = &self.inner;
        let outcome = self
            .call_through(ops::LOAD_LARGE_DATASET, ops::LOAD_LARGE_DATASET, || {
                inner.load_large_dataset(count)
            })
            .await;
        if let Err(e) = outcome {
            self.degrade(
                ops::LOAD_LARGE_DATASET,
                &e,
                |(inner, count): (Arc<S>, usize)| async move { inner.load_large_dataset(count).await },
                (self.inner.clone(), count),
            );
        }
        Ok(())
    }
}
