use crate::{Error, ErrorContext, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit states. Every key starts `Closed`; there is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls fail fast until the recovery timeout has elapsed.
    Open,
    /// A single trial call is in flight deciding between Closed and Open.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Rejection raised while a circuit is open. The protected call was not invoked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker open for '{key}' (retry in {}ms)", .retry_in.as_millis())]
pub struct CircuitOpenError {
    pub key: String,
    /// Time left before the circuit admits a trial call. Zero while a trial is in flight.
    pub retry_in: Duration,
}

impl CircuitOpenError {
    pub fn new(key: impl Into<String>, retry_in: Duration) -> Self {
        Self {
            key: key.into(),
            retry_in,
        }
    }
}

/// Breaker thresholds. Both values are required; there is no `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip a Closed circuit.
    pub failure_threshold: u32,
    /// How long an Open circuit rejects calls before admitting a trial.
    #[serde(rename = "recovery_timeout_ms", with = "crate::utils::duration_ms")]
    pub recovery_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::configuration_with_context(
                "failure threshold must be at least 1",
                ErrorContext::new()
                    .with_field_path("circuit_breaker.failure_threshold")
                    .with_source("circuit_breaker"),
            ));
        }
        if self.recovery_timeout.is_zero() {
            return Err(Error::configuration_with_context(
                "recovery timeout must be greater than zero",
                ErrorContext::new()
                    .with_field_path("circuit_breaker.recovery_timeout_ms")
                    .with_source("circuit_breaker"),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub opened_at: Option<Instant>,
    /// Remaining open time, if currently open and still cooling down.
    pub open_remaining: Option<Duration>,
}

#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    fn open_remaining(&self, recovery_timeout: Duration, now: Instant) -> Duration {
        match self.opened_at {
            Some(at) => recovery_timeout.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }
}

type SharedRecord = Arc<Mutex<CircuitRecord>>;

fn lock(record: &SharedRecord) -> MutexGuard<'_, CircuitRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Admission ticket for one protected call.
///
/// A HalfOpen trial that is dropped before reporting its outcome (for instance a
/// cancelled future) frees the trial slot so the next caller can probe again.
struct Permit {
    record: SharedRecord,
    trial: bool,
    settled: bool,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut rec = lock(&self.record);
            if rec.state == CircuitState::HalfOpen {
                rec.trial_in_flight = false;
            }
        }
    }
}

/// Per-key circuit breaker.
///
/// Records live in a concurrent map owned by the breaker instance, one mutex per key,
/// so unrelated keys never contend. The mutex is never held across the protected call.
/// Open→HalfOpen is evaluated lazily when the next call for the key arrives.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    circuits: DashMap<String, SharedRecord>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            circuits: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    /// Run `call` under the circuit for `key`.
    ///
    /// The call's own error is returned unchanged; a rejection is converted into the
    /// caller's error type through `From<CircuitOpenError>`.
    pub async fn execute<T, E, F, Fut>(&self, key: &str, call: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        let mut permit = self.acquire(key).map_err(E::from)?;
        let result = call().await;
        match &result {
            Ok(_) => self.on_success(key, &permit.record, permit.trial),
            Err(_) => self.on_failure(key, &permit.record, permit.trial),
        }
        permit.settled = true;
        result
    }

    fn record(&self, key: &str) -> SharedRecord {
        if let Some(existing) = self.circuits.get(key) {
            return existing.clone();
        }
        self.circuits
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitRecord::new())))
            .clone()
    }

    fn acquire(&self, key: &str) -> std::result::Result<Permit, CircuitOpenError> {
        let record = self.record(key);
        let now = Instant::now();
        let trial = {
            let mut rec = lock(&record);
            match rec.state {
                CircuitState::Closed => false,
                CircuitState::Open => {
                    let remaining = rec.open_remaining(self.cfg.recovery_timeout, now);
                    if !remaining.is_zero() {
                        error!(key, retry_in_ms = remaining.as_millis() as u64, "circuit open, call rejected");
                        return Err(CircuitOpenError::new(key, remaining));
                    }
                    rec.state = CircuitState::HalfOpen;
                    rec.trial_in_flight = true;
                    info!(key, "circuit half-open, admitting trial call");
                    true
                }
                CircuitState::HalfOpen => {
                    if rec.trial_in_flight {
                        error!(key, "circuit half-open with trial in flight, call rejected");
                        return Err(CircuitOpenError::new(key, Duration::ZERO));
                    }
                    rec.trial_in_flight = true;
                    info!(key, "circuit half-open, admitting trial call");
                    true
                }
            }
        };
        Ok(Permit {
            record,
            trial,
            settled: false,
        })
    }

    /// Only the trial permit may settle a HalfOpen circuit. Calls admitted before the
    /// circuit tripped report back into whatever state they find and leave it alone.
    fn on_success(&self, key: &str, record: &SharedRecord, trial: bool) {
        let mut rec = lock(record);
        match rec.state {
            CircuitState::HalfOpen if trial => {
                rec.state = CircuitState::Closed;
                rec.consecutive_failures = 0;
                rec.opened_at = None;
                rec.trial_in_flight = false;
                info!(key, "circuit recovered, closed");
            }
            CircuitState::Closed => rec.consecutive_failures = 0,
            CircuitState::HalfOpen | CircuitState::Open => {
                debug!(key, state = %rec.state, "late success ignored");
            }
        }
    }

    fn on_failure(&self, key: &str, record: &SharedRecord, trial: bool) {
        let now = Instant::now();
        let mut rec = lock(record);
        rec.last_failure_at = Some(now);
        match rec.state {
            CircuitState::HalfOpen if trial => {
                rec.consecutive_failures = rec.consecutive_failures.saturating_add(1);
                rec.state = CircuitState::Open;
                rec.opened_at = Some(now);
                rec.trial_in_flight = false;
                error!(key, failures = rec.consecutive_failures, "trial call failed, circuit re-opened");
            }
            CircuitState::Closed => {
                rec.consecutive_failures = rec.consecutive_failures.saturating_add(1);
                if rec.consecutive_failures >= self.cfg.failure_threshold {
                    rec.state = CircuitState::Open;
                    rec.opened_at = Some(now);
                    error!(
                        key,
                        failures = rec.consecutive_failures,
                        threshold = self.cfg.failure_threshold,
                        "failure threshold reached, circuit opened"
                    );
                } else {
                    warn!(key, failures = rec.consecutive_failures, "protected call failed");
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                debug!(key, state = %rec.state, "late failure recorded, state unchanged");
            }
        }
    }

    /// Current state for `key`. Unknown keys report `Closed`; no record is created.
    pub fn get_state(&self, key: &str) -> CircuitState {
        self.circuits
            .get(key)
            .map(|r| lock(r.value()).state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn get_failure_count(&self, key: &str) -> u32 {
        self.circuits
            .get(key)
            .map(|r| lock(r.value()).consecutive_failures)
            .unwrap_or(0)
    }

    pub fn get_all_states(&self) -> HashMap<String, CircuitState> {
        self.circuits
            .iter()
            .map(|entry| (entry.key().clone(), lock(entry.value()).state))
            .collect()
    }

    pub fn snapshot(&self, key: &str) -> Option<CircuitSnapshot> {
        let record = self.circuits.get(key)?.clone();
        let now = Instant::now();
        let rec = lock(&record);
        let open_remaining = match rec.state {
            CircuitState::Open => Some(rec.open_remaining(self.cfg.recovery_timeout, now))
                .filter(|d| !d.is_zero()),
            _ => None,
        };
        Some(CircuitSnapshot {
            key: key.to_string(),
            state: rec.state,
            consecutive_failures: rec.consecutive_failures,
            last_failure_at: rec.last_failure_at,
            opened_at: rec.opened_at,
            open_remaining,
        })
    }

    /// Force `key` back to Closed with zero failures. Administrative use only.
    pub fn reset(&self, key: &str) {
        if let Some(record) = self.circuits.get(key) {
            let mut rec = lock(record.value());
            *rec = CircuitRecord::new();
            info!(key, "circuit manually reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Open(String),
        Boom,
    }

    impl From<CircuitOpenError> for TestError {
        fn from(e: CircuitOpenError) -> Self {
            TestError::Open(e.key)
        }
    }

    fn breaker(threshold: u32, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig::new(
            threshold,
            Duration::from_millis(recovery_ms),
        ))
    }

    async fn fail(cb: &CircuitBreaker, key: &str, calls: &AtomicUsize) -> std::result::Result<(), TestError> {
        cb.execute(key, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError::Boom)
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker, key: &str, calls: &AtomicUsize) -> std::result::Result<u32, TestError> {
        cb.execute(key, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TestError>(7)
        })
        .await
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::new(3, Duration::from_secs(1)).validate().is_ok());
        assert!(CircuitBreakerConfig::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(CircuitBreakerConfig::new(3, Duration::ZERO).validate().is_err());
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = breaker(3, 10_000);
        let calls = AtomicUsize::new(0);

        for i in 1..=3 {
            assert_eq!(fail(&cb, "k", &calls).await, Err(TestError::Boom));
            assert_eq!(cb.get_failure_count("k"), i);
        }
        assert_eq!(cb.get_state("k"), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // The (N+1)-th call is rejected without running the closure
        let result = succeed(&cb, "k", &calls).await;
        assert_eq!(result, Err(TestError::Open("k".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(3, 1_000);
        let calls = AtomicUsize::new(0);
        let _ = fail(&cb, "k", &calls).await;
        let _ = fail(&cb, "k", &calls).await;
        assert_eq!(cb.get_failure_count("k"), 2);

        assert_eq!(succeed(&cb, "k", &calls).await, Ok(7));
        assert_eq!(cb.get_failure_count("k"), 0);
        assert_eq!(cb.get_state("k"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(2, 500);
        let calls = AtomicUsize::new(0);
        let _ = fail(&cb, "k", &calls).await;
        let _ = fail(&cb, "k", &calls).await;
        assert_eq!(cb.get_state("k"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(501)).await;
        // Nothing heals without traffic
        assert_eq!(cb.get_state("k"), CircuitState::Open);

        let observed = cb
            .execute("k", || async {
                Ok::<_, TestError>(cb.get_state("k"))
            })
            .await;
        assert_eq!(observed, Ok(CircuitState::HalfOpen));
        assert_eq!(cb.get_state("k"), CircuitState::Closed);
        assert_eq!(cb.get_failure_count("k"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 500);
        let calls = AtomicUsize::new(0);
        let _ = fail(&cb, "k", &calls).await;
        assert_eq!(cb.get_state("k"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(fail(&cb, "k", &calls).await, Err(TestError::Boom));
        assert_eq!(cb.get_state("k"), CircuitState::Open);

        // Re-opened with a fresh window
        let snap = cb.snapshot("k").unwrap();
        assert!(snap.open_remaining.is_some());
        assert_eq!(succeed(&cb, "k", &calls).await, Err(TestError::Open("k".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_rejected_during_trial() {
        let cb = Arc::new(breaker(1, 100));
        let calls = AtomicUsize::new(0);
        let _ = fail(&cb, "k", &calls).await;
        tokio::time::advance(Duration::from_millis(150)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .execute("k", || async move {
                    let _ = release_rx.await;
                    Ok::<_, TestError>(1)
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(cb.get_state("k"), CircuitState::HalfOpen);

        let second = succeed(&cb, "k", &calls).await;
        assert_eq!(second, Err(TestError::Open("k".into())));

        release_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), Ok(1));
        assert_eq!(cb.get_state("k"), CircuitState::Closed);
    }

    /// Starts a call under `key` that only finishes when the sender fires.
    fn held_call(
        cb: &Arc<CircuitBreaker>,
        key: &'static str,
        outcome: std::result::Result<u32, TestError>,
    ) -> (
        tokio::sync::oneshot::Sender<()>,
        tokio::task::JoinHandle<std::result::Result<u32, TestError>>,
    ) {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let cb = cb.clone();
        let handle = tokio::spawn(async move {
            cb.execute(key, || async move {
                let _ = rx.await;
                outcome
            })
            .await
        });
        (tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_settle_trial() {
        let cb = Arc::new(breaker(1, 100));
        let calls = AtomicUsize::new(0);

        // admitted while Closed, completes only after the trial has started
        let (early_tx, early) = held_call(&cb, "k", Ok(3));
        tokio::task::yield_now().await;
        let _ = fail(&cb, "k", &calls).await;
        assert_eq!(cb.get_state("k"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(150)).await;
        let (trial_tx, trial) = held_call(&cb, "k", Ok(1));
        tokio::task::yield_now().await;
        assert_eq!(cb.get_state("k"), CircuitState::HalfOpen);

        early_tx.send(()).unwrap();
        assert_eq!(early.await.unwrap(), Ok(3));
        assert_eq!(cb.get_state("k"), CircuitState::HalfOpen);
        assert_eq!(succeed(&cb, "k", &calls).await, Err(TestError::Open("k".into())));

        trial_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), Ok(1));
        assert_eq!(cb.get_state("k"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_does_not_reopen_during_trial() {
        let cb = Arc::new(breaker(1, 100));
        let calls = AtomicUsize::new(0);

        let (early_tx, early) = held_call(&cb, "k", Err(TestError::Boom));
        tokio::task::yield_now().await;
        let _ = fail(&cb, "k", &calls).await;
        assert_eq!(cb.get_failure_count("k"), 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        let (trial_tx, trial) = held_call(&cb, "k", Ok(1));
        tokio::task::yield_now().await;
        assert_eq!(cb.get_state("k"), CircuitState::HalfOpen);

        early_tx.send(()).unwrap();
        assert_eq!(early.await.unwrap(), Err(TestError::Boom));
        assert_eq!(cb.get_state("k"), CircuitState::HalfOpen);
        assert_eq!(cb.get_failure_count("k"), 1);
        assert!(cb.snapshot("k").unwrap().last_failure_at.is_some());
        assert_eq!(succeed(&cb, "k", &calls).await, Err(TestError::Open("k".into())));

        trial_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), Ok(1));
        assert_eq!(cb.get_state("k"), CircuitState::Closed);
        assert_eq!(cb.get_failure_count("k"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_frees_slot() {
        let cb = breaker(1, 100);
        let calls = AtomicUsize::new(0);
        let _ = fail(&cb, "k", &calls).await;
        tokio::time::advance(Duration::from_millis(150)).await;

        let pending = cb.execute("k", || futures::future::pending::<std::result::Result<(), TestError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(cb.get_state("k"), CircuitState::HalfOpen);

        assert_eq!(succeed(&cb, "k", &calls).await, Ok(7));
        assert_eq!(cb.get_state("k"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let cb = breaker(1, 10_000);
        let calls = AtomicUsize::new(0);
        let _ = fail(&cb, "element_1", &calls).await;
        assert_eq!(cb.get_state("element_1"), CircuitState::Open);
        assert_eq!(cb.get_state("element_2"), CircuitState::Closed);
        assert_eq!(succeed(&cb, "element_2", &calls).await, Ok(7));

        let states = cb.get_all_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states["element_1"], CircuitState::Open);
        assert_eq!(states["element_2"], CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_closes_circuit() {
        let cb = breaker(1, 10_000);
        let calls = AtomicUsize::new(0);
        let _ = fail(&cb, "k", &calls).await;
        assert_eq!(cb.get_state("k"), CircuitState::Open);

        cb.reset("k");
        assert_eq!(cb.get_state("k"), CircuitState::Closed);
        assert_eq!(cb.get_failure_count("k"), 0);
        assert_eq!(succeed(&cb, "k", &calls).await, Ok(7));
    }

    #[tokio::test]
    async fn test_hundred_concurrent_successes_stay_closed() {
        let cb = Arc::new(breaker(5, 1_000));
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..100)
            .map(|i| {
                let cb = cb.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cb.execute("shared", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, TestError>(i)
                    })
                    .await
                })
            })
            .collect();

        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.await.unwrap(), Ok(i));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 100);
        assert_eq!(cb.get_state("shared"), CircuitState::Closed);
        assert_eq!(cb.get_failure_count("shared"), 0);
    }

    #[test]
    fn test_unknown_key_defaults() {
        let cb = breaker(1, 1_000);
        assert_eq!(cb.get_state("nope"), CircuitState::Closed);
        assert_eq!(cb.get_failure_count("nope"), 0);
        assert!(cb.snapshot("nope").is_none());
        assert!(cb.get_all_states().is_empty());
    }
}
