use crate::cache::CacheStats;
use crate::queue::QueueStats;
use crate::resilience::circuit_breaker::CircuitState;
use std::collections::HashMap;

/// Facts-only view of the resilience layer, for status bars and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ResilienceSnapshot {
    pub circuits: HashMap<String, CircuitState>,
    /// Operation ids whose last call needed at least one retry.
    pub active_retries: usize,
    /// Outstanding background tasks per category.
    pub queued_tasks: HashMap<String, usize>,
    pub queue: QueueStats,
    pub cache: CacheStats,
}

impl ResilienceSnapshot {
    pub fn open_circuits(&self) -> Vec<&str> {
        let mut open: Vec<&str> = self
            .circuits
            .iter()
            .filter(|(_, s)| **s != CircuitState::Closed)
            .map(|(k, _)| k.as_str())
            .collect();
        open.sort_unstable();
        open
    }

    /// True when every circuit is closed and no reconciliation is pending.
    pub fn is_healthy(&self) -> bool {
        self.open_circuits().is_empty() && self.queued_tasks.is_empty()
    }
}
