//! Shared transient-vs-fatal classification and retry bookkeeping, reused by
//! the per-source queue worker, the realtime provider's reconnect loop, and
//! the analysis scheduler's retry-after-failure step.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// How a component should respond to a repeated failure.
#[derive(Debug, Clone, Copy)]
pub enum RecoveryStrategy {
    /// Retry with exponential backoff, capped at `max_attempts`.
    Retry { max_attempts: u32, base_delay: Duration },
    /// Keep going; the failure is dropped and the pipeline continues.
    Continue,
    /// Stop the affected component entirely.
    Stop,
}

/// What the caller should do next, computed from a `RecoveryStrategy` plus
/// the component's running error count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry { delay: Duration, attempt: u32 },
    Continue,
    Stop,
}

/// Tracks error counts and a bounded history per named component, applying
/// a configured `RecoveryStrategy` on each failure.
pub struct RecoveryTracker {
    counts: RwLock<HashMap<String, AtomicU32>>,
    strategies: RwLock<HashMap<String, RecoveryStrategy>>,
    history: RwLock<VecDeque<(String, String)>>,
    max_history: usize,
}

impl RecoveryTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counts: RwLock::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            max_history: 200,
        })
    }

    pub async fn set_strategy(&self, component: impl Into<String>, strategy: RecoveryStrategy) {
        self.strategies.write().await.insert(component.into(), strategy);
    }

    /// Record a failure for `component` and compute the action to take.
    pub async fn record_failure(&self, component: &str, message: &str) -> RecoveryAction {
        self.remember(component, message).await;
        let count = self.increment(component).await;
        let strategy = self
            .strategies
            .read()
            .await
            .get(component)
            .copied()
            .unwrap_or(RecoveryStrategy::Continue);

        match strategy {
            RecoveryStrategy::Retry { max_attempts, base_delay } => {
                if count <= max_attempts {
                    let delay = base_delay * 2u32.pow(count.min(10));
                    info!(component, attempt = count, max_attempts, ?delay, "scheduling retry");
                    RecoveryAction::Retry { delay, attempt: count }
                } else {
                    error!(component, attempt = count, "retry budget exhausted, stopping");
                    RecoveryAction::Stop
                }
            }
            RecoveryStrategy::Continue => {
                warn!(component, attempt = count, message, "transient error, continuing");
                RecoveryAction::Continue
            }
            RecoveryStrategy::Stop => {
                error!(component, message, "fatal error, stopping component");
                RecoveryAction::Stop
            }
        }
    }

    pub async fn reset(&self, component: &str) {
        if let Some(counter) = self.counts.read().await.get(component) {
            counter.store(0, Ordering::Relaxed);
        }
    }

    async fn increment(&self, component: &str) -> u32 {
        let counts = self.counts.read().await;
        if let Some(counter) = counts.get(component) {
            return counter.fetch_add(1, Ordering::Relaxed) + 1;
        }
        drop(counts);
        let mut counts = self.counts.write().await;
        let counter = counts.entry(component.to_string()).or_insert_with(|| AtomicU32::new(0));
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn remember(&self, component: &str, message: &str) {
        let mut history = self.history.write().await;
        history.push_back((component.to_string(), message.to_string()));
        while history.len() > self.max_history {
            history.pop_front();
        }
    }
}

impl Default for RecoveryTracker {
    fn default() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            max_history: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_escalates_to_stop_after_max_attempts() {
        let tracker = RecoveryTracker::new();
        tracker
            .set_strategy("provider", RecoveryStrategy::Retry { max_attempts: 2, base_delay: Duration::from_millis(10) })
            .await;

        assert!(matches!(tracker.record_failure("provider", "timeout").await, RecoveryAction::Retry { .. }));
        assert!(matches!(tracker.record_failure("provider", "timeout").await, RecoveryAction::Retry { .. }));
        assert!(matches!(tracker.record_failure("provider", "timeout").await, RecoveryAction::Stop));
    }

    #[tokio::test]
    async fn reset_clears_the_counter() {
        let tracker = RecoveryTracker::new();
        tracker
            .set_strategy("queue", RecoveryStrategy::Retry { max_attempts: 1, base_delay: Duration::from_millis(1) })
            .await;
        tracker.record_failure("queue", "x").await;
        tracker.reset("queue").await;
        assert!(matches!(tracker.record_failure("queue", "x").await, RecoveryAction::Retry { attempt: 1, .. }));
    }
}
