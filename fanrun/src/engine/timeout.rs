//! Wait-budget enforcement.
//!
//! The monitor times exactly one pending task at a time: the oldest by
//! submission order. A task's clock starts only when it becomes the head of
//! the pending set, so tasks behind the head can occupy a worker far longer
//! than the budget in wall-clock terms, as long as each prior head completes
//! in time. This is deliberate; the stricter interpretation is available as
//! [`TimeoutPolicy::PerTask`].

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::config::TimeoutPolicy;
use super::task::{PendingSet, PendingTask};

// =============================================================================
// Timeout Observation
// =============================================================================

/// The single timed task: its sequence id and when it became observed.
///
/// Replaced whenever the head of the pending set changes identity.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TimeoutObservation {
    pub sequence: u64,
    pub observed_at: Instant,
}

// =============================================================================
// Timeout Monitor
// =============================================================================

/// Enforces the wait budget over the pending set.
pub(crate) struct TimeoutMonitor {
    budget: Duration,
    policy: TimeoutPolicy,
    observation: Option<TimeoutObservation>,
}

impl TimeoutMonitor {
    pub fn new(budget: Duration, policy: TimeoutPolicy) -> Self {
        Self {
            budget,
            policy,
            observation: None,
        }
    }

    /// Checks the pending set once and removes any task that exceeded its
    /// budget. The caller terminates the returned tasks and records the
    /// evictions.
    pub fn check(&mut self, pending: &mut PendingSet) -> Vec<PendingTask> {
        match self.policy {
            TimeoutPolicy::HeadOfLine => self.check_head(pending).into_iter().collect(),
            TimeoutPolicy::PerTask => pending.take_older_than(self.budget, Instant::now()),
        }
    }

    /// Head-of-line check: evicts at most one task per call.
    fn check_head(&mut self, pending: &mut PendingSet) -> Option<PendingTask> {
        let head_sequence = pending.head()?.sequence;

        match self.observation {
            Some(observation) if observation.sequence == head_sequence => {
                let waited = observation.observed_at.elapsed();
                if waited > self.budget {
                    let task = pending.remove_head().expect("observed head vanished");
                    self.observation = None;
                    Some(task)
                } else {
                    None
                }
            }
            _ => {
                // Head identity changed: start its clock. Never terminate on
                // the same iteration a task newly becomes head.
                debug!(sequence = head_sequence, "timing new head-of-line task");
                self.observation = Some(TimeoutObservation {
                    sequence: head_sequence,
                    observed_at: Instant::now(),
                });
                None
            }
        }
    }

    #[cfg(test)]
    pub fn observation(&self) -> Option<TimeoutObservation> {
        self.observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::TaskOutput;
    use tokio_util::sync::CancellationToken;

    fn stalled_task(sequence: u64) -> PendingTask {
        PendingTask {
            sequence,
            target: format!("target-{}", sequence),
            handle: tokio::spawn(async { std::future::pending::<TaskOutput>().await }),
            cancel: CancellationToken::new(),
            submitted_at: Instant::now(),
        }
    }

    fn drain(pending: &mut PendingSet) {
        while let Some(task) = pending.remove_head() {
            task.handle.abort();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_observes_without_evicting() {
        let mut monitor = TimeoutMonitor::new(Duration::from_secs(1), TimeoutPolicy::HeadOfLine);
        let mut pending = PendingSet::new();
        pending.push(stalled_task(0));

        // Even an ancient head is only observed on its first check.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(monitor.check(&mut pending).is_empty());
        assert_eq!(monitor.observation().unwrap().sequence, 0);
        assert_eq!(pending.len(), 1);

        drain(&mut pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_evicted_after_budget() {
        let mut monitor = TimeoutMonitor::new(Duration::from_secs(1), TimeoutPolicy::HeadOfLine);
        let mut pending = PendingSet::new();
        pending.push(stalled_task(0));
        pending.push(stalled_task(1));

        assert!(monitor.check(&mut pending).is_empty());

        tokio::time::advance(Duration::from_millis(1100)).await;
        let evicted = monitor.check(&mut pending);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].sequence, 0);
        assert!(monitor.observation().is_none());
        assert_eq!(pending.head().unwrap().sequence, 1);

        evicted[0].handle.abort();
        drain(&mut pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_not_exceeded_keeps_head() {
        let mut monitor = TimeoutMonitor::new(Duration::from_secs(2), TimeoutPolicy::HeadOfLine);
        let mut pending = PendingSet::new();
        pending.push(stalled_task(0));

        assert!(monitor.check(&mut pending).is_empty());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(monitor.check(&mut pending).is_empty());
        assert_eq!(pending.len(), 1);

        drain(&mut pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_change_restarts_clock() {
        let mut monitor = TimeoutMonitor::new(Duration::from_secs(1), TimeoutPolicy::HeadOfLine);
        let mut pending = PendingSet::new();
        pending.push(stalled_task(0));
        pending.push(stalled_task(1));

        assert!(monitor.check(&mut pending).is_empty());
        tokio::time::advance(Duration::from_millis(900)).await;

        // The head completes just in time; task 1 becomes head with a fresh
        // clock even though it has been pending for 900ms already.
        pending.remove_head().unwrap().handle.abort();
        assert!(monitor.check(&mut pending).is_empty());
        assert_eq!(monitor.observation().unwrap().sequence, 1);

        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(monitor.check(&mut pending).is_empty());

        tokio::time::advance(Duration::from_millis(200)).await;
        let evicted = monitor.check(&mut pending);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].sequence, 1);

        evicted[0].handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_task_policy_evicts_aged_tasks_regardless_of_head() {
        let mut monitor = TimeoutMonitor::new(Duration::from_secs(1), TimeoutPolicy::PerTask);
        let mut pending = PendingSet::new();
        pending.push(stalled_task(0));
        pending.push(stalled_task(1));

        tokio::time::advance(Duration::from_millis(1100)).await;
        pending.push(stalled_task(2));

        let evicted = monitor.check(&mut pending);
        let sequences: Vec<u64> = evicted.iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert_eq!(pending.len(), 1);

        for task in &evicted {
            task.handle.abort();
        }
        drain(&mut pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pending_set_is_a_no_op() {
        let mut monitor = TimeoutMonitor::new(Duration::from_secs(1), TimeoutPolicy::HeadOfLine);
        let mut pending = PendingSet::new();
        assert!(monitor.check(&mut pending).is_empty());
        assert!(monitor.observation().is_none());
    }
}
