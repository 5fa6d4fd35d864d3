//! Task records and the ordered pending set.
//!
//! A task is one scheduled invocation of the callable against a single
//! target. Terminal states: `Completed` (output retrieved into a
//! [`TaskOutput`]), `Evicted` (recorded as an [`Eviction`], no output), or
//! the creation-time `Rejected` (recorded as a [`Rejection`], no handle ever
//! exists).

use std::collections::VecDeque;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::InvokeError;

// =============================================================================
// Task Records
// =============================================================================

/// Output retrieved from one completed task.
#[derive(Debug)]
pub struct TaskOutput {
    /// Submission sequence number.
    pub sequence: u64,

    /// The target this invocation ran against.
    pub target: String,

    /// The callable's payload, or the failure that invocation surfaced.
    /// Opaque to the engine either way.
    pub payload: Result<Vec<u8>, InvokeError>,

    /// Time from invocation start to completion.
    pub duration: Duration,

    /// Worker context that served the invocation, if it got that far.
    pub context_id: Option<usize>,
}

/// A submission-time failure record. No task ever existed for this target.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// Sequence number the target would have carried.
    pub sequence: u64,

    /// The rejected target.
    pub target: String,

    /// Why submission failed.
    pub reason: InvokeError,
}

/// Record of a task forcibly terminated for exceeding its wait budget.
///
/// Evictions are not errors; the target simply contributes no result.
#[derive(Debug, Clone)]
pub struct Eviction {
    /// Submission sequence number.
    pub sequence: u64,

    /// The evicted target.
    pub target: String,

    /// Total time the task spent in the pending set.
    pub waited: Duration,
}

// =============================================================================
// Pending Task
// =============================================================================

/// One unit of work not yet in a terminal state.
pub(crate) struct PendingTask {
    /// Stable sequence number, assigned at submission, never re-sorted.
    pub sequence: u64,

    /// The target, kept for reporting.
    pub target: String,

    /// Completion handle for the spawned worker body.
    pub handle: JoinHandle<TaskOutput>,

    /// Cancelled on eviction so the worker tears down promptly.
    pub cancel: CancellationToken,

    /// When the task entered the pending set.
    pub submitted_at: Instant,
}

// =============================================================================
// Pending Set
// =============================================================================

/// The ordered collection of tasks not yet in a terminal state.
///
/// Ordered by submission sequence; the front is the head-of-line task that
/// the timeout monitor times.
#[derive(Default)]
pub(crate) struct PendingSet {
    tasks: VecDeque<PendingTask>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Appends a newly submitted task.
    pub fn push(&mut self, task: PendingTask) {
        self.tasks.push_back(task);
    }

    /// The oldest still-pending task.
    pub fn head(&self) -> Option<&PendingTask> {
        self.tasks.front()
    }

    /// Removes and returns the head task.
    pub fn remove_head(&mut self) -> Option<PendingTask> {
        self.tasks.pop_front()
    }

    /// Drains every task whose handle reports completion, preserving
    /// submission order among the drained tasks.
    pub fn take_finished(&mut self) -> Vec<PendingTask> {
        let mut finished = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.tasks.len());
        for task in self.tasks.drain(..) {
            if task.handle.is_finished() {
                finished.push(task);
            } else {
                remaining.push_back(task);
            }
        }
        self.tasks = remaining;
        finished
    }

    /// Drains every task whose time in the set exceeds `budget`.
    ///
    /// Used by the per-task timeout policy only.
    pub fn take_older_than(&mut self, budget: Duration, now: Instant) -> Vec<PendingTask> {
        let mut aged = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.tasks.len());
        for task in self.tasks.drain(..) {
            if now.duration_since(task.submitted_at) > budget {
                aged.push(task);
            } else {
                remaining.push_back(task);
            }
        }
        self.tasks = remaining;
        aged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stalled_task(sequence: u64) -> PendingTask {
        PendingTask {
            sequence,
            target: format!("target-{}", sequence),
            handle: tokio::spawn(async { std::future::pending::<TaskOutput>().await }),
            cancel: CancellationToken::new(),
            submitted_at: Instant::now(),
        }
    }

    fn finished_task(sequence: u64) -> PendingTask {
        PendingTask {
            sequence,
            target: format!("target-{}", sequence),
            handle: tokio::spawn(async move {
                TaskOutput {
                    sequence,
                    target: format!("target-{}", sequence),
                    payload: Ok(vec![]),
                    duration: Duration::ZERO,
                    context_id: Some(0),
                }
            }),
            cancel: CancellationToken::new(),
            submitted_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_pending_set_preserves_submission_order() {
        let mut pending = PendingSet::new();
        for sequence in 0..3 {
            pending.push(stalled_task(sequence));
        }

        assert_eq!(pending.len(), 3);
        assert_eq!(pending.head().unwrap().sequence, 0);

        let head = pending.remove_head().unwrap();
        assert_eq!(head.sequence, 0);
        assert_eq!(pending.head().unwrap().sequence, 1);

        head.handle.abort();
        while let Some(task) = pending.remove_head() {
            task.handle.abort();
        }
    }

    #[tokio::test]
    async fn test_take_finished_drains_only_completed() {
        let mut pending = PendingSet::new();
        pending.push(finished_task(0));
        pending.push(stalled_task(1));
        pending.push(finished_task(2));

        // Let the finished bodies actually run to completion.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let finished = pending.take_finished();
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].sequence, 0);
        assert_eq!(finished[1].sequence, 2);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.head().unwrap().sequence, 1);

        pending.remove_head().unwrap().handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_older_than_uses_submission_time() {
        let mut pending = PendingSet::new();
        pending.push(stalled_task(0));

        tokio::time::advance(Duration::from_secs(5)).await;
        pending.push(stalled_task(1));

        let budget = Duration::from_secs(3);
        let aged = pending.take_older_than(budget, Instant::now());
        assert_eq!(aged.len(), 1);
        assert_eq!(aged[0].sequence, 0);
        assert_eq!(pending.len(), 1);

        aged[0].handle.abort();
        pending.remove_head().unwrap().handle.abort();
    }
}
