//! Progress observation.
//!
//! The poller emits one [`ProgressSnapshot`] per iteration via the
//! [`ProgressSink`] abstraction. This follows the "emit, don't present"
//! pattern: the engine does not know how snapshots are consumed, and sinks
//! must never influence scheduling. Headless embeddings use
//! [`NullProgressSink`].

use std::time::Duration;
use tracing::debug;

// =============================================================================
// Progress Snapshot
// =============================================================================

/// Point-in-time view of one dispatch invocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgressSnapshot {
    /// Targets submitted so far (including rejected ones).
    pub submitted: usize,

    /// Tasks not yet in a terminal state.
    pub pending: usize,

    /// Worker contexts currently leased.
    pub active: usize,

    /// Outputs retrieved so far.
    pub completed: usize,

    /// Tasks evicted so far.
    pub evicted: usize,

    /// Targets rejected at submission time.
    pub rejected: usize,

    /// Time since the invocation started.
    pub elapsed: Duration,
}

// =============================================================================
// Progress Sink
// =============================================================================

/// Observer invoked by the poller once per iteration.
///
/// Pure side effect: implementations must not block for long and have no
/// influence on scheduling decisions.
pub trait ProgressSink: Send + Sync {
    /// Receives the current snapshot.
    fn report(&self, snapshot: &ProgressSnapshot);
}

/// Sink that discards every snapshot.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn report(&self, _snapshot: &ProgressSnapshot) {}
}

/// Sink that logs every snapshot at debug level.
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, snapshot: &ProgressSnapshot) {
        debug!(
            submitted = snapshot.submitted,
            pending = snapshot.pending,
            active = snapshot.active,
            completed = snapshot.completed,
            evicted = snapshot.evicted,
            rejected = snapshot.rejected,
            "dispatch progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        calls: AtomicUsize,
    }

    impl ProgressSink for CountingSink {
        fn report(&self, _snapshot: &ProgressSnapshot) {
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_snapshot_default_is_zeroed() {
        let snapshot = ProgressSnapshot::default();
        assert_eq!(snapshot.submitted, 0);
        assert_eq!(snapshot.pending, 0);
        assert_eq!(snapshot.elapsed, Duration::ZERO);
    }

    #[test]
    fn test_counting_sink_receives_reports() {
        let sink = CountingSink {
            calls: AtomicUsize::new(0),
        };
        let snapshot = ProgressSnapshot::default();
        sink.report(&snapshot);
        sink.report(&snapshot);
        assert_eq!(sink.calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_null_sink_is_silent() {
        NullProgressSink.report(&ProgressSnapshot::default());
    }
}
