//! Aggregated dispatch outcome.

use std::time::Duration;

use super::task::{Eviction, Rejection, TaskOutput};

/// Everything one dispatch invocation produced.
///
/// `results` is unordered relative to submission. Rejected and evicted
/// targets contribute no entry, so `results.len()` may be shorter than the
/// target list; callers must not assume a 1:1 correspondence.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One entry per task that completed, including faulted invocations
    /// (their entry carries an `Err` payload).
    pub results: Vec<TaskOutput>,

    /// Submission-time failures, surfaced as diagnostics, not errors.
    pub rejections: Vec<Rejection>,

    /// Tasks forcibly terminated for exceeding the wait budget.
    pub evictions: Vec<Eviction>,

    /// Total targets submitted (successes plus rejections).
    pub submitted: usize,

    /// Wall-clock duration of the whole invocation.
    pub elapsed: Duration,
}

impl BatchReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of results with a successful payload.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.payload.is_ok()).count()
    }

    /// Number of results whose invocation faulted.
    pub fn faulted(&self) -> usize {
        self.results.iter().filter(|r| r.payload.is_err()).count()
    }

    /// Tasks accounted for across all terminal states.
    pub fn accounted(&self) -> usize {
        self.results.len() + self.rejections.len() + self.evictions.len()
    }

    /// True when every submitted target produced a successful result.
    pub fn is_complete(&self) -> bool {
        self.rejections.is_empty() && self.evictions.is_empty() && self.faulted() == 0
    }
}
