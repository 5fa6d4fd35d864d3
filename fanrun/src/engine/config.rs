//! Engine configuration.
//!
//! This module contains the [`EngineConfig`] struct and the bounds constants
//! for the dispatch engine. Validation happens once, before the context pool
//! is constructed or any task is submitted.

use std::time::Duration;
use tracing::warn;

use super::context::EnvironmentTemplate;
use super::error::ConfigError;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Minimum number of concurrent worker contexts.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum number of concurrent worker contexts.
pub const MAX_CONCURRENCY: usize = 1000;

/// Default number of concurrent worker contexts.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Minimum completion poll interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 1;

/// Maximum completion poll interval in milliseconds.
pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;

/// Default completion poll interval in milliseconds.
///
/// This bounds poll overhead but is also the minimum latency for detecting
/// completion or timeout.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Minimum per-head wait budget in seconds.
pub const MIN_WAIT_BUDGET_SECS: u64 = 1;

/// Maximum per-head wait budget in seconds.
pub const MAX_WAIT_BUDGET_SECS: u64 = 86_400;

/// Default per-head wait budget in seconds.
pub const DEFAULT_WAIT_BUDGET_SECS: u64 = 60;

/// Wait budgets below this emit a non-fatal warning at validation time.
pub const LOW_WAIT_BUDGET_WARN_SECS: u64 = 10;

// =============================================================================
// Timeout Policy
// =============================================================================

/// How pending tasks are timed against the wait budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Only the oldest pending task is ever timed; its clock starts when it
    /// becomes the head of the pending set. Tasks behind the head can wait
    /// far longer than the budget in wall-clock terms as long as each prior
    /// head completes in time.
    #[default]
    HeadOfLine,

    /// Every pending task carries its own deadline from submission time.
    /// Stricter than [`TimeoutPolicy::HeadOfLine`]: a task is evicted once
    /// its total time in the pending set exceeds the budget, regardless of
    /// its position.
    PerTask,
}

impl std::fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeadOfLine => write!(f, "head-of-line"),
            Self::PerTask => write!(f, "per-task"),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Configuration for one dispatch invocation.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum number of invocations running simultaneously.
    /// Must be within [1, 1000]. Default: 8.
    pub max_concurrency: usize,

    /// Sleep between completion poll iterations.
    /// Must be within [1ms, 10s]. Default: 200ms.
    pub poll_interval: Duration,

    /// Wait budget for the timed pending task.
    /// Must be within [1s, 24h]. Default: 60s.
    pub wait_budget: Duration,

    /// Timing policy for the wait budget. Default: head-of-line.
    pub timeout_policy: TimeoutPolicy,

    /// Initial state cloned read-only into every worker context.
    pub environment: EnvironmentTemplate,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            wait_budget: Duration::from_secs(DEFAULT_WAIT_BUDGET_SECS),
            timeout_policy: TimeoutPolicy::default(),
            environment: EnvironmentTemplate::default(),
        }
    }
}

impl EngineConfig {
    /// Validates all bounds.
    ///
    /// A wait budget under [`LOW_WAIT_BUDGET_WARN_SECS`] is legal but emits
    /// a warning that premature eviction is likely.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency < MIN_CONCURRENCY || self.max_concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::ConcurrencyOutOfRange {
                got: self.max_concurrency,
            });
        }

        let poll_ms = self.poll_interval.as_millis();
        if poll_ms < MIN_POLL_INTERVAL_MS as u128 || poll_ms > MAX_POLL_INTERVAL_MS as u128 {
            return Err(ConfigError::PollIntervalOutOfRange { got_ms: poll_ms });
        }

        let budget_secs = self.wait_budget.as_secs();
        if budget_secs < MIN_WAIT_BUDGET_SECS || budget_secs > MAX_WAIT_BUDGET_SECS {
            return Err(ConfigError::WaitBudgetOutOfRange {
                got_secs: budget_secs,
            });
        }

        if budget_secs < LOW_WAIT_BUDGET_WARN_SECS {
            warn!(
                budget_secs,
                "wait budget is under {}s, premature eviction is likely", LOW_WAIT_BUDGET_WARN_SECS
            );
        }

        Ok(())
    }
}
