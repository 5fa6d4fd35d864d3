//! Error types for the dispatch engine.
//!
//! Two families: [`ConfigError`] is fatal and aborts an invocation before
//! any task is submitted; [`InvokeError`] belongs to a single task and never
//! stops the batch.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration errors, raised before any task is submitted.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Concurrency outside the allowed range.
    #[error("max_concurrency must be within [1, 1000], got {got}")]
    ConcurrencyOutOfRange { got: usize },

    /// Poll interval outside the allowed range.
    #[error("poll interval must be within [1ms, 10000ms], got {got_ms}ms")]
    PollIntervalOutOfRange { got_ms: u128 },

    /// Wait budget outside the allowed range.
    #[error("wait budget must be within [1s, 86400s], got {got_secs}s")]
    WaitBudgetOutOfRange { got_secs: u64 },

    /// A named command resolved neither from the registry nor from PATH.
    #[error("command '{name}' not found in registry or PATH")]
    CommandNotFound { name: String },

    /// The script source could not be read.
    #[error("script {path:?} is unreadable: {source}")]
    ScriptUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The module path could not be scanned for library units.
    #[error("module path {path:?} is unreadable: {source}")]
    ModulePathUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A named library unit does not exist.
    #[error("module '{name}' not found")]
    ModuleNotFound { name: String },
}

/// Failures belonging to a single invocation.
///
/// Surfaced either as a submission-time rejection (via
/// [`Callable::preflight`](super::Callable::preflight)) or as the `Err`
/// payload of one task's output. Never aborts the batch.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// The worker process could not be spawned.
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// The worker process exited with a non-zero code.
    #[error("non-zero exit code: {code}")]
    NonZeroExit { code: i32 },

    /// The worker process was killed by a signal.
    #[error("killed by signal")]
    KilledBySignal,

    /// I/O error while talking to the worker.
    #[error("io error: {0}")]
    Io(String),

    /// The target cannot be handed to this callable.
    #[error("target not invocable: {0}")]
    InvalidTarget(String),

    /// The worker body panicked.
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// The invocation was cancelled before it finished.
    #[error("cancelled")]
    Cancelled,

    /// Callable-specific failure.
    #[error("callable failed: {0}")]
    Failed(String),
}

impl From<std::io::Error> for InvokeError {
    fn from(e: std::io::Error) -> Self {
        InvokeError::Io(e.to_string())
    }
}
