//! Dispatch Engine
//!
//! This module provides the bounded-concurrency dispatch engine: one callable
//! is invoked once per target, with at most a configured number of
//! invocations running simultaneously, and the aggregated outputs are
//! returned once every invocation reached a terminal state.
//!
//! # Architecture
//!
//! The engine follows a layered design:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DispatchEngine                          │
//! │  Submission loop, completion poller, result aggregation     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Context     │  │ Timeout     │  │ Progress            │  │
//! │  │ Pool        │  │ Monitor     │  │ Sink                │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Callable**: the unit of work, selected once per invocation via
//!   [`CallableSpec`] (script file, inline block, or named command) and
//!   resolved to a single execution strategy before any task is submitted.
//!
//! - **Task**: one scheduled invocation of the callable against a single
//!   target. Tasks end `Completed` (output retrieved), `Evicted` (forcibly
//!   terminated after exceeding the wait budget), or `Rejected` at
//!   submission time.
//!
//! - **Context Pool**: a fixed set of reusable worker contexts; the pool's
//!   fair scheduler guarantees no more than `max_concurrency` invocations
//!   run at once. Submission itself never blocks on the pool.
//!
//! - **Timeout Monitor**: times exactly one task at a time - the oldest
//!   still-pending one. A task's clock starts only when it becomes the head
//!   of the pending set (see [`TimeoutPolicy`] for the stricter per-task
//!   alternative).
//!
//! # Example
//!
//! ```ignore
//! use fanrun::engine::{CallableSpec, CommandRegistry, DispatchEngine, EngineConfig};
//!
//! let registry = CommandRegistry::new();
//! let callable = CallableSpec::Command("convert".into()).resolve(&registry)?;
//! let engine = DispatchEngine::new(EngineConfig::default(), callable)?;
//!
//! let report = engine.run(targets).await;
//! println!("{} results in {:?}", report.results.len(), report.elapsed);
//! ```
//!
//! # Ordering
//!
//! Submission order is deterministic (list order); result order is not
//! guaranteed and callers must not rely on a 1:1 correspondence between
//! targets and results - rejected and evicted targets contribute nothing.

// Module declarations
mod callable;
mod config;
mod context;
mod core;
mod error;
mod pool;
mod process;
mod progress;
mod report;
mod task;
mod timeout;

// Re-export public types

// Callable selection and resolution
pub use callable::{
    Callable, CallableSpec, CommandRegistry, ExtraArguments, FnCallable, Invocation, InvokeFuture,
};

// Process-backed callables
pub use process::{resolve_program, ExecCallable, ShellCallable};

// Configuration
pub use config::{
    EngineConfig, TimeoutPolicy, DEFAULT_MAX_CONCURRENCY, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_WAIT_BUDGET_SECS, LOW_WAIT_BUDGET_WARN_SECS, MAX_CONCURRENCY, MAX_POLL_INTERVAL_MS,
    MAX_WAIT_BUDGET_SECS, MIN_CONCURRENCY, MIN_POLL_INTERVAL_MS, MIN_WAIT_BUDGET_SECS,
};

// Errors
pub use error::{ConfigError, InvokeError};

// Worker contexts and the pool
pub use context::{EnvironmentTemplate, WorkerContext, WorkerEnvironment};
pub use pool::{ContextLease, ContextPool};

// Task records
pub use task::{Eviction, Rejection, TaskOutput};

// Engine core
pub use self::core::DispatchEngine;

// Aggregated report
pub use report::BatchReport;

// Progress observation
pub use progress::{NullProgressSink, ProgressSink, ProgressSnapshot, TracingProgressSink};

use std::sync::Arc;

/// One complete dispatch invocation, ready to run.
///
/// This is the library facade: it bundles the callable selection, the target
/// list, and the engine configuration, and [`dispatch`] drives it to a
/// [`BatchReport`].
pub struct DispatchRequest {
    /// Which unit of work to run (exactly one variant).
    pub callable: CallableSpec,
    /// Targets, submitted in list order.
    pub targets: Vec<String>,
    /// Extra arguments applied uniformly to every invocation.
    pub arguments: ExtraArguments,
    /// Engine configuration (validated before anything is submitted).
    pub config: EngineConfig,
    /// Registry consulted first when resolving `CallableSpec::Command`.
    pub registry: Option<CommandRegistry>,
    /// Progress observer; `None` runs headless.
    pub progress: Option<Arc<dyn ProgressSink>>,
}

/// Resolves the callable, runs the full dispatch, and returns the report.
///
/// Configuration errors (invalid bounds, unresolved command, unreadable
/// script or module path) abort before any task is submitted. All other
/// failure kinds degrade to "this target contributed no result" and are
/// carried inside the returned [`BatchReport`].
pub async fn dispatch(request: DispatchRequest) -> Result<BatchReport, ConfigError> {
    let DispatchRequest {
        callable,
        targets,
        arguments,
        config,
        registry,
        progress,
    } = request;

    let registry = registry.unwrap_or_default();
    let resolved = callable.resolve(&registry)?;
    let progress = progress.unwrap_or_else(|| Arc::new(NullProgressSink) as Arc<dyn ProgressSink>);

    let engine = DispatchEngine::with_progress(config, resolved, progress)?
        .with_arguments(arguments);
    Ok(engine.run(targets).await)
}
