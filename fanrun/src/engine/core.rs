//! Dispatch engine core - submission loop and completion poller.
//!
//! The engine drives one invocation end to end: submit one task per target
//! in list order, then poll until the pending set is empty, handing control
//! to the timeout monitor between polls. The driver itself is
//! single-threaded and cooperative; its only designed wait is the bounded
//! sleep between poll iterations. The worker bodies it spawns run truly in
//! parallel, capped by the context pool.

use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::callable::{Callable, ExtraArguments, Invocation};
use super::config::EngineConfig;
use super::context::WorkerEnvironment;
use super::error::{ConfigError, InvokeError};
use super::pool::ContextPool;
use super::progress::{NullProgressSink, ProgressSink, ProgressSnapshot};
use super::report::BatchReport;
use super::task::{Eviction, PendingSet, PendingTask, Rejection, TaskOutput};
use super::timeout::TimeoutMonitor;

// =============================================================================
// Dispatch Engine
// =============================================================================

/// The bounded-concurrency dispatch engine.
///
/// Constructed once per invocation; [`DispatchEngine::run`] consumes it and
/// returns only when every task reached a terminal state.
pub struct DispatchEngine {
    config: EngineConfig,
    callable: Arc<dyn Callable>,
    arguments: Arc<ExtraArguments>,
    pool: ContextPool,
    progress: Arc<dyn ProgressSink>,
    pending: PendingSet,
    monitor: TimeoutMonitor,
    report: BatchReport,
    next_sequence: u64,
    started_at: Instant,
}

impl DispatchEngine {
    /// Creates an engine with no progress observer.
    pub fn new(config: EngineConfig, callable: Arc<dyn Callable>) -> Result<Self, ConfigError> {
        Self::with_progress(config, callable, Arc::new(NullProgressSink))
    }

    /// Creates an engine with a progress observer.
    ///
    /// Validates the configuration and initializes the worker environment;
    /// both failure paths abort before anything is submitted.
    pub fn with_progress(
        config: EngineConfig,
        callable: Arc<dyn Callable>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let environment = Arc::new(WorkerEnvironment::initialize(&config.environment)?);
        let pool = ContextPool::new(config.max_concurrency, environment);
        let monitor = TimeoutMonitor::new(config.wait_budget, config.timeout_policy);

        Ok(Self {
            config,
            callable,
            arguments: Arc::new(ExtraArguments::new()),
            pool,
            progress,
            pending: PendingSet::new(),
            monitor,
            report: BatchReport::new(),
            next_sequence: 0,
            started_at: Instant::now(),
        })
    }

    /// Sets the extra arguments applied uniformly to every invocation.
    pub fn with_arguments(mut self, arguments: ExtraArguments) -> Self {
        self.arguments = Arc::new(arguments);
        self
    }

    /// The context pool, exposed for observation.
    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    /// Runs the full dispatch: submits every target, then polls to
    /// completion. Returns only when the pending set is empty.
    pub async fn run(mut self, targets: Vec<String>) -> BatchReport {
        self.started_at = Instant::now();
        info!(
            targets = targets.len(),
            max_concurrency = self.config.max_concurrency,
            callable = self.callable.name(),
            policy = %self.config.timeout_policy,
            "dispatch started"
        );
        self.submit_all(targets);
        self.drain().await
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Submits one task per target, in list order.
    ///
    /// A submission failure rejects that single target and the loop
    /// continues; it never aborts the remaining submissions.
    fn submit_all(&mut self, targets: Vec<String>) {
        for target in targets {
            let sequence = self.next_sequence;
            self.next_sequence += 1;

            if let Err(reason) = self.callable.preflight(&target) {
                debug!(sequence, item = %target, error = %reason, "submission rejected");
                self.report.rejections.push(Rejection {
                    sequence,
                    target,
                    reason,
                });
                continue;
            }

            let task = self.spawn_task(sequence, target);
            self.pending.push(task);
        }

        self.report.submitted = self.next_sequence as usize;

        if !self.report.rejections.is_empty() {
            warn!(
                rejected = self.report.rejections.len(),
                "some targets were rejected at submission time"
            );
            for rejection in &self.report.rejections {
                warn!(
                    sequence = rejection.sequence,
                    item = %rejection.target,
                    error = %rejection.reason,
                    "rejected target"
                );
            }
        }
    }

    /// Spawns the worker body for one target.
    ///
    /// The body acquires a context lease inside the spawned future, so the
    /// pool's scheduler - not this loop - absorbs the capacity wait. The
    /// lease is dropped when the body ends or is aborted, releasing the
    /// context either way.
    fn spawn_task(&self, sequence: u64, target: String) -> PendingTask {
        let cancel = CancellationToken::new();
        let pool = self.pool.clone();
        let callable = Arc::clone(&self.callable);
        let arguments = Arc::clone(&self.arguments);
        let body_cancel = cancel.clone();
        let body_target = target.clone();

        let handle = tokio::spawn(async move {
            let mut lease = pool.acquire().await;
            let context_id = lease.context().id();

            let invocation = Invocation {
                target: body_target.clone(),
                arguments,
                environment: lease.context().environment_handle(),
                cancel: body_cancel,
            };

            let started = Instant::now();
            let payload = callable.invoke(invocation).await;
            lease.context_mut().record_invocation();

            TaskOutput {
                sequence,
                target: body_target,
                payload,
                duration: started.elapsed(),
                context_id: Some(context_id),
            }
        });

        debug!(sequence, item = %target, "task submitted");
        PendingTask {
            sequence,
            target,
            handle,
            cancel,
            submitted_at: Instant::now(),
        }
    }

    // -------------------------------------------------------------------------
    // Polling
    // -------------------------------------------------------------------------

    /// Polls until the pending set is empty, then returns the report.
    async fn drain(mut self) -> BatchReport {
        loop {
            self.harvest().await;
            self.observe_progress();

            if self.pending.is_empty() {
                break;
            }

            let evicted = self.monitor.check(&mut self.pending);
            for task in evicted {
                self.evict(task);
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        self.report.elapsed = self.started_at.elapsed();
        info!(
            results = self.report.results.len(),
            rejected = self.report.rejections.len(),
            evicted = self.report.evictions.len(),
            elapsed_ms = self.report.elapsed.as_millis() as u64,
            "dispatch complete"
        );
        self.report
    }

    /// Retrieves the output of every task whose handle reports completion
    /// and releases it from the pending set.
    async fn harvest(&mut self) {
        for task in self.pending.take_finished() {
            let PendingTask {
                sequence,
                target,
                handle,
                submitted_at,
                ..
            } = task;

            match handle.await {
                Ok(output) => {
                    debug!(
                        sequence,
                        item = %output.target,
                        ok = output.payload.is_ok(),
                        duration_ms = output.duration.as_millis() as u64,
                        "task completed"
                    );
                    self.report.results.push(output);
                }
                Err(join_error) => {
                    // The worker body itself died; surface the failure as
                    // this one task's outcome and keep going.
                    let reason = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        join_error.to_string()
                    };
                    warn!(sequence, item = %target, error = %reason, "worker body failed");
                    self.report.results.push(TaskOutput {
                        sequence,
                        target,
                        payload: Err(InvokeError::Panicked(reason)),
                        duration: submitted_at.elapsed(),
                        context_id: None,
                    });
                }
            }
        }
    }

    /// Forcibly terminates an over-budget task. No output is recorded.
    fn evict(&mut self, task: PendingTask) {
        task.cancel.cancel();
        task.handle.abort();
        let waited = task.submitted_at.elapsed();
        warn!(
            sequence = task.sequence,
            item = %task.target,
            waited_ms = waited.as_millis() as u64,
            "task exceeded wait budget, evicting"
        );
        self.report.evictions.push(Eviction {
            sequence: task.sequence,
            target: task.target,
            waited,
        });
    }

    /// Emits one snapshot per poll iteration. Pure side effect.
    fn observe_progress(&self) {
        let snapshot = ProgressSnapshot {
            submitted: self.report.submitted,
            pending: self.pending.len(),
            active: self.pool.in_flight(),
            completed: self.report.results.len(),
            evicted: self.report.evictions.len(),
            rejected: self.report.rejections.len(),
            elapsed: self.started_at.elapsed(),
        };
        self.progress.report(&snapshot);
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("callable", &self.callable.name())
            .field("pending", &self.pending.len())
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

/// Extracts a readable message from a panic payload.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
