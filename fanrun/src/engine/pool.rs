//! Fixed-capacity pool of reusable worker contexts.
//!
//! The pool is the only shared mutable resource in the engine. Worker bodies
//! acquire a context inside their own spawned future, so the submission loop
//! never blocks on capacity: the pool's internal scheduler (a fair FIFO
//! semaphore) delays execution instead. Dropping a [`ContextLease`] returns
//! the context, whether the invocation completed or was aborted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::context::{WorkerContext, WorkerEnvironment};

// =============================================================================
// Context Pool
// =============================================================================

/// A fixed set of reusable worker contexts.
///
/// At most `capacity` leases exist at any instant. The semaphore is fair:
/// waiters acquire in request order, so the oldest submitted tasks occupy
/// contexts first.
#[derive(Clone)]
pub struct ContextPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<WorkerContext>>,
    capacity: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ContextPool {
    /// Creates a pool of `capacity` contexts initialized from the shared
    /// environment.
    ///
    /// Capacity bounds are enforced by
    /// [`EngineConfig::validate`](super::EngineConfig::validate) before any
    /// pool is constructed; a zero capacity here is a programming error.
    pub fn new(capacity: usize, environment: Arc<WorkerEnvironment>) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let idle = (0..capacity)
            .map(|id| WorkerContext::new(id, Arc::clone(&environment)))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(idle),
                capacity,
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Acquires a context, waiting until one is free.
    pub async fn acquire(&self) -> ContextLease {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed unexpectedly");
        self.lease(permit)
    }

    /// Tries to acquire a context without waiting.
    ///
    /// Returns `None` if every context is leased.
    pub fn try_acquire(&self) -> Option<ContextLease> {
        let permit = self.inner.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.lease(permit))
    }

    /// Checks a context out of the idle set against an already-held permit.
    fn lease(&self, permit: OwnedSemaphorePermit) -> ContextLease {
        let context = self
            .inner
            .idle
            .lock()
            .expect("pool lock poisoned")
            .pop()
            .expect("permit held without an idle context");

        let current = self.inner.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.update_peak(current);

        ContextLease {
            context: Some(context),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the number of contexts currently free.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Returns the number of contexts currently leased.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Relaxed)
    }

    /// Returns the peak number of simultaneous leases observed.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Resets the peak counter.
    pub fn reset_peak(&self) {
        self.inner.peak_in_flight.store(0, Ordering::Relaxed);
    }
}

impl PoolInner {
    fn restore(&self, context: WorkerContext) {
        self.idle
            .lock()
            .expect("pool lock poisoned")
            .push(context);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field(
                "leased",
                &format_args!("{}/{}", self.in_flight(), self.capacity()),
            )
            .field("peak", &self.peak_in_flight())
            .finish()
    }
}

// =============================================================================
// Context Lease
// =============================================================================

/// Exclusive access to one worker context.
///
/// While the lease is held it counts against the pool's capacity. Dropping
/// it returns the context for reuse - this is the release path for every
/// terminal task state, including eviction (the aborted future drops its
/// lease).
pub struct ContextLease {
    context: Option<WorkerContext>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl ContextLease {
    /// The leased context.
    pub fn context(&self) -> &WorkerContext {
        self.context.as_ref().expect("lease already released")
    }

    /// Mutable access to the leased context.
    pub fn context_mut(&mut self) -> &mut WorkerContext {
        self.context.as_mut().expect("lease already released")
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.restore(context);
        }
    }
}

impl std::fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLease")
            .field("context_id", &self.context.as_ref().map(|c| c.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool(capacity: usize) -> ContextPool {
        ContextPool::new(capacity, Arc::new(WorkerEnvironment::default()))
    }

    #[test]
    fn test_pool_creation() {
        let pool = pool(4);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.peak_in_flight(), 0);
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn test_pool_zero_capacity() {
        pool(0);
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let pool = pool(2);

        let lease1 = pool.acquire().await;
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.available(), 1);

        let lease2 = pool.acquire().await;
        assert_eq!(pool.in_flight(), 2);
        assert_eq!(pool.available(), 0);

        drop(lease1);
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.available(), 1);

        drop(lease2);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_try_acquire_exhaustion() {
        let pool = pool(1);

        let lease1 = pool.try_acquire();
        assert!(lease1.is_some());

        let lease2 = pool.try_acquire();
        assert!(lease2.is_none());

        drop(lease1);
        assert!(pool.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_contexts_are_reused() {
        let pool = pool(1);

        {
            let mut lease = pool.acquire().await;
            lease.context_mut().record_invocation();
        }
        {
            let mut lease = pool.acquire().await;
            // Same single context comes back with its history intact.
            assert_eq!(lease.context().invocations(), 1);
            lease.context_mut().record_invocation();
        }
        let lease = pool.acquire().await;
        assert_eq!(lease.context().invocations(), 2);
    }

    #[tokio::test]
    async fn test_peak_tracking() {
        let pool = pool(3);

        let l1 = pool.acquire().await;
        let l2 = pool.acquire().await;
        assert_eq!(pool.peak_in_flight(), 2);

        drop(l1);
        drop(l2);
        assert_eq!(pool.peak_in_flight(), 2);

        pool.reset_peak();
        assert_eq!(pool.peak_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let pool = pool(1);
        let lease = pool.acquire().await;

        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move {
            let _lease = pool_clone.acquire().await;
            "acquired"
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(lease);

        let result = tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should complete")
            .expect("waiter should not panic");
        assert_eq!(result, "acquired");
    }
}
