// src/exec/pool.rs

//! Pluggable worker-pool abstraction.
//!
//! A pool-bounded run hands every node body to a [`TaskPool`] instead of
//! spawning it directly. The controller only relies on the submission
//! contract: wait until the pool accepts the work item, or fail.
//!
//! - [`UnboundedPool`] spawns every work item immediately on the tokio runtime.
//! - [`BoundedPool`] caps concurrency with a semaphore; when every slot is taken
//!   it either waits ([`SubmitMode::Block`]) or rejects
//!   ([`SubmitMode::Reject`]).
//! - Tests can provide their own `TaskPool` that, for example, records the
//!   submission order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::errors::PoolError;
use crate::types::SubmitMode;

/// One node body, ready to be driven to completion by a pool.
pub type WorkItem = BoxFuture<'static, ()>;

/// Capability consumed by [`crate::Controller::run_with_pool`].
pub trait TaskPool: Send + Sync {
    /// Accept `work` for execution.
    ///
    /// Resolves once the pool has taken ownership of the work item (it may
    /// still be running). An error means the item was dropped without being
    /// run.
    fn submit(
        &self,
        work: WorkItem,
    ) -> Pin<Box<dyn Future<Output = Result<(), PoolError>> + Send + '_>>;
}

/// Runs every work item on its own tokio task.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundedPool;

impl TaskPool for UnboundedPool {
    fn submit(
        &self,
        work: WorkItem,
    ) -> Pin<Box<dyn Future<Output = Result<(), PoolError>> + Send + '_>> {
        Box::pin(async move {
            tokio::spawn(work);
            Ok(())
        })
    }
}

/// At most `capacity` work items in flight at any time.
///
/// A slot is held for the whole lifetime of the work item, including the time
/// it spends waiting on its dependencies.
#[derive(Debug, Clone)]
pub struct BoundedPool {
    slots: Arc<Semaphore>,
    capacity: usize,
    mode: SubmitMode,
}

impl BoundedPool {
    pub fn new(capacity: usize, mode: SubmitMode) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            mode,
        }
    }

    pub fn from_config(cfg: &PoolConfig) -> Self {
        Self::new(cfg.capacity, cfg.submit)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> SubmitMode {
        self.mode
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Reject every later submission with [`PoolError::Closed`]. Work already
    /// accepted keeps running.
    pub fn close(&self) {
        debug!(capacity = self.capacity, "closing bounded pool");
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }
}

impl TaskPool for BoundedPool {
    fn submit(
        &self,
        work: WorkItem,
    ) -> Pin<Box<dyn Future<Output = Result<(), PoolError>> + Send + '_>> {
        // Clone the semaphore so the spawned work doesn't borrow `self`.
        let slots = Arc::clone(&self.slots);
        let mode = self.mode;

        Box::pin(async move {
            let permit = match mode {
                SubmitMode::Block => Arc::clone(&slots)
                    .acquire_owned()
                    .await
                    .map_err(|_| PoolError::Closed)?,
                SubmitMode::Reject => {
                    Arc::clone(&slots)
                        .try_acquire_owned()
                        .map_err(|err| match err {
                            TryAcquireError::Closed => PoolError::Closed,
                            TryAcquireError::NoPermits => PoolError::Saturated,
                        })?
                }
            };

            trace!(free = slots.available_permits(), "pool slot acquired");
            tokio::spawn(async move {
                work.await;
                drop(permit);
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn bounded_pool_limits_concurrency() {
        let pool = BoundedPool::new(2, SubmitMode::Block);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = tokio::sync::mpsc::channel(8);

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            let work = async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(()).await;
            }
            .boxed();
            pool.submit(work).await.unwrap();
        }

        for _ in 0..6 {
            done_rx.recv().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn reject_mode_fails_when_saturated() {
        let pool = BoundedPool::new(1, SubmitMode::Reject);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        pool.submit(
            async move {
                let _ = release_rx.await;
            }
            .boxed(),
        )
        .await
        .unwrap();

        let err = pool.submit(async {}.boxed()).await.unwrap_err();
        assert_eq!(err, PoolError::Saturated);

        release_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn slot_is_released_when_work_finishes() {
        let pool = BoundedPool::new(1, SubmitMode::Reject);
        let (done_tx, done_rx) = oneshot::channel::<()>();

        pool.submit(
            async move {
                let _ = done_tx.send(());
            }
            .boxed(),
        )
        .await
        .unwrap();
        done_rx.await.unwrap();

        // The permit is dropped right after the work completes.
        for _ in 0..50 {
            if pool.available() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.available(), 1);
        pool.submit(async {}.boxed()).await.unwrap();
    }

    #[tokio::test]
    async fn closed_pool_rejects_submissions() {
        let pool = BoundedPool::new(4, SubmitMode::Block);
        pool.close();
        assert!(pool.is_closed());

        let err = pool.submit(async {}.boxed()).await.unwrap_err();
        assert_eq!(err, PoolError::Closed);
    }
}
