use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tcc::PoolError;
use tcc::exec::{TaskPool, WorkItem};

/// A fake pool that:
/// - counts accepted submissions
/// - spawns accepted work on the tokio runtime
/// - optionally fails every submission after the first `accept` ones.
#[derive(Debug, Clone)]
pub struct FakePool {
    accepted: Arc<AtomicUsize>,
    accept: Option<usize>,
    error: PoolError,
}

impl FakePool {
    /// Accepts everything.
    pub fn new() -> Self {
        Self {
            accepted: Arc::new(AtomicUsize::new(0)),
            accept: None,
            error: PoolError::Closed,
        }
    }

    /// Accepts `accept` submissions, then fails with `error`.
    pub fn failing_after(accept: usize, error: PoolError) -> Self {
        Self {
            accepted: Arc::new(AtomicUsize::new(0)),
            accept: Some(accept),
            error,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Default for FakePool {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPool for FakePool {
    fn submit(
        &self,
        work: WorkItem,
    ) -> Pin<Box<dyn Future<Output = Result<(), PoolError>> + Send + '_>> {
        Box::pin(async move {
            let seen = self.accepted.load(Ordering::SeqCst);
            if self.accept.is_some_and(|limit| seen >= limit) {
                return Err(self.error);
            }
            self.accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(work);
            Ok(())
        })
    }
}
