//! Event lifetimes.
//!
//! Every dispatched event carries a [`KeepAlive`]. Handlers register
//! asynchronous work on it with [`KeepAlive::wait_until`]; the event counts as
//! fully handled once [`KeepAlive::settled`] resolves. Work that nobody waits
//! for is detached rather than aborted when the last handle is dropped.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::trace;

use crate::{Result, SwError};

#[derive(Default)]
struct Pending {
    tasks: Mutex<JoinSet<Result<()>>>,
}

impl Drop for Pending {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            trace!(pending = tasks.len(), "Detaching unawaited event work");
        }
        tasks.detach_all();
    }
}

/// Keep-alive token of one event.
#[derive(Clone, Default)]
pub struct KeepAlive {
    pending: Arc<Pending>,
}

impl KeepAlive {
    /// Create an empty lifetime.
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<Result<()>>> {
        self.pending
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Extend the event until `work` completes. Must be called from within a
    /// tokio runtime.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks().spawn(work);
    }

    /// Work registered and not yet collected by [`settled`](Self::settled).
    pub fn pending(&self) -> usize {
        self.tasks().len()
    }

    /// Wait for all registered work, including work registered while
    /// waiting. Returns the first failure; later work still runs to the end.
    pub async fn settled(&self) -> Result<()> {
        let mut first_error = None;

        loop {
            let mut batch = std::mem::take(&mut *self.tasks());
            if batch.is_empty() {
                break;
            }

            while let Some(joined) = batch.join_next().await {
                let outcome = joined
                    .map_err(|e| SwError::Task(e.to_string()))
                    .and_then(|result| result);
                if let Err(err) = outcome {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAlive")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_settled_with_no_work() {
        let lifetime = KeepAlive::new();
        assert_eq!(lifetime.pending(), 0);
        assert!(lifetime.settled().await.is_ok());
    }

    #[tokio::test]
    async fn test_settled_waits_for_all_work() {
        let lifetime = KeepAlive::new();
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [5u64, 1, 10] {
            let done = done.clone();
            lifetime.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(lifetime.pending(), 3);

        lifetime.settled().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(lifetime.pending(), 0);
    }

    #[tokio::test]
    async fn test_work_registered_while_settling() {
        let lifetime = KeepAlive::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_lifetime = lifetime.clone();
        let inner_done = done.clone();
        lifetime.wait_until(async move {
            let done = inner_done.clone();
            inner_lifetime.wait_until(async move {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            inner_done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        lifetime.settled().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let lifetime = KeepAlive::new();
        let finished = Arc::new(AtomicUsize::new(0));

        lifetime.wait_until(async { Err(SwError::InstallFailed("asset".to_string())) });
        let f = finished.clone();
        lifetime.wait_until(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let result = lifetime.settled().await;
        assert!(matches!(result, Err(SwError::InstallFailed(_))));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_lifetime_detaches_work() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        {
            let lifetime = KeepAlive::new();
            lifetime.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = tx.send(());
                Ok(())
            });
        }
        assert!(rx.await.is_ok());
    }
}
