//! Active operation tracking
//!
//! A run is finished only once its main body and every suboperation it
//! spawned have settled. Rather than enumerating spawn sites, each one
//! increments a shared counter and decrements it when done; the tracker
//! settles when the counter returns to zero.
//!
//! Settlement is written once. A `reset(err)` settles the tracker as failed
//! immediately, and a later return to zero does not turn it into a success.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::errors::RunError;

/// Terminal result of a tracker
pub type Settlement = Result<(), RunError>;

type SettleHook = Box<dyn FnOnce(&Settlement) + Send>;

pub struct ActiveOperationTracker {
    count: Mutex<usize>,
    settled: watch::Sender<Option<Settlement>>,
    hook: Mutex<Option<SettleHook>>,
}

impl ActiveOperationTracker {
    pub fn new() -> Self {
        let (settled, _) = watch::channel(None);
        Self {
            count: Mutex::new(0),
            settled,
            hook: Mutex::new(None),
        }
    }

    pub fn increment(&self) {
        *lock(&self.count) += 1;
    }

    /// Decrement the counter, settling as success when it reaches zero
    pub fn decrement(&self) {
        let reached_zero = {
            let mut count = lock(&self.count);
            *count = count.saturating_sub(1);
            *count == 0
        };

        if reached_zero {
            self.settle(Ok(()));
        }
    }

    /// Force the tracker into its failed state regardless of the counter
    pub fn reset(&self, error: RunError) {
        debug!(error = %error, "Active operations reset");
        self.settle(Err(error));
    }

    /// Number of outstanding operations
    pub fn len(&self) -> usize {
        *lock(&self.count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current settlement, if any
    pub fn settlement(&self) -> Option<Settlement> {
        self.settled.borrow().clone()
    }

    /// Resolve once the tracker has settled
    pub async fn settled(&self) -> Settlement {
        let mut rx = self.settled.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone().unwrap_or(Err(RunError::Destroyed)),
            Err(_) => Err(RunError::Destroyed),
        };
        result
    }

    /// Register a callback run exactly once, at settlement
    ///
    /// Registering after settlement runs the hook right away.
    pub fn on_settle<F>(&self, hook: F)
    where
        F: FnOnce(&Settlement) + Send + 'static,
    {
        if let Some(settlement) = self.settlement() {
            hook(&settlement);
            return;
        }
        *lock(&self.hook) = Some(Box::new(hook));

        // Settlement may have raced the registration
        if self.settlement().is_some() {
            self.fire_hook();
        }
    }

    fn settle(&self, result: Settlement) {
        let mut pending = Some(result);
        let changed = self.settled.send_if_modified(|current| {
            if current.is_none() {
                *current = pending.take();
                true
            } else {
                false
            }
        });

        if changed {
            self.fire_hook();
        }
    }

    fn fire_hook(&self) {
        let hook = lock(&self.hook).take();
        if let (Some(hook), Some(settlement)) = (hook, self.settlement()) {
            hook(&settlement);
        }
    }
}

impl Default for ActiveOperationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActiveOperationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveOperationTracker")
            .field("count", &self.len())
            .field("settled", &self.settlement())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::adapt_error;
    use crate::interpreter::Val;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn failure(msg: &str) -> RunError {
        RunError::Suboperation(adapt_error(Val::Str(msg.to_string())))
    }

    #[tokio::test]
    async fn test_settles_when_counter_returns_to_zero() {
        let tracker = Arc::new(ActiveOperationTracker::new());
        tracker.increment();
        tracker.increment();

        let waiting = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.settled().await })
        };

        tracker.decrement();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());
        assert_eq!(tracker.len(), 1);

        tracker.decrement();
        assert!(waiting.await.unwrap().is_ok());
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_reset_while_nonzero_rejects() {
        let tracker = ActiveOperationTracker::new();
        tracker.increment();
        tracker.increment();

        tracker.reset(failure("boom"));

        let err = tracker.settled().await.unwrap_err();
        assert_eq!(err.message(), "boom");
        assert_eq!(tracker.len(), 2);
    }

    #[tokio::test]
    async fn test_reaching_zero_after_reset_stays_failed() {
        let tracker = ActiveOperationTracker::new();
        tracker.increment();

        tracker.reset(failure("first"));
        tracker.decrement();
        tracker.reset(failure("second"));

        let err = tracker.settled().await.unwrap_err();
        assert_eq!(err.message(), "first");
    }

    #[tokio::test]
    async fn test_decrement_saturates_at_zero() {
        let tracker = ActiveOperationTracker::new();
        tracker.decrement();
        tracker.decrement();

        assert_eq!(tracker.len(), 0);
        assert!(tracker.settled().await.is_ok());
    }

    #[test]
    fn test_settle_hook_runs_exactly_once() {
        let tracker = ActiveOperationTracker::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tracker.on_settle(move |result| {
            assert!(result.is_ok());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tracker.increment();
        tracker.decrement();
        tracker.increment();
        tracker.decrement();
        tracker.reset(failure("late"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_registered_after_settlement_runs_immediately() {
        let tracker = ActiveOperationTracker::new();
        tracker.reset(failure("early"));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tracker.on_settle(move |result| {
            assert!(result.is_err());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
