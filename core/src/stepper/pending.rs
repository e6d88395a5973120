//! Pending waits
//!
//! A `PendingWait` is a suspension that something outside the waiting task
//! settles: `resolve` lets waiters proceed, `cancel` tells them the stepper
//! is gone. It is backed by a single-slot watch channel, so any number of
//! waiters can observe it and none of them poll.

use tokio::sync::watch;

/// Settlement status of a pending wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Pending,
    Released,
    Cancelled,
}

/// Outcome observed by a waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Released,
    Cancelled,
}

/// Cancellable, externally resolvable suspension
#[derive(Debug)]
pub struct PendingWait {
    tx: watch::Sender<WaitStatus>,
}

impl PendingWait {
    /// Create a wait with no timeout
    pub fn indefinite() -> Self {
        let (tx, _) = watch::channel(WaitStatus::Pending);
        Self { tx }
    }

    /// Release every waiter. Returns false if already settled.
    pub fn resolve(&self) -> bool {
        self.settle(WaitStatus::Released)
    }

    /// Cancel every waiter. Returns false if already settled.
    pub fn cancel(&self) -> bool {
        self.settle(WaitStatus::Cancelled)
    }

    pub fn status(&self) -> WaitStatus {
        *self.tx.borrow()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == WaitStatus::Pending
    }

    /// Register a waiter on this wait
    pub fn waiter(&self) -> Waiter {
        Waiter {
            rx: self.tx.subscribe(),
        }
    }

    fn settle(&self, status: WaitStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == WaitStatus::Pending {
                *current = status;
                true
            } else {
                false
            }
        })
    }
}

/// Receiving half of a pending wait
#[derive(Debug)]
pub struct Waiter {
    rx: watch::Receiver<WaitStatus>,
}

impl Waiter {
    /// Suspend until the wait is settled
    ///
    /// A wait whose owner was dropped without settling counts as cancelled.
    pub async fn settled(mut self) -> WaitOutcome {
        match self.rx.wait_for(|s| *s != WaitStatus::Pending).await {
            Ok(status) if *status == WaitStatus::Released => WaitOutcome::Released,
            _ => WaitOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_releases_all_waiters() {
        let wait = PendingWait::indefinite();
        let first = tokio::spawn(wait.waiter().settled());
        let second = tokio::spawn(wait.waiter().settled());

        assert!(wait.resolve());

        assert_eq!(first.await.unwrap(), WaitOutcome::Released);
        assert_eq!(second.await.unwrap(), WaitOutcome::Released);
    }

    #[tokio::test]
    async fn test_settlement_is_first_wins() {
        let wait = PendingWait::indefinite();

        assert!(wait.cancel());
        assert!(!wait.resolve());
        assert!(!wait.cancel());

        assert_eq!(wait.status(), WaitStatus::Cancelled);
        assert_eq!(wait.waiter().settled().await, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_unsettled_wait_stays_pending() {
        let wait = PendingWait::indefinite();
        let waiter = wait.waiter();

        let timed_out = tokio::time::timeout(Duration::from_millis(30), waiter.settled()).await;

        assert!(timed_out.is_err());
        assert!(wait.is_pending());
    }

    #[tokio::test]
    async fn test_dropped_wait_counts_as_cancelled() {
        let wait = PendingWait::indefinite();
        let waiter = wait.waiter();
        drop(wait);

        assert_eq!(waiter.settled().await, WaitOutcome::Cancelled);
    }
}
