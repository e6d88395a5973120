//! # Stepper - cooperative pacing primitive
//!
//! Every instrumented checkpoint calls `step`. The stepper decides whether
//! the calling task may continue right away, after a delay, or only after an
//! external `resume`, and it turns `destroy` into a `Destroyed` failure at
//! the checkpoint so the program unwinds.
//!
//! ## Delay and pause
//!
//! A step is ready once its delay has elapsed AND no pause is active. The
//! delay clock starts at the step call, so time spent paused during the
//! delay counts toward it. After a resume the pause gate is checked again,
//! so a pause installed right after a resume still holds the step.

pub mod pending;

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{Event, EventBus, StepInfo};
use pending::{PendingWait, WaitOutcome};


/* ===================== Types ===================== */

/// Lifecycle state of a stepper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperState {
    Idle,
    Running,
    Paused,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("stepper destroyed")]
    Destroyed,
}

struct StepperInner {
    state: StepperState,
    /// The pause gate, the only pending wait a stepper holds
    pause: Option<PendingWait>,
}

/* ===================== Stepper ===================== */

pub struct Stepper {
    inner: Mutex<StepperInner>,
    events: EventBus,
    cancel: CancellationToken,
    steps: AtomicU64,
}

impl Stepper {
    /// Create a stepper with its own private event bus
    pub fn new() -> Self {
        Self::with_bus(EventBus::new())
    }

    /// Create a stepper that emits `step` events on `events`
    pub fn with_bus(events: EventBus) -> Self {
        Self {
            inner: Mutex::new(StepperInner {
                state: StepperState::Idle,
                pause: None,
            }),
            events,
            cancel: CancellationToken::new(),
            steps: AtomicU64::new(0),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> StepperState {
        self.lock().state
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == StepperState::Destroyed
    }

    /// Number of step events emitted so far
    pub fn step_count(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    /// Token cancelled on destroy, for suboperations that outlive a step
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Checkpoint: emit, then wait out the delay and any active pause
    pub async fn step(&self, delay: Option<Duration>) -> Result<(), StepError> {
        self.begin(delay)?;

        if let Some(delay) = delay.filter(|d| !d.is_zero()) {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(StepError::Destroyed),
                () = tokio::time::sleep(delay) => {}
            }
        }

        loop {
            let waiter = {
                let inner = self.lock();
                if inner.state == StepperState::Destroyed {
                    return Err(StepError::Destroyed);
                }
                inner.pause.as_ref().map(PendingWait::waiter)
            };

            let Some(waiter) = waiter else {
                break;
            };

            match waiter.settled().await {
                WaitOutcome::Released => continue,
                WaitOutcome::Cancelled => return Err(StepError::Destroyed),
            }
        }

        // Let other tasks (the controller, timers) run between checkpoints
        tokio::task::yield_now().await;

        if self.is_destroyed() {
            return Err(StepError::Destroyed);
        }
        Ok(())
    }

    /// Checkpoint for synchronous runs: emits but never suspends
    pub fn step_now(&self) -> Result<(), StepError> {
        self.begin(None)
    }

    /// Checkpoint for silent runs: only observes destruction
    pub fn ensure_live(&self) -> Result<(), StepError> {
        if self.is_destroyed() {
            Err(StepError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Hold every subsequent (and currently blocked) step until `resume`
    pub fn pause(&self) {
        let mut inner = self.lock();
        match inner.state {
            StepperState::Destroyed | StepperState::Paused => {}
            StepperState::Idle | StepperState::Running => {
                inner.state = StepperState::Paused;
                if inner.pause.is_none() {
                    inner.pause = Some(PendingWait::indefinite());
                }
                debug!("Stepper paused");
            }
        }
    }

    /// Release an active pause
    pub fn resume(&self) {
        let gate = {
            let mut inner = self.lock();
            if inner.state != StepperState::Paused {
                return;
            }
            inner.state = StepperState::Running;
            inner.pause.take()
        };

        if let Some(gate) = gate {
            gate.resolve();
        }
        debug!("Stepper resumed");
    }

    /// Tear down: every blocked and future step fails with `Destroyed`
    pub fn destroy(&self) {
        let gate = {
            let mut inner = self.lock();
            if inner.state == StepperState::Destroyed {
                return;
            }
            inner.state = StepperState::Destroyed;
            inner.pause.take()
        };

        if let Some(gate) = gate {
            gate.cancel();
        }
        self.cancel.cancel();
        debug!(steps = self.step_count(), "Stepper destroyed");
    }

    fn begin(&self, delay: Option<Duration>) -> Result<(), StepError> {
        {
            let mut inner = self.lock();
            match inner.state {
                StepperState::Destroyed => return Err(StepError::Destroyed),
                StepperState::Idle => inner.state = StepperState::Running,
                StepperState::Running | StepperState::Paused => {}
            }
        }

        let index = self.steps.fetch_add(1, Ordering::SeqCst);
        self.events.emit(&Event::Step(StepInfo {
            index,
            delay_ms: delay.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            at: Utc::now(),
        }));
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StepperInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Stepper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Stepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stepper")
            .field("state", &self.state())
            .field("steps", &self.step_count())
            .finish()
    }
}
