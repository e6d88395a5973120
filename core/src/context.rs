//! Per-run execution context
//!
//! Everything a running program can reach lives here and is handed to the
//! executor by `Arc`. Nothing is process-global, so concurrent runs never
//! observe each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::RunState;
use crate::errors::RunError;
use crate::events::EventBus;
use crate::interpreter::errors::{self, ExecResult, Raise};
use crate::interpreter::Val;
use crate::stepper::Stepper;
use crate::tracker::ActiveOperationTracker;

/* ===================== Console ===================== */

/// Sink for `print`/`console.log`
pub trait Console: Send + Sync {
    fn log(&self, line: &str);
}

/// Routes program output through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn log(&self, line: &str) {
        info!(target: "stepwise::console", "{}", line);
    }
}

/// Writes program output to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn log(&self, line: &str) {
        println!("{}", line);
    }
}

/// Collects program output in memory
#[derive(Debug, Default)]
pub struct BufferConsole {
    lines: Mutex<Vec<String>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Console for BufferConsole {
    fn log(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

/* ===================== Execution Context ===================== */

pub struct ExecutionContext {
    run_id: Uuid,
    stepper: Arc<Stepper>,
    tracker: Arc<ActiveOperationTracker>,
    bindings: HashMap<String, Val>,
    globals: Mutex<HashMap<String, Val>>,
    console: Arc<dyn Console>,
    stop_requested: AtomicBool,
    state: Mutex<RunState>,
    default_delay: Option<Duration>,
    synchronous: bool,
}

impl ExecutionContext {
    pub fn new(
        bindings: HashMap<String, Val>,
        console: Arc<dyn Console>,
        default_delay: Option<Duration>,
        synchronous: bool,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stepper: Arc::new(Stepper::with_bus(EventBus::new())),
            tracker: Arc::new(ActiveOperationTracker::new()),
            bindings,
            globals: Mutex::new(HashMap::new()),
            console,
            stop_requested: AtomicBool::new(false),
            state: Mutex::new(RunState::Starting),
            default_delay,
            synchronous,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stepper(&self) -> &Arc<Stepper> {
        &self.stepper
    }

    pub fn events(&self) -> &EventBus {
        self.stepper.events()
    }

    pub fn tracker(&self) -> &Arc<ActiveOperationTracker> {
        &self.tracker
    }

    pub fn console(&self) -> &dyn Console {
        self.console.as_ref()
    }

    pub fn default_delay(&self) -> Option<Duration> {
        self.default_delay
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /* ----- namespace ----- */

    fn globals(&self) -> MutexGuard<'_, HashMap<String, Val>> {
        self.globals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn global(&self, name: &str) -> Option<Val> {
        self.globals().get(name).cloned()
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.globals().contains_key(name)
    }

    pub fn set_global(&self, name: &str, value: Val) {
        self.globals().insert(name.to_string(), value);
    }

    /// Value injected through `RunOptions::context`
    pub fn binding(&self, name: &str) -> Option<&Val> {
        self.bindings.get(name)
    }

    /* ----- lifecycle ----- */

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: RunState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !current.is_terminal() {
            *current = state;
        }
    }

    /// Stop the run: every pending and future step rejects
    pub fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            debug!(run_id = %self.run_id, "stop requested");
        }
        self.stepper.destroy();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Run `operation` as a tracked suboperation on the current runtime
    ///
    /// A thrown value fails the run with `RunError::Suboperation`; a
    /// destroyed operation ends quietly.
    pub fn spawn_suboperation<F>(&self, label: &'static str, operation: F) -> ExecResult<()>
    where
        F: Future<Output = ExecResult<Val>> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| {
            Raise::error(
                errors::NO_RUNTIME,
                format!("{} needs a Tokio runtime", label),
            )
        })?;

        self.tracker.increment();
        let tracker = self.tracker.clone();
        let run_id = self.run_id;
        let task = handle.spawn(operation);
        handle.spawn(async move {
            let outcome = task.await.unwrap_or_else(|err| {
                warn!(%run_id, label, error = %err, "suboperation did not finish");
                Err(Raise::error(
                    errors::TASK_PANICKED,
                    format!("{} failed: {}", label, err),
                ))
            });
            match outcome {
                Ok(_) => {}
                Err(Raise::Destroyed) => debug!(%run_id, label, "suboperation cancelled"),
                Err(raised) => tracker.reset(RunError::from_suboperation(raised)),
            }
            tracker.decrement();
        });
        Ok(())
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("state", &self.state())
            .field("stepper", &self.stepper.state())
            .field("active_operations", &self.tracker.len())
            .finish()
    }
}
