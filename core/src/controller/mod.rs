//! Execution controller
//!
//! `run` loads a program and launches it as one Tokio task. The returned
//! `ExecutionController` is the caller's handle: pacing controls, event
//! subscriptions and the two completion futures.
//!
//! Lifecycle of a run:
//!
//! 1. The main body counts as one tracked operation.
//! 2. `start` is emitted and the main task is spawned.
//! 3. When the main body finishes, `empty_stack` settles and the tracker is
//!    decremented.
//! 4. Once every tracked operation is done (or one failed), the tracker
//!    settles, `end` is emitted with the terminal state and the run is torn
//!    down.

mod options;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::errors::RunError;
use crate::events::{Event, EventBus, Handler, ListenerId, Subscription, Topic};
use crate::interpreter::errors::{self as codes, ExecResult, Raise};
use crate::interpreter::executor::Executor;
use crate::interpreter::instrument::{instrument, Granularity};
use crate::interpreter::lower::to_baseline;
use crate::interpreter::parser::{parse_program, ParseError};
use crate::interpreter::semantic_validator::{validate_program, ValidationError};
use crate::interpreter::types::Program;
use crate::interpreter::Val;
use crate::tracker::Settlement;

pub use options::RunOptions;

/* ===================== Run State ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Stopped
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* ===================== Load Errors ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Invalid program: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse, validate and instrument `source` without running it
pub fn load(
    source: &str,
    granularity: Granularity,
    baseline_dialect: bool,
) -> Result<Program, LoadError> {
    let program = parse_program(source)?;
    validate_program(&program).map_err(LoadError::Invalid)?;

    let program = instrument(program, granularity);
    Ok(if baseline_dialect {
        to_baseline(program)
    } else {
        program
    })
}

/* ===================== Launch ===================== */

/// Load `source` and start running it
///
/// Asynchronous runs are spawned on the current Tokio runtime. With
/// `synchronous` set, the main body has finished by the time this returns.
pub fn run(source: &str, options: RunOptions) -> Result<ExecutionController, LoadError> {
    let program = load(
        source,
        options.granularity,
        options.transform_to_baseline_dialect,
    )?;
    Ok(launch(program, options))
}

fn launch(program: Program, options: RunOptions) -> ExecutionController {
    let RunOptions {
        on_start,
        on_step,
        on_end,
        context,
        destroy_after_run,
        synchronous,
        step_delay,
        console,
        ..
    } = options;

    let ctx = Arc::new(ExecutionContext::new(context, console, step_delay, synchronous));
    let (empty_stack, _) = watch::channel(None);
    let controller = ExecutionController {
        inner: Arc::new(ControllerInner {
            ctx: ctx.clone(),
            empty_stack,
        }),
    };

    let span = info_span!("run", run_id = %ctx.run_id());
    let _guard = span.enter();

    // The main body is the first tracked operation
    ctx.tracker().increment();

    let bus = ctx.events();
    for (topic, handler) in [
        (Topic::Start, on_start),
        (Topic::Step, on_step),
        (Topic::End, on_end),
    ] {
        if let Some(handler) = handler {
            bus.subscribe(topic, handler, false);
        }
    }

    let weak = Arc::downgrade(&ctx);
    ctx.tracker()
        .on_settle(move |settlement| finish_run(&weak, settlement, destroy_after_run));

    info!(synchronous, "run starting");
    bus.emit(&Event::Start);
    ctx.set_state(RunState::Running);

    let program = Arc::new(program);
    let exec = Executor::for_run(ctx.clone());
    if synchronous {
        let result = exec.run_blocking(&program);
        controller.finish_main(result);
    } else {
        match Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(
                    async move { exec.run_program(&program).await }.instrument(span.clone()),
                );
                // A panicking main task still ends the run
                let main = controller.clone();
                handle.spawn(
                    async move {
                        let result = match task.await {
                            Ok(result) => result,
                            Err(err) => {
                                warn!(error = %err, "main task did not finish");
                                Err(Raise::error(
                                    codes::TASK_PANICKED,
                                    format!("Run task failed: {}", err),
                                ))
                            }
                        };
                        main.finish_main(result);
                    }
                    .instrument(span.clone()),
                );
            }
            Err(_) => {
                warn!("no Tokio runtime for an asynchronous run");
                controller.finish_main(Err(Raise::error(
                    codes::NO_RUNTIME,
                    "Asynchronous runs must start inside a Tokio runtime",
                )));
            }
        }
    }

    controller
}

/// Settlement hook: pick the terminal state, emit `end`, tear down
fn finish_run(ctx: &Weak<ExecutionContext>, settlement: &Settlement, destroy_after_run: bool) {
    let Some(ctx) = ctx.upgrade() else {
        return;
    };

    let state = match settlement {
        Err(err) if !err.is_destroyed() => RunState::Failed,
        _ if ctx.stop_requested() => RunState::Stopped,
        _ => RunState::Completed,
    };
    ctx.set_state(state);
    info!(run_id = %ctx.run_id(), state = %state, "run ended");
    ctx.events().emit(&Event::End(state));

    if destroy_after_run {
        ctx.events().destroy();
        ctx.stepper().destroy();
        debug!(run_id = %ctx.run_id(), "run resources released");
    }
}

/* ===================== Controller ===================== */

struct ControllerInner {
    ctx: Arc<ExecutionContext>,
    /// Outcome of the main body
    empty_stack: watch::Sender<Option<Result<Val, RunError>>>,
}

/// Handle to a launched run; cheap to clone
#[derive(Clone)]
pub struct ExecutionController {
    inner: Arc<ControllerInner>,
}

impl ExecutionController {
    pub fn run_id(&self) -> Uuid {
        self.inner.ctx.run_id()
    }

    pub fn state(&self) -> RunState {
        self.inner.ctx.state()
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.inner.ctx
    }

    pub fn events(&self) -> &EventBus {
        self.inner.ctx.events()
    }

    pub fn on<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events().on(topic, handler)
    }

    pub fn once<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events().once(topic, handler)
    }

    pub fn subscribe(&self, topic: Topic, handler: Handler, once: bool) -> Subscription {
        self.events().subscribe(topic, handler, once)
    }

    pub fn off(&self, topic: Topic, id: ListenerId) -> bool {
        self.events().off(topic, id)
    }

    pub fn pause(&self) {
        if !self.inner.ctx.is_synchronous() {
            self.inner.ctx.stepper().pause();
        }
    }

    pub fn resume(&self) {
        self.inner.ctx.stepper().resume();
    }

    /// Stop the run; a no-op once it has ended
    pub fn stop(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.inner.ctx.request_stop();
    }

    /// Outstanding tracked operations, the main body included
    pub fn active_operations(&self) -> usize {
        self.inner.ctx.tracker().len()
    }

    /// Current main-body outcome, if it has finished
    pub fn main_result(&self) -> Option<Result<Val, RunError>> {
        self.inner.empty_stack.borrow().clone()
    }

    /// Resolves with the main body's return value
    ///
    /// A stopped run resolves with `null`; a raise rejects.
    pub async fn empty_stack(&self) -> Result<Val, RunError> {
        let mut rx = self.inner.empty_stack.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(Val::Null)),
            Err(_) => Err(RunError::Destroyed),
        };
        result
    }

    /// Resolves once the main body and every suboperation have finished
    pub async fn execution_end(&self) -> Result<(), RunError> {
        self.inner.ctx.tracker().settled().await
    }

    /// Record the main body's outcome, then release its tracked slot
    fn finish_main(&self, result: ExecResult<Val>) {
        let ctx = &self.inner.ctx;
        match result {
            Ok(value) => {
                debug!(run_id = %ctx.run_id(), "main body returned");
                self.inner.empty_stack.send_replace(Some(Ok(value)));
            }
            Err(Raise::Destroyed) => {
                debug!(run_id = %ctx.run_id(), "main body stopped");
                self.inner.empty_stack.send_replace(Some(Ok(Val::Null)));
            }
            Err(raised) => {
                let err = RunError::from_raised(raised);
                warn!(run_id = %ctx.run_id(), error = %err, "main body raised");
                self.inner.empty_stack.send_replace(Some(Err(err.clone())));
                ctx.tracker().reset(err);
            }
        }
        ctx.tracker().decrement();
    }
}

impl fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionController")
            .field("run_id", &self.run_id())
            .field("state", &self.state())
            .field("active_operations", &self.active_operations())
            .finish()
    }
}
