//! # Executor - async tree-walking interpreter
//!
//! Runs an instrumented program against an `ExecutionContext`. Every
//! `Stmt::Step` is a checkpoint whose behavior depends on the pacing:
//!
//! - `Stepped`: emit a step event, then suspend for the delay and any pause
//! - `Synchronous`: emit a step event and keep going
//! - `Quiet`: only observe destruction (program event handlers)
//!
//! Control flow is carried by `Flow`; raised values unwind through `Raise`.

mod calls;
mod expressions;
mod frame;
mod statements;


use std::future::Future;
use std::pin::{pin, Pin};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use super::errors::{self, ExecResult, Raise};
use super::stdlib::{self, Builtin};
use super::types::{Program, Val};
use crate::context::ExecutionContext;

pub use frame::Frame;

/// Boxed future used by the recursive evaluation entry points
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Stepped,
    Synchronous,
    Quiet,
}

/// Nested user function calls allowed before `StackOverflow` is raised
pub const MAX_CALL_DEPTH: usize = 128;

/// How a statement finished
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(Val),
}

#[derive(Clone)]
pub struct Executor {
    ctx: Arc<ExecutionContext>,
    pace: Pace,
    depth: usize,
}

impl Executor {
    pub fn new(ctx: Arc<ExecutionContext>, pace: Pace) -> Self {
        Self { ctx, pace, depth: 0 }
    }

    /// Executor paced the way the run was configured
    pub fn for_run(ctx: Arc<ExecutionContext>) -> Self {
        let pace = if ctx.is_synchronous() {
            Pace::Synchronous
        } else {
            Pace::Stepped
        };
        Self::new(ctx, pace)
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    pub fn pace(&self) -> Pace {
        self.pace
    }

    /// Executor for the body of a function called from this one
    fn nested(&self) -> ExecResult<Self> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Raise::error(
                errors::STACK_OVERFLOW,
                format!("Maximum call depth of {} exceeded", MAX_CALL_DEPTH),
            ));
        }
        Ok(Self {
            ctx: self.ctx.clone(),
            pace: self.pace,
            depth: self.depth + 1,
        })
    }

    /// Run the program's main body; a top-level `return` supplies the value
    pub async fn run_program(&self, program: &Program) -> ExecResult<Val> {
        let mut frame = Frame::main();
        match self.exec_body(&mut frame, &program.body).await? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Val::Null),
        }
    }

    /// Run the main body to completion without ever suspending
    ///
    /// Raises `SuspendedInSynchronousRun` if the body would have to wait.
    pub fn run_blocking(&self, program: &Program) -> ExecResult<Val> {
        let mut future = pin!(self.run_program(program));
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(Raise::error(
                errors::SUSPENDED_IN_SYNC,
                "Program tried to suspend during a synchronous run",
            )),
        }
    }

    /// Pass a step point
    async fn checkpoint(&self, delay: Option<Duration>) -> ExecResult<()> {
        let stepper = self.ctx.stepper();
        match self.pace {
            Pace::Stepped => stepper.step(delay.or(self.ctx.default_delay())).await?,
            Pace::Synchronous => stepper.step_now()?,
            Pace::Quiet => stepper.ensure_live()?,
        }
        Ok(())
    }

    /// Look a name up: locals, globals, user context, builtins
    fn resolve(&self, frame: &Frame, name: &str) -> ExecResult<Val> {
        if let Some(value) = frame.lookup(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.ctx.global(name) {
            return Ok(value);
        }
        if let Some(value) = self.ctx.binding(name) {
            return Ok(value.clone());
        }
        match name {
            "console" => Ok(stdlib::console_object()),
            "controller" => Ok(stdlib::controller_object(&self.ctx.run_id().to_string())),
            _ => Builtin::from_name(name).map(Val::Native).ok_or_else(|| {
                Raise::error(errors::REFERENCE_ERROR, format!("{} is not defined", name))
            }),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("run_id", &self.ctx.run_id())
            .field("pace", &self.pace)
            .field("depth", &self.depth)
            .finish()
    }
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

/// Milliseconds argument as a delay; `null` means "use the default"
///
/// `Infinity`, or any delay too long for a `Duration`, waits until the run
/// is stopped.
fn delay_arg(builtin: Builtin, value: Option<&Val>) -> ExecResult<Option<Duration>> {
    match value {
        None | Some(Val::Null) => Ok(None),
        Some(Val::Num(ms)) if *ms >= 0.0 => Ok(Some(
            Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX),
        )),
        Some(other) => Err(stdlib::wrong_type(
            builtin,
            "a non-negative number of milliseconds",
            other,
        )),
    }
}
