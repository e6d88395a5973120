//! Function calls and the builtins that reach into the run

use std::sync::Arc;

use tracing::warn;

use super::{delay_arg, BoxFuture, Executor, Flow, Frame, Pace};
use crate::errors::RunError;
use crate::events::{Event, Topic};
use crate::interpreter::errors::{self, ExecResult, Raise};
use crate::interpreter::stdlib::{self, expect_args, wrong_type, Builtin};
use crate::interpreter::types::{FunctionDef, Val};

impl Executor {
    pub fn call<'a>(&'a self, callee: Val, args: Vec<Val>) -> BoxFuture<'a, ExecResult<Val>> {
        Box::pin(async move {
            match callee {
                Val::Func(def) => self.call_function(def, args).await,
                Val::Native(builtin) if builtin.is_runtime() => {
                    self.call_runtime(builtin, args).await
                }
                Val::Native(builtin) => stdlib::call_pure(builtin, args),
                other => Err(Raise::error(
                    errors::NOT_CALLABLE,
                    format!("{} is not callable", other.type_name()),
                )),
            }
        })
    }

    fn call_function<'a>(
        &'a self,
        def: Arc<FunctionDef>,
        args: Vec<Val>,
    ) -> BoxFuture<'a, ExecResult<Val>> {
        Box::pin(async move {
            if args.len() != def.params.len() {
                return Err(Raise::error(
                    errors::WRONG_ARG_COUNT,
                    format!(
                        "{} expects {} argument(s), got {}",
                        def.name.as_deref().unwrap_or("function"),
                        def.params.len(),
                        args.len()
                    ),
                ));
            }

            let exec = self.nested()?;
            let mut frame = Frame::function(&def.params, args);
            match exec.exec_body(&mut frame, &def.body).await? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Val::Null),
            }
        })
    }

    /// Call an event handler, passing the payload only if it takes one
    fn call_handler<'a>(&'a self, handler: Val, payload: Val) -> BoxFuture<'a, ExecResult<Val>> {
        let args = match &handler {
            Val::Func(def) if def.params.is_empty() => Vec::new(),
            _ => vec![payload],
        };
        self.call(handler, args)
    }

    async fn call_runtime(&self, builtin: Builtin, args: Vec<Val>) -> ExecResult<Val> {
        match builtin {
            Builtin::Step => {
                expect_args(builtin, &args, 0, 1)?;
                let delay = delay_arg(builtin, args.first())?;
                self.checkpoint(delay).await?;
                Ok(Val::Null)
            }
            Builtin::Pause => {
                expect_args(builtin, &args, 0, 0)?;
                // Synchronous runs never wait
                if self.pace != Pace::Synchronous {
                    self.ctx.stepper().pause();
                }
                Ok(Val::Null)
            }
            Builtin::Resume => {
                expect_args(builtin, &args, 0, 0)?;
                self.ctx.stepper().resume();
                Ok(Val::Null)
            }
            Builtin::Stop => {
                expect_args(builtin, &args, 0, 0)?;
                self.ctx.request_stop();
                Err(Raise::Destroyed)
            }
            Builtin::On | Builtin::Once => self.subscribe(builtin, args),
            Builtin::Off => {
                expect_args(builtin, &args, 1, 1)?;
                match &args[0] {
                    Val::Subscription(sub) => Ok(Val::Bool(sub.unsubscribe())),
                    other => Err(wrong_type(builtin, "a subscription handle", other)),
                }
            }
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(Val::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.ctx.console().log(&line);
                Ok(Val::Null)
            }
            Builtin::SetTimeout => self.set_timeout(args),
            other => stdlib::call_pure(other, args),
        }
    }

    /// `setTimeout(fn, ms)`: run `fn` later as a tracked suboperation
    fn set_timeout(&self, args: Vec<Val>) -> ExecResult<Val> {
        expect_args(Builtin::SetTimeout, &args, 1, 2)?;
        let delay = delay_arg(Builtin::SetTimeout, args.get(1))?.unwrap_or_default();
        let func = callable(Builtin::SetTimeout, &args[0])?;

        let exec = Executor::for_run(self.ctx.clone());
        let cancel = self.ctx.stepper().cancellation();
        self.ctx.spawn_suboperation("setTimeout", async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Raise::Destroyed),
                _ = tokio::time::sleep(delay) => {}
            }
            exec.call(func, Vec::new()).await
        })?;
        Ok(Val::Null)
    }

    /// `on`/`once`: every matching bus event runs the handler quietly
    fn subscribe(&self, builtin: Builtin, args: Vec<Val>) -> ExecResult<Val> {
        expect_args(builtin, &args, 2, 2)?;
        let topic = match &args[0] {
            Val::Str(name) => name
                .parse::<Topic>()
                .map_err(|msg| Raise::error(errors::WRONG_ARG_TYPE, msg))?,
            other => return Err(wrong_type(builtin, "a topic name", other)),
        };
        let func = callable(builtin, &args[1])?;

        let weak = Arc::downgrade(&self.ctx);
        let handler = move |event: &Event| {
            let Some(ctx) = weak.upgrade() else {
                return;
            };
            let exec = Executor::new(ctx.clone(), Pace::Quiet);
            let func = func.clone();
            let payload = event_payload(event);
            let spawned = ctx.spawn_suboperation("event handler", async move {
                exec.call_handler(func, payload).await
            });
            if let Err(raised) = spawned {
                warn!(run_id = %ctx.run_id(), topic = %event.topic(), "event handler not scheduled");
                ctx.tracker().reset(RunError::from_suboperation(raised));
            }
        };

        let once = builtin == Builtin::Once;
        let sub = self.ctx.events().subscribe(topic, Arc::new(handler), once);
        Ok(Val::Subscription(sub))
    }
}

fn callable(builtin: Builtin, value: &Val) -> ExecResult<Val> {
    match value {
        Val::Func(_) | Val::Native(_) => Ok(value.clone()),
        other => Err(wrong_type(builtin, "a function", other)),
    }
}

/// Event payload as a program value
fn event_payload(event: &Event) -> Val {
    match event {
        Event::Start => Val::Null,
        Event::Step(info) => serde_json::to_value(info).map(Val::from).unwrap_or(Val::Null),
        Event::End(state) => Val::Str(state.as_str().to_string()),
    }
}
