//! Statement execution

use std::sync::Arc;

use super::{delay_arg, BoxFuture, Executor, Flow, Frame};
use crate::interpreter::errors::{ExecResult, Raise};
use crate::interpreter::stdlib::{self, Builtin};
use crate::interpreter::types::{Stmt, Val};

impl Executor {
    /// Run a statement list in the current scope, hoisting its functions first
    pub(super) fn exec_body<'a>(
        &'a self,
        frame: &'a mut Frame,
        body: &'a [Stmt],
    ) -> BoxFuture<'a, ExecResult<Flow>> {
        Box::pin(async move {
            self.hoist(frame, body);
            for stmt in body {
                match self.exec_stmt(frame, stmt).await? {
                    Flow::Normal => {}
                    flow => return Ok(flow),
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn hoist(&self, frame: &mut Frame, body: &[Stmt]) {
        for stmt in body {
            if let Stmt::Function { def } = stmt {
                if let Some(name) = &def.name {
                    frame.declare(&self.ctx, name, Val::Func(Arc::new(def.clone())));
                }
            }
        }
    }

    /// Run `stmt` inside a fresh scope holding `name = value`
    fn exec_with_binding<'a>(
        &'a self,
        frame: &'a mut Frame,
        name: &'a str,
        value: Val,
        stmt: &'a Stmt,
    ) -> BoxFuture<'a, ExecResult<Flow>> {
        Box::pin(async move {
            frame.push_scope();
            frame.declare(&self.ctx, name, value);
            let result = self.exec_stmt(frame, stmt).await;
            frame.pop_scope();
            result
        })
    }

    pub(super) fn exec_stmt<'a>(
        &'a self,
        frame: &'a mut Frame,
        stmt: &'a Stmt,
    ) -> BoxFuture<'a, ExecResult<Flow>> {
        Box::pin(async move {
            match stmt {
                Stmt::Block { body } => {
                    frame.push_scope();
                    let result = self.exec_body(frame, body).await;
                    frame.pop_scope();
                    result
                }

                Stmt::Let { name, init } => {
                    let value = match init {
                        Some(expr) => self.eval(frame, expr).await?,
                        None => Val::Null,
                    };
                    frame.declare(&self.ctx, name, value);
                    Ok(Flow::Normal)
                }

                Stmt::Assign { name, expr } => {
                    let value = self.eval(frame, expr).await?;
                    frame.assign(&self.ctx, name, value)?;
                    Ok(Flow::Normal)
                }

                Stmt::Expr { expr } => {
                    self.eval(frame, expr).await?;
                    Ok(Flow::Normal)
                }

                Stmt::If {
                    test,
                    then_s,
                    else_s,
                } => {
                    if self.eval(frame, test).await?.is_truthy() {
                        self.exec_stmt(frame, then_s).await
                    } else if let Some(else_s) = else_s {
                        self.exec_stmt(frame, else_s).await
                    } else {
                        Ok(Flow::Normal)
                    }
                }

                Stmt::While { test, body } => {
                    loop {
                        self.ctx.stepper().ensure_live()?;
                        if !self.eval(frame, test).await?.is_truthy() {
                            break;
                        }
                        match self.exec_stmt(frame, body).await? {
                            Flow::Normal | Flow::Continue => {}
                            Flow::Break => break,
                            flow @ Flow::Return(_) => return Ok(flow),
                        }
                    }
                    Ok(Flow::Normal)
                }

                Stmt::For {
                    iterator,
                    iterable,
                    body,
                } => {
                    let items = match self.eval(frame, iterable).await? {
                        Val::List(items) => items,
                        Val::Str(s) => s.chars().map(|c| Val::Str(c.to_string())).collect(),
                        other => return Err(stdlib::not_iterable(&other)),
                    };
                    for item in items {
                        self.ctx.stepper().ensure_live()?;
                        match self.exec_with_binding(frame, iterator, item, body).await? {
                            Flow::Normal | Flow::Continue => {}
                            Flow::Break => break,
                            flow @ Flow::Return(_) => return Ok(flow),
                        }
                    }
                    Ok(Flow::Normal)
                }

                Stmt::Return { value } => {
                    let value = match value {
                        Some(expr) => self.eval(frame, expr).await?,
                        None => Val::Null,
                    };
                    Ok(Flow::Return(value))
                }

                Stmt::Break => Ok(Flow::Break),
                Stmt::Continue => Ok(Flow::Continue),

                Stmt::Throw { value } => {
                    let value = self.eval(frame, value).await?;
                    Err(Raise::Thrown(value))
                }

                Stmt::Try {
                    body,
                    catch_var,
                    handler,
                } => match self.exec_stmt(frame, body).await {
                    Err(Raise::Thrown(value)) => {
                        self.exec_with_binding(frame, catch_var, value, handler)
                            .await
                    }
                    other => other,
                },

                // Hoisted on scope entry
                Stmt::Function { .. } => Ok(Flow::Normal),

                Stmt::Step { delay } => {
                    let delay = match delay {
                        Some(expr) => {
                            let value = self.eval(frame, expr).await?;
                            delay_arg(Builtin::Step, Some(&value))?
                        }
                        None => None,
                    };
                    self.checkpoint(delay).await?;
                    Ok(Flow::Normal)
                }
            }
        })
    }
}
