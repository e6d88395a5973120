//! Step-point instrumentation
//!
//! Rewrites a parsed program so that execution passes through `Stmt::Step`
//! checkpoints. The executor suspends at each checkpoint according to the
//! run's pacing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::ast::{Expr, FunctionDef, Program, Stmt};

/// Where implicit checkpoints are placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Only the program's own `step(...)` calls
    Explicit,
    /// Loop iteration heads and function entries
    #[default]
    Boundaries,
    /// Boundaries plus one checkpoint ahead of every statement
    Statements,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Explicit => "explicit",
            Granularity::Boundaries => "boundaries",
            Granularity::Statements => "statements",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "explicit" => Ok(Granularity::Explicit),
            "boundaries" => Ok(Granularity::Boundaries),
            "statements" => Ok(Granularity::Statements),
            other => Err(format!(
                "Unknown granularity '{}' (expected explicit, boundaries or statements)",
                other
            )),
        }
    }
}

/// Insert checkpoints into `program`
pub fn instrument(program: Program, granularity: Granularity) -> Program {
    Program {
        body: block(program.body, granularity),
    }
}

/// Static number of checkpoints in the program text
pub fn count_step_points(program: &Program) -> usize {
    program.body.iter().map(count_stmt).sum()
}

/// An expression statement that is a direct `step()`/`step(ms)` call
fn as_explicit_step(stmt: &Stmt) -> Option<Option<Expr>> {
    let Stmt::Expr {
        expr: Expr::Call { callee, args },
    } = stmt
    else {
        return None;
    };
    match (callee.as_ref(), args.as_slice()) {
        (Expr::Ident { name }, []) if name == "step" => Some(None),
        (Expr::Ident { name }, [delay]) if name == "step" => Some(Some(delay.clone())),
        _ => None,
    }
}

fn block(body: Vec<Stmt>, granularity: Granularity) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(body.len());
    for stmt in body {
        let stmt = match as_explicit_step(&stmt) {
            Some(delay) => Stmt::Step { delay },
            None => statement(stmt, granularity),
        };

        let executable = !stmt.is_step() && !matches!(stmt, Stmt::Function { .. });
        let after_step = out.last().is_some_and(Stmt::is_step);
        if granularity == Granularity::Statements && executable && !after_step {
            out.push(Stmt::Step { delay: None });
        }
        out.push(stmt);
    }
    out
}

/// Loop and function bodies lead with a checkpoint
fn with_boundary(mut body: Vec<Stmt>, granularity: Granularity) -> Vec<Stmt> {
    if granularity != Granularity::Explicit && !body.first().is_some_and(Stmt::is_step) {
        body.insert(0, Stmt::Step { delay: None });
    }
    body
}

fn loop_body(body: Stmt, granularity: Granularity) -> Box<Stmt> {
    let body = match body {
        Stmt::Block { body } => body,
        other => vec![other],
    };
    Box::new(Stmt::Block {
        body: with_boundary(block(body, granularity), granularity),
    })
}

fn function(def: FunctionDef, granularity: Granularity) -> FunctionDef {
    FunctionDef {
        name: def.name,
        params: def.params,
        body: with_boundary(block(def.body, granularity), granularity),
    }
}

fn statement(stmt: Stmt, granularity: Granularity) -> Stmt {
    let nested = |s: Box<Stmt>| Box::new(statement(*s, granularity));
    match stmt {
        Stmt::Block { body } => Stmt::Block {
            body: block(body, granularity),
        },
        Stmt::Let { name, init } => Stmt::Let {
            name,
            init: init.map(|e| expr(e, granularity)),
        },
        Stmt::Assign { name, expr: e } => Stmt::Assign {
            name,
            expr: expr(e, granularity),
        },
        Stmt::Expr { expr: e } => Stmt::Expr {
            expr: expr(e, granularity),
        },
        Stmt::If {
            test,
            then_s,
            else_s,
        } => Stmt::If {
            test: expr(test, granularity),
            then_s: nested(then_s),
            else_s: else_s.map(nested),
        },
        Stmt::While { test, body } => Stmt::While {
            test: expr(test, granularity),
            body: loop_body(*body, granularity),
        },
        Stmt::For {
            iterator,
            iterable,
            body,
        } => Stmt::For {
            iterator,
            iterable: expr(iterable, granularity),
            body: loop_body(*body, granularity),
        },
        Stmt::Return { value } => Stmt::Return {
            value: value.map(|e| expr(e, granularity)),
        },
        Stmt::Throw { value } => Stmt::Throw {
            value: expr(value, granularity),
        },
        Stmt::Try {
            body,
            catch_var,
            handler,
        } => Stmt::Try {
            body: nested(body),
            catch_var,
            handler: nested(handler),
        },
        Stmt::Function { def } => Stmt::Function {
            def: function(def, granularity),
        },
        other @ (Stmt::Break | Stmt::Continue | Stmt::Step { .. }) => other,
    }
}

/// Function expressions can sit anywhere inside an expression
fn expr(e: Expr, granularity: Granularity) -> Expr {
    let sub = |e: Box<Expr>| Box::new(expr(*e, granularity));
    match e {
        Expr::Function { def } => Expr::Function {
            def: function(def, granularity),
        },
        Expr::List { items } => Expr::List {
            items: items.into_iter().map(|i| expr(i, granularity)).collect(),
        },
        Expr::Obj { fields } => Expr::Obj {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, expr(v, granularity)))
                .collect(),
        },
        Expr::Member { object, property } => Expr::Member {
            object: sub(object),
            property,
        },
        Expr::Index { object, index } => Expr::Index {
            object: sub(object),
            index: sub(index),
        },
        Expr::Call { callee, args } => Expr::Call {
            callee: sub(callee),
            args: args.into_iter().map(|a| expr(a, granularity)).collect(),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: sub(operand),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: sub(left),
            right: sub(right),
        },
        leaf => leaf,
    }
}

fn count_stmt(stmt: &Stmt) -> usize {
    match stmt {
        Stmt::Step { .. } => 1,
        Stmt::Block { body } => body.iter().map(count_stmt).sum(),
        Stmt::Let { init, .. } => init.as_ref().map_or(0, count_expr),
        Stmt::Assign { expr, .. } | Stmt::Expr { expr } => count_expr(expr),
        Stmt::If {
            test,
            then_s,
            else_s,
        } => count_expr(test) + count_stmt(then_s) + else_s.as_deref().map_or(0, count_stmt),
        Stmt::While { test, body } => count_expr(test) + count_stmt(body),
        Stmt::For { iterable, body, .. } => count_expr(iterable) + count_stmt(body),
        Stmt::Return { value } => value.as_ref().map_or(0, count_expr),
        Stmt::Throw { value } => count_expr(value),
        Stmt::Try { body, handler, .. } => count_stmt(body) + count_stmt(handler),
        Stmt::Function { def } => def.body.iter().map(count_stmt).sum(),
        Stmt::Break | Stmt::Continue => 0,
    }
}

fn count_expr(e: &Expr) -> usize {
    match e {
        Expr::Function { def } => def.body.iter().map(count_stmt).sum(),
        Expr::List { items } => items.iter().map(count_expr).sum(),
        Expr::Obj { fields } => fields.iter().map(|(_, v)| count_expr(v)).sum(),
        Expr::Member { object, .. } => count_expr(object),
        Expr::Index { object, index } => count_expr(object) + count_expr(index),
        Expr::Call { callee, args } => count_expr(callee) + args.iter().map(count_expr).sum::<usize>(),
        Expr::Unary { operand, .. } => count_expr(operand),
        Expr::Binary { left, right, .. } => count_expr(left) + count_expr(right),
        _ => 0,
    }
}
