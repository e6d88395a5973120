//! Baseline dialect lowering
//!
//! Rewrites `for (let x of e) { .. }` into `let`/`while`/indexing so the
//! program only uses the core dialect:
//!
//! ```text
//! {
//!     let __iter_0 = e
//!     let __idx_0 = 0
//!     while (__idx_0 < __len(__iter_0)) {
//!         step()                     // leading checkpoints stay first
//!         let x = __iter_0[__idx_0]
//!         __idx_0 = __idx_0 + 1
//!         ..
//!     }
//! }
//! ```
//!
//! The index advances before the original body runs so `continue` still
//! moves to the next element.

use super::types::ast::{BinaryOp, Expr, FunctionDef, Program, Stmt};

/// Builtin used by lowered loops for the iterable's length
pub const ITER_LEN: &str = "__len";

/// Lower a program to the baseline dialect
pub fn to_baseline(program: Program) -> Program {
    let mut lowerer = Lowerer::default();
    Program {
        body: lowerer.block(program.body),
    }
}

#[derive(Default)]
struct Lowerer {
    next_loop: usize,
}

impl Lowerer {
    fn block(&mut self, body: Vec<Stmt>) -> Vec<Stmt> {
        body.into_iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn boxed(&mut self, stmt: Box<Stmt>) -> Box<Stmt> {
        Box::new(self.stmt(*stmt))
    }

    fn stmt(&mut self, stmt: Stmt) -> Stmt {
        match stmt {
            Stmt::For {
                iterator,
                iterable,
                body,
            } => self.for_of(iterator, iterable, *body),
            Stmt::Block { body } => Stmt::Block {
                body: self.block(body),
            },
            Stmt::Let { name, init } => Stmt::Let {
                name,
                init: init.map(|e| self.expr(e)),
            },
            Stmt::Assign { name, expr } => Stmt::Assign {
                name,
                expr: self.expr(expr),
            },
            Stmt::Expr { expr } => Stmt::Expr {
                expr: self.expr(expr),
            },
            Stmt::If {
                test,
                then_s,
                else_s,
            } => Stmt::If {
                test: self.expr(test),
                then_s: self.boxed(then_s),
                else_s: else_s.map(|s| self.boxed(s)),
            },
            Stmt::While { test, body } => Stmt::While {
                test: self.expr(test),
                body: self.boxed(body),
            },
            Stmt::Return { value } => Stmt::Return {
                value: value.map(|e| self.expr(e)),
            },
            Stmt::Throw { value } => Stmt::Throw {
                value: self.expr(value),
            },
            Stmt::Try {
                body,
                catch_var,
                handler,
            } => Stmt::Try {
                body: self.boxed(body),
                catch_var,
                handler: self.boxed(handler),
            },
            Stmt::Function { def } => Stmt::Function {
                def: self.function(def),
            },
            Stmt::Step { delay } => Stmt::Step {
                delay: delay.map(|e| self.expr(e)),
            },
            other @ (Stmt::Break | Stmt::Continue) => other,
        }
    }

    fn for_of(&mut self, iterator: String, iterable: Expr, body: Stmt) -> Stmt {
        let n = self.next_loop;
        self.next_loop += 1;
        let iter_var = format!("__iter_{}", n);
        let idx_var = format!("__idx_{}", n);

        let body = match self.stmt(body) {
            Stmt::Block { body } => body,
            other => vec![other],
        };
        let split = body.iter().take_while(|s| s.is_step()).count();
        let mut body = body.into_iter();
        let mut lowered: Vec<Stmt> = body.by_ref().take(split).collect();

        lowered.push(Stmt::Let {
            name: iterator,
            init: Some(Expr::Index {
                object: Box::new(Expr::ident(&iter_var)),
                index: Box::new(Expr::ident(&idx_var)),
            }),
        });
        lowered.push(Stmt::Assign {
            name: idx_var.clone(),
            expr: Expr::binary(BinaryOp::Add, Expr::ident(&idx_var), Expr::LitNum { v: 1.0 }),
        });
        lowered.extend(body);

        let test = Expr::binary(
            BinaryOp::Lt,
            Expr::ident(&idx_var),
            Expr::call(Expr::ident(ITER_LEN), vec![Expr::ident(&iter_var)]),
        );

        Stmt::Block {
            body: vec![
                Stmt::Let {
                    name: iter_var,
                    init: Some(self.expr(iterable)),
                },
                Stmt::Let {
                    name: idx_var,
                    init: Some(Expr::LitNum { v: 0.0 }),
                },
                Stmt::While {
                    test,
                    body: Box::new(Stmt::Block { body: lowered }),
                },
            ],
        }
    }

    fn function(&mut self, def: FunctionDef) -> FunctionDef {
        FunctionDef {
            name: def.name,
            params: def.params,
            body: self.block(def.body),
        }
    }

    fn expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Function { def } => Expr::Function {
                def: self.function(def),
            },
            Expr::List { items } => Expr::List {
                items: items.into_iter().map(|e| self.expr(e)).collect(),
            },
            Expr::Obj { fields } => Expr::Obj {
                fields: fields.into_iter().map(|(k, v)| (k, self.expr(v))).collect(),
            },
            Expr::Member { object, property } => Expr::Member {
                object: Box::new(self.expr(*object)),
                property,
            },
            Expr::Index { object, index } => Expr::Index {
                object: Box::new(self.expr(*object)),
                index: Box::new(self.expr(*index)),
            },
            Expr::Call { callee, args } => Expr::Call {
                callee: Box::new(self.expr(*callee)),
                args: args.into_iter().map(|e| self.expr(e)).collect(),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(self.expr(*operand)),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.expr(*left)),
                right: Box::new(self.expr(*right)),
            },
            leaf => leaf,
        }
    }
}
