//! Type definitions for the interpreter
//!
//! - AST nodes (Program, Stmt, Expr)
//! - Runtime values (Val)

pub mod ast;
pub mod values;

pub use ast::{BinaryOp, Expr, FunctionDef, Program, Stmt, UnaryOp};
pub use values::Val;
