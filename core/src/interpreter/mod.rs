//! Stepwise language
//!
//! - `parser`: source text to AST
//! - `semantic_validator`: rules the grammar can't express
//! - `instrument`: step-point insertion
//! - `lower`: baseline dialect lowering
//! - `executor`: async interpreter

pub mod errors;
pub mod executor;
pub mod instrument;
pub mod lower;
pub mod parser;
pub mod semantic_validator;
pub mod stdlib;
pub mod types;

pub use types::Val;
