//! Variable scopes of one call

use std::collections::HashMap;

use crate::context::ExecutionContext;
use crate::interpreter::errors::{self, ExecResult, Raise};
use crate::interpreter::Val;

/// Lexical scopes of the running function, innermost last
///
/// The main body starts with no scopes at all: its top-level declarations
/// become the run's globals.
#[derive(Debug, Default)]
pub struct Frame {
    scopes: Vec<HashMap<String, Val>>,
}

impl Frame {
    pub fn main() -> Self {
        Self::default()
    }

    /// Frame for a function call with its parameters bound
    pub fn function(params: &[String], args: Vec<Val>) -> Self {
        let scope = params.iter().cloned().zip(args).collect();
        Self {
            scopes: vec![scope],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn lookup(&self, name: &str) -> Option<&Val> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// `let`: bind in the innermost scope, or as a global at top level
    pub fn declare(&mut self, ctx: &ExecutionContext, name: &str, value: Val) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_string(), value);
            }
            None => ctx.set_global(name, value),
        }
    }

    /// Assignment to an existing binding
    ///
    /// A name that only exists in the user context gets a global that
    /// shadows it.
    pub fn assign(&mut self, ctx: &ExecutionContext, name: &str, value: Val) -> ExecResult<()> {
        if let Some(slot) = self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
        {
            *slot = value;
            return Ok(());
        }
        if ctx.has_global(name) || ctx.binding(name).is_some() {
            ctx.set_global(name, value);
            return Ok(());
        }
        Err(Raise::error(
            errors::REFERENCE_ERROR,
            format!("Cannot assign to undeclared variable '{}'", name),
        ))
    }
}
