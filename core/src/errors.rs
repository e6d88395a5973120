//! Error adapter
//!
//! Programs can raise any value: a structured runtime error, a bare string,
//! a number, an object. `adapt_error` turns whatever was raised into one
//! `ExecutionError` record, and `RunError` classifies it for the run.

use std::fmt;
use thiserror::Error;

use crate::interpreter::errors::Raise;
use crate::interpreter::Val;

/// Normalized record of a raised value
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError {
    message: String,
    code: Option<String>,
    raw: Val,
}

impl ExecutionError {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Error code when the raised value carried one
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// The value exactly as the program raised it
    pub fn raw(&self) -> &Val {
        &self.raw
    }

    pub fn into_raw(self) -> Val {
        self.raw
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ExecutionError {}

/// Normalize an arbitrary raised value
pub fn adapt_error(raw: Val) -> ExecutionError {
    let (message, code) = match &raw {
        Val::Error(info) => (info.message.clone(), Some(info.code.clone())),
        Val::Str(s) => (s.clone(), None),
        Val::Obj(fields) => match fields.get("message") {
            Some(Val::Str(message)) => {
                let code = ["code", "name"].iter().find_map(|key| match fields.get(*key) {
                    Some(Val::Str(code)) => Some(code.clone()),
                    _ => None,
                });
                (message.clone(), code)
            }
            _ => (raw.to_string(), None),
        },
        other => (other.to_string(), None),
    };

    ExecutionError { message, code, raw }
}

/// Run-level error taxonomy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    /// The stepper or controller was torn down; a clean cancellation
    #[error("execution destroyed")]
    Destroyed,

    /// The program itself raised
    #[error("execution error: {0}")]
    Execution(ExecutionError),

    /// A tracked suboperation raised
    #[error("suboperation error: {0}")]
    Suboperation(ExecutionError),
}

impl RunError {
    /// Normalize an executor raise from the main body
    pub fn from_raised(raised: Raise) -> Self {
        match raised {
            Raise::Destroyed => RunError::Destroyed,
            Raise::Thrown(val) => RunError::Execution(adapt_error(val)),
        }
    }

    /// Normalize an executor raise from a suboperation
    pub fn from_suboperation(raised: Raise) -> Self {
        match raised {
            Raise::Destroyed => RunError::Destroyed,
            Raise::Thrown(val) => RunError::Suboperation(adapt_error(val)),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, RunError::Destroyed)
    }

    pub fn message(&self) -> &str {
        match self {
            RunError::Destroyed => "execution destroyed",
            RunError::Execution(err) | RunError::Suboperation(err) => err.message(),
        }
    }

    pub fn raw(&self) -> Option<&Val> {
        match self {
            RunError::Destroyed => None,
            RunError::Execution(err) | RunError::Suboperation(err) => Some(err.raw()),
        }
    }
}
