//! Runtime error values and raise propagation

use serde::{Deserialize, Serialize};

use super::types::Val;
use crate::stepper::StepError;

pub const REFERENCE_ERROR: &str = "ReferenceError";
pub const TYPE_ERROR: &str = "TypeError";
pub const PROPERTY_NOT_FOUND: &str = "PropertyNotFound";
pub const INDEX_OUT_OF_RANGE: &str = "IndexOutOfRange";
pub const WRONG_ARG_COUNT: &str = "WrongArgCount";
pub const WRONG_ARG_TYPE: &str = "WrongArgType";
pub const NOT_CALLABLE: &str = "NotCallable";
pub const SUSPENDED_IN_SYNC: &str = "SuspendedInSynchronousRun";
pub const NO_RUNTIME: &str = "NoRuntime";
pub const STACK_OVERFLOW: &str = "StackOverflow";
pub const TASK_PANICKED: &str = "TaskPanicked";

/// Structured runtime error raised by the interpreter itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Anything that unwinds the program
///
/// `Thrown` is catchable by `try`/`catch`; `Destroyed` is not, so a stop
/// always unwinds to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Raise {
    Thrown(Val),
    Destroyed,
}

impl Raise {
    /// Raise a structured runtime error
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Raise::Thrown(Val::Error(ErrorInfo::new(code, message)))
    }
}

impl From<StepError> for Raise {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Destroyed => Raise::Destroyed,
        }
    }
}

pub type ExecResult<T> = Result<T, Raise>;
