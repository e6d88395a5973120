pub mod cli;
pub mod config;
pub mod context;
pub mod controller;
pub mod errors;
pub mod events;
pub mod interpreter;
pub mod stepper;
pub mod tracker;

// Re-export the run API
pub use context::{BufferConsole, Console, ExecutionContext, StdoutConsole, TracingConsole};
pub use controller::{load, run, ExecutionController, LoadError, RunOptions, RunState};
pub use errors::{adapt_error, ExecutionError, RunError};
pub use events::{Event, EventBus, ListenerId, StepInfo, Subscription, Topic};
pub use interpreter::instrument::Granularity;
pub use interpreter::Val;
pub use stepper::{StepError, Stepper, StepperState};
pub use tracker::ActiveOperationTracker;
