//! Run options

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{Console, TracingConsole};
use crate::events::{Event, Handler};
use crate::interpreter::instrument::Granularity;
use crate::interpreter::Val;

/// Options for a single run
///
/// All fields are public; the builder methods are a shorthand.
#[derive(Clone)]
pub struct RunOptions {
    /// Bound to `start` before it is emitted
    pub on_start: Option<Handler>,
    pub on_step: Option<Handler>,
    pub on_end: Option<Handler>,
    /// Values injected into the program namespace
    pub context: HashMap<String, Val>,
    /// Lower `for..of` to the core dialect before running
    pub transform_to_baseline_dialect: bool,
    /// Destroy the bus and stepper once the run settles
    pub destroy_after_run: bool,
    /// Run the main body inside `run`, never suspending
    pub synchronous: bool,
    pub granularity: Granularity,
    /// Delay for steps that don't name one
    pub step_delay: Option<Duration>,
    pub console: Arc<dyn Console>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            on_start: None,
            on_step: None,
            on_end: None,
            context: HashMap::new(),
            transform_to_baseline_dialect: false,
            destroy_after_run: true,
            synchronous: false,
            granularity: Granularity::default(),
            step_delay: None,
            console: Arc::new(TracingConsole),
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(handler));
        self
    }

    pub fn on_step<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on_step = Some(Arc::new(handler));
        self
    }

    pub fn on_end<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(handler));
        self
    }

    pub fn with_context(mut self, context: HashMap<String, Val>) -> Self {
        self.context = context;
        self
    }

    /// Add a single namespace binding
    pub fn bind(mut self, name: impl Into<String>, value: Val) -> Self {
        self.context.insert(name.into(), value);
        self
    }

    pub fn transform_to_baseline_dialect(mut self, enabled: bool) -> Self {
        self.transform_to_baseline_dialect = enabled;
        self
    }

    pub fn destroy_after_run(mut self, enabled: bool) -> Self {
        self.destroy_after_run = enabled;
        self
    }

    pub fn synchronous(mut self, enabled: bool) -> Self {
        self.synchronous = enabled;
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn step_delay(mut self, delay: Option<Duration>) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("on_start", &self.on_start.is_some())
            .field("on_step", &self.on_step.is_some())
            .field("on_end", &self.on_end.is_some())
            .field("context", &self.context.keys().collect::<Vec<_>>())
            .field(
                "transform_to_baseline_dialect",
                &self.transform_to_baseline_dialect,
            )
            .field("destroy_after_run", &self.destroy_after_run)
            .field("synchronous", &self.synchronous)
            .field("granularity", &self.granularity)
            .field("step_delay", &self.step_delay)
            .finish()
    }
}
