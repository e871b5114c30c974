//! # Startup Measurement
//!
//! [`ApplicationStartup`] receives one [`StartupStep`] per lifecycle phase and
//! per container refresh. [`DefaultStartup`] discards them; [`BufferingStartup`]
//! keeps the name, tags and duration of every finished step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

pub trait ApplicationStartup: Send + Sync {
    fn start(&self, name: &str) -> Box<dyn StartupStep>;
}

pub trait StartupStep {
    fn tag(&mut self, key: &str, value: &str);

    fn end(self: Box<Self>);
}

/// Discards every step.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStartup;

struct NoopStep;

impl StartupStep for NoopStep {
    fn tag(&mut self, _: &str, _: &str) {}

    fn end(self: Box<Self>) {}
}

impl ApplicationStartup for DefaultStartup {
    fn start(&self, _: &str) -> Box<dyn StartupStep> {
        Box::new(NoopStep)
    }
}

/// A finished step.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStep {
    pub name: String,
    pub tags: Vec<(String, String)>,
    pub duration: Duration,
}

/// Records finished steps in memory, in completion order.
#[derive(Debug, Default, Clone)]
pub struct BufferingStartup {
    steps: Arc<Mutex<Vec<RecordedStep>>>,
}

impl BufferingStartup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> Vec<RecordedStep> {
        self.steps.lock().clone()
    }

    /// Returns the recorded steps and clears the buffer.
    pub fn drain(&self) -> Vec<RecordedStep> {
        std::mem::take(&mut *self.steps.lock())
    }
}

struct BufferedStep {
    sink: Arc<Mutex<Vec<RecordedStep>>>,
    name: String,
    tags: Vec<(String, String)>,
    started: Instant,
}

impl StartupStep for BufferedStep {
    fn tag(&mut self, key: &str, value: &str) {
        self.tags.push((key.to_string(), value.to_string()));
    }

    fn end(self: Box<Self>) {
        let step = *self;
        step.sink.lock().push(RecordedStep {
            name: step.name,
            tags: step.tags,
            duration: step.started.elapsed(),
        });
    }
}

impl ApplicationStartup for BufferingStartup {
    fn start(&self, name: &str) -> Box<dyn StartupStep> {
        Box::new(BufferedStep {
            sink: self.steps.clone(),
            name: name.to_string(),
            tags: Vec::new(),
            started: Instant::now(),
        })
    }
}

pub(crate) fn log_starting(application: &str) {
    info!(
        application,
        pid = std::process::id(),
        "Starting {application}"
    );
}

pub(crate) fn log_started(application: &str, time_taken: Duration) {
    info!(
        application,
        seconds = time_taken.as_secs_f64(),
        "Started {application} in {:.3} seconds",
        time_taken.as_secs_f64()
    );
}
