//! Runners: beans invoked once the container is refreshed.

use std::sync::Arc;

use crate::arguments::ApplicationArguments;
use crate::error::BoxError;
use crate::plugin::precedence;

/// Runner that receives the parsed arguments.
pub trait ApplicationRunner: Send + Sync {
    fn order(&self) -> Option<i32> {
        None
    }

    fn run(&self, args: &ApplicationArguments) -> Result<(), BoxError>;
}

/// Runner that receives the raw arguments.
pub trait CommandLineRunner: Send + Sync {
    fn order(&self) -> Option<i32> {
        None
    }

    fn run(&self, args: &[String]) -> Result<(), BoxError>;
}

#[derive(Clone)]
pub enum Runner {
    Application(Arc<dyn ApplicationRunner>),
    CommandLine(Arc<dyn CommandLineRunner>),
}

impl Runner {
    pub fn order(&self) -> Option<i32> {
        match self {
            Runner::Application(runner) => runner.order(),
            Runner::CommandLine(runner) => runner.order(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Runner::Application(_) => "ApplicationRunner",
            Runner::CommandLine(_) => "CommandLineRunner",
        }
    }

    pub fn call(&self, args: &ApplicationArguments) -> Result<(), BoxError> {
        match self {
            Runner::Application(runner) => runner.run(args),
            Runner::CommandLine(runner) => runner.run(args.source_args()),
        }
    }

    /// Identity of the underlying instance: the same bean registered under
    /// two names yields the same identity.
    fn identity(&self) -> (&'static str, *const ()) {
        match self {
            Runner::Application(runner) => (self.kind(), Arc::as_ptr(runner) as *const ()),
            Runner::CommandLine(runner) => (self.kind(), Arc::as_ptr(runner) as *const ()),
        }
    }
}

/// Sorts runners by precedence (stable) and drops repeated instances.
pub fn ordered_runners(runners: Vec<Runner>) -> Vec<Runner> {
    let mut runners = runners;
    runners.sort_by_key(|runner| precedence(runner.order()));
    let mut seen = Vec::with_capacity(runners.len());
    runners.retain(|runner| {
        let identity = runner.identity();
        if seen.contains(&identity) {
            false
        } else {
            seen.push(identity);
            true
        }
    });
    runners
}
