//! The greeting configuration and its runners.

use std::error::Error;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use liftoff::arguments::ApplicationArguments;
use liftoff::context::{Bean, Configuration, DefinitionRegistry};
use liftoff::error::BoxError;
use liftoff::runner::{ApplicationRunner, CommandLineRunner};

/// Exit code for a greeting that cannot be produced.
pub const GREETING_EXIT_CODE: i32 = 2;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GreetingError {
    #[error("Name must not be empty")]
    EmptyName,
}

/// Lines written by the runners, in order.
#[derive(Debug, Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<String>>>);

impl Transcript {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn push(&self, line: String) {
        self.0.lock().push(line);
    }
}

/// Greets the `--name` option (default `world`).
pub struct GreetingRunner {
    transcript: Transcript,
}

impl ApplicationRunner for GreetingRunner {
    fn order(&self) -> Option<i32> {
        Some(1)
    }

    fn run(&self, args: &ApplicationArguments) -> Result<(), BoxError> {
        let name = args
            .option_values("name")
            .and_then(|values| values.first())
            .map(String::as_str)
            .unwrap_or("world");
        if name.trim().is_empty() {
            return Err(GreetingError::EmptyName.into());
        }
        let salutation = args
            .option_values("salutation")
            .and_then(|values| values.first())
            .map(String::as_str)
            .unwrap_or("Hello");

        let line = format!("{salutation}, {name}!");
        info!(%line, "Greeting");
        self.transcript.push(line);
        Ok(())
    }
}

/// Records the non-option arguments.
pub struct EchoRunner {
    transcript: Transcript,
}

impl CommandLineRunner for EchoRunner {
    fn order(&self) -> Option<i32> {
        Some(2)
    }

    fn run(&self, args: &[String]) -> Result<(), BoxError> {
        let rest: Vec<&str> = args
            .iter()
            .map(String::as_str)
            .filter(|arg| !arg.starts_with("--"))
            .collect();
        if !rest.is_empty() {
            self.transcript.push(format!("args: {}", rest.join(" ")));
        }
        Ok(())
    }
}

/// Maps a [`GreetingError`] anywhere in the cause chain to [`GREETING_EXIT_CODE`].
pub fn greeting_exit_code(error: &(dyn Error + 'static)) -> i32 {
    if find_greeting_error(error).is_some() {
        GREETING_EXIT_CODE
    } else {
        0
    }
}

pub fn find_greeting_error<'a>(error: &'a (dyn Error + 'static)) -> Option<&'a GreetingError> {
    let mut current = Some(error);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<GreetingError>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

/// Contributes the runners and the exit-code mapper.
pub struct GreetingConfig {
    transcript: Transcript,
}

impl GreetingConfig {
    pub fn new(transcript: Transcript) -> Self {
        Self { transcript }
    }
}

impl Configuration for GreetingConfig {
    fn name(&self) -> &str {
        "greeting"
    }

    fn register(&self, registry: &dyn DefinitionRegistry) -> Result<(), BoxError> {
        registry.register_bean(
            "greetingRunner",
            Bean::application_runner(GreetingRunner {
                transcript: self.transcript.clone(),
            }),
        )?;
        registry.register_bean(
            "echoRunner",
            Bean::command_line_runner(EchoRunner {
                transcript: self.transcript.clone(),
            }),
        )?;
        registry.register_bean("greetingExitCodes", Bean::exit_code_mapper(greeting_exit_code))?;
        Ok(())
    }
}
