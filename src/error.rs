//! # Launch Errors
//!
//! This module defines the error types used throughout the orchestrator. Plugin
//! code reports failures as a [`BoxError`]; the orchestrator wraps them in a
//! [`LaunchError`] naming the step that failed, and finally surfaces a
//! [`RunError`] to the caller together with the resolved exit code.
//!
//! The cause chain is always preserved (`#[source]`), which is what lets the
//! exit-code resolution walk down to a [`crate::exit::ExitStatusError`] buried
//! inside a runner failure.

use crate::context::ApplicationKind;
use crate::listener::LifecyclePhase;

/// Boxed error returned by plugins and external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to construct a declared plugin.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Cannot instantiate {capability} : {name}")]
    Instantiation {
        capability: &'static str,
        name: String,
        #[source]
        source: BoxError,
    },
}

/// Errors raised by the [`crate::bootstrap::BootstrapContext`].
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Type {0} has not been registered")]
    NotRegistered(&'static str),
    #[error("Type {0} is already registered")]
    AlreadyRegistered(&'static str),
    #[error("Bootstrap context is closed")]
    Closed,
    #[error("Failed to create instance of {type_name}")]
    Supplier {
        type_name: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("Bootstrap close listener failed")]
    CloseListener(#[source] BoxError),
}

/// Errors raised by containers.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Bean '{0}' is already defined and overriding is disabled")]
    DuplicateBean(String),
    #[error("Context has already been refreshed")]
    AlreadyRefreshed,
    #[error("Context is closed")]
    Closed,
}

/// Errors raised by the [`crate::shutdown::ShutdownCoordinator`].
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ShutdownError {
    #[error("Shutdown in progress")]
    InProgress,
}

/// Malformed command-line argument.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ArgumentError {
    #[error("Invalid argument syntax: {0}")]
    InvalidSyntax(String),
}

/// A failure in one of the run steps.
///
/// Each variant names the step that failed; the original cause is kept as the
/// error source.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("Bootstrap registry initializer failed")]
    BootstrapInitializer(#[source] BoxError),
    #[error(transparent)]
    Arguments(#[from] ArgumentError),
    #[error("Run listener failed during {phase}")]
    Listener {
        phase: LifecyclePhase,
        #[source]
        source: BoxError,
    },
    #[error("Lifecycle phase {to} cannot follow {from:?}")]
    PhaseOrder {
        from: Option<LifecyclePhase>,
        to: LifecyclePhase,
    },
    #[error("Environment prefix cannot be set via properties")]
    EnvironmentPrefix,
    #[error("Cannot bind to application")]
    Binding(#[source] BoxError),
    #[error("Failed to print banner")]
    Banner(#[source] std::io::Error),
    #[error("Unable to create {kind} application context")]
    ContextCreation {
        kind: ApplicationKind,
        #[source]
        source: BoxError,
    },
    #[error("Context post-processing failed")]
    PostProcess(#[source] BoxError),
    #[error("Unable to call initializer {initializer}: requires a {required} context, found {actual}")]
    InitializerMismatch {
        initializer: String,
        required: ApplicationKind,
        actual: ApplicationKind,
    },
    #[error("Initializer {initializer} failed")]
    Initializer {
        initializer: String,
        #[source]
        source: BoxError,
    },
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("Sources must not be empty")]
    NoSources,
    #[error("Could not locate definition registry")]
    NoDefinitionRegistry,
    #[error("Failed to load sources")]
    Load(#[source] BoxError),
    #[error("Context refresh failed")]
    Refresh(#[source] BoxError),
    #[error("After-refresh hook failed")]
    AfterRefresh(#[source] BoxError),
    #[error("Failed to execute {runner}")]
    Runner {
        runner: &'static str,
        #[source]
        source: BoxError,
    },
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Who reported a run failure to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedBy {
    /// An exception reporter plugin claimed the failure.
    Reporter(String),
    /// No reporter claimed it; the failure was logged.
    Log,
}

/// Outcome of the failure path: the resolved exit code, who reported the
/// failure, and the failure itself.
#[derive(Debug, thiserror::Error)]
#[error("exit code {exit_code}")]
pub struct RunFailure {
    pub exit_code: i32,
    pub reported_by: ReportedBy,
    #[source]
    pub cause: LaunchError,
}

/// Fatal error returned by [`crate::Application::run`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A failure between bootstrap creation and runner invocation.
    #[error("Application run failed: {}", .0.cause)]
    Startup(#[source] RunFailure),
    /// A failure while dispatching the `running` phase, after startup succeeded.
    #[error("Application failed after startup: {}", .0.cause)]
    Running(#[source] RunFailure),
}

impl RunError {
    pub fn failure(&self) -> &RunFailure {
        match self {
            RunError::Startup(failure) | RunError::Running(failure) => failure,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.failure().exit_code
    }

    pub fn cause(&self) -> &LaunchError {
        &self.failure().cause
    }

    pub fn reported_by(&self) -> &ReportedBy {
        &self.failure().reported_by
    }
}
