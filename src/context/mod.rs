//! # Application Containers
//!
//! The orchestrator never builds bean graphs itself. It talks to a container
//! through the [`ApplicationContext`] contract and to its definition registry
//! through [`DefinitionRegistry`]. [`GenericContext`] is the in-memory
//! implementation used by default and in tests.
//!
//! This module also holds the other container-facing collaborators:
//! - [`ContextFactory`]: builds a container for an [`ApplicationKind`]
//! - [`ContextInitializer`]: plugins applied to the container before sources load
//! - [`DefinitionLoader`]: loads declared [`Source`]s into the registry

mod generic;
mod source;

pub use generic::GenericContext;
pub use source::{Configuration, DefinitionLoader, Source, SourceLoader};

use std::any::{type_name, Any};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::environment::Environment;
use crate::error::{BoxError, ContextError};
use crate::events::{ApplicationEvent, ApplicationListener};
use crate::exit::{ExitCodeExceptionMapper, ExitCodeGenerator};
use crate::plugin::Capability;
use crate::runner::{ApplicationRunner, CommandLineRunner, Runner};
use crate::startup::ApplicationStartup;

/// Marker present when a reactive web stack is available.
pub const REACTIVE_MARKER: &str = "reactive.web";
/// Marker present when the servlet dispatcher is available.
pub const SERVLET_DISPATCHER_MARKER: &str = "servlet.dispatcher";
/// Markers that must all be present for a servlet application.
pub const SERVLET_MARKERS: [&str; 2] = ["servlet", "servlet.web-context"];

/// The three kinds of application the orchestrator knows how to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ApplicationKind {
    /// No embedded web server.
    #[default]
    Standalone,
    Servlet,
    Reactive,
}

impl ApplicationKind {
    /// Deduces the kind from the capability markers available to the process.
    ///
    /// A reactive stack wins unless the servlet dispatcher is also present;
    /// a servlet application needs every servlet marker.
    pub fn deduce(markers: &[&str]) -> Self {
        let has = |marker: &str| markers.contains(&marker);
        if has(REACTIVE_MARKER) && !has(SERVLET_DISPATCHER_MARKER) {
            return ApplicationKind::Reactive;
        }
        if SERVLET_MARKERS.iter().all(|marker| has(marker)) {
            ApplicationKind::Servlet
        } else {
            ApplicationKind::Standalone
        }
    }
}

impl fmt::Display for ApplicationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplicationKind::Standalone => "standalone",
            ApplicationKind::Servlet => "servlet",
            ApplicationKind::Reactive => "reactive",
        })
    }
}

impl FromStr for ApplicationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standalone" | "none" => Ok(ApplicationKind::Standalone),
            "servlet" => Ok(ApplicationKind::Servlet),
            "reactive" => Ok(ApplicationKind::Reactive),
            other => Err(format!("unknown application kind '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for ApplicationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Shared handle to a container.
pub type SharedContext = Arc<dyn ApplicationContext>;

/// A named bean held by a container.
#[derive(Clone)]
pub enum Bean {
    Value(Arc<dyn Any + Send + Sync>),
    ApplicationRunner(Arc<dyn ApplicationRunner>),
    CommandLineRunner(Arc<dyn CommandLineRunner>),
    ExitCodeMapper(Arc<dyn ExitCodeExceptionMapper>),
    ExitCodeGenerator(Arc<dyn ExitCodeGenerator>),
}

impl Bean {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Bean::Value(Arc::new(value))
    }

    pub fn application_runner(runner: impl ApplicationRunner + 'static) -> Self {
        Bean::ApplicationRunner(Arc::new(runner))
    }

    pub fn command_line_runner(runner: impl CommandLineRunner + 'static) -> Self {
        Bean::CommandLineRunner(Arc::new(runner))
    }

    pub fn exit_code_mapper(mapper: impl ExitCodeExceptionMapper + 'static) -> Self {
        Bean::ExitCodeMapper(Arc::new(mapper))
    }

    pub fn exit_code_generator(generator: impl ExitCodeGenerator + 'static) -> Self {
        Bean::ExitCodeGenerator(Arc::new(generator))
    }

    pub(crate) fn as_runner(&self) -> Option<Runner> {
        match self {
            Bean::ApplicationRunner(runner) => Some(Runner::Application(runner.clone())),
            Bean::CommandLineRunner(runner) => Some(Runner::CommandLine(runner.clone())),
            _ => None,
        }
    }
}

impl fmt::Debug for Bean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bean::Value(_) => "Bean::Value",
            Bean::ApplicationRunner(_) => "Bean::ApplicationRunner",
            Bean::CommandLineRunner(_) => "Bean::CommandLineRunner",
            Bean::ExitCodeMapper(_) => "Bean::ExitCodeMapper",
            Bean::ExitCodeGenerator(_) => "Bean::ExitCodeGenerator",
        })
    }
}

/// Registry of bean definitions exposed by a container.
pub trait DefinitionRegistry: Send + Sync {
    fn register_bean(&self, name: &str, bean: Bean) -> Result<(), ContextError>;

    /// Records that a declared source was loaded.
    fn register_source(&self, name: &str);

    fn contains_bean(&self, name: &str) -> bool;

    fn bean_names(&self) -> Vec<String>;
}

/// The contract the orchestrator needs from a container.
///
/// Every method takes `&self`: containers are shared behind an `Arc` with the
/// shutdown coordinator and with the caller, so mutation goes through
/// interior locking.
pub trait ApplicationContext: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> ApplicationKind;

    fn set_environment(&self, environment: Environment);

    fn environment(&self) -> Option<Environment>;

    fn set_application_startup(&self, startup: Arc<dyn ApplicationStartup>);

    fn register_singleton(
        &self,
        name: &str,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Result<(), ContextError>;

    fn singleton(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>>;

    fn set_allow_definition_overriding(&self, allow: bool);

    fn set_lazy_initialization(&self, lazy: bool);

    /// The registry sources are loaded into, if the container exposes one.
    fn definition_registry(&self) -> Option<&dyn DefinitionRegistry>;

    fn add_application_listener(&self, listener: Arc<dyn ApplicationListener>);

    fn publish_event(&self, event: &ApplicationEvent) -> Result<(), BoxError>;

    fn refresh(&self) -> Result<(), BoxError>;

    /// True between a successful refresh and close.
    fn is_active(&self) -> bool;

    /// Closes the container. Closing twice is a no-op.
    fn close(&self) -> Result<(), BoxError>;

    /// Registers a callback run once the container is closed. Runs the
    /// callback immediately if the container is already closed.
    fn on_close(&self, callback: Box<dyn FnOnce() + Send>);

    /// Runner beans, in registration order.
    fn runners(&self) -> Vec<Runner>;

    fn exit_code_mappers(&self) -> Vec<Arc<dyn ExitCodeExceptionMapper>>;

    fn exit_code_generators(&self) -> Vec<Arc<dyn ExitCodeGenerator>>;
}

impl fmt::Debug for dyn ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

impl dyn ApplicationContext {
    /// Typed lookup of a singleton.
    pub fn bean<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.singleton(name)?.downcast::<T>().ok()
    }
}

/// Creates a fresh, unrefreshed container for an application kind.
pub trait ContextFactory: Send + Sync {
    fn create(&self, kind: ApplicationKind) -> Result<SharedContext, BoxError>;
}

impl<F> ContextFactory for F
where
    F: Fn(ApplicationKind) -> Result<SharedContext, BoxError> + Send + Sync,
{
    fn create(&self, kind: ApplicationKind) -> Result<SharedContext, BoxError> {
        self(kind)
    }
}

/// Builds a [`GenericContext`] for every kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContextFactory;

impl ContextFactory for DefaultContextFactory {
    fn create(&self, kind: ApplicationKind) -> Result<SharedContext, BoxError> {
        Ok(Arc::new(GenericContext::new(kind)))
    }
}

/// Callback applied to the container before any source is loaded.
pub trait ContextInitializer: Send + Sync {
    fn order(&self) -> Option<i32> {
        None
    }

    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// The container kind this initializer can work with. `None` accepts any.
    fn required_kind(&self) -> Option<ApplicationKind> {
        None
    }

    fn initialize(&self, context: &SharedContext) -> Result<(), BoxError>;
}

/// Catalog capability for [`ContextInitializer`]s.
pub struct ContextInitializers;

impl Capability for ContextInitializers {
    type Args = ();
    type Plugin = dyn ContextInitializer;
    const NAME: &'static str = "ContextInitializer";

    fn order_of(initializer: &dyn ContextInitializer) -> Option<i32> {
        initializer.order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduce_kind_from_markers() {
        assert_eq!(ApplicationKind::deduce(&[]), ApplicationKind::Standalone);
        assert_eq!(
            ApplicationKind::deduce(&[REACTIVE_MARKER]),
            ApplicationKind::Reactive
        );
        assert_eq!(
            ApplicationKind::deduce(&["servlet", "servlet.web-context"]),
            ApplicationKind::Servlet
        );
        assert_eq!(
            ApplicationKind::deduce(&[
                REACTIVE_MARKER,
                SERVLET_DISPATCHER_MARKER,
                "servlet",
                "servlet.web-context"
            ]),
            ApplicationKind::Servlet
        );
        assert_eq!(ApplicationKind::deduce(&["servlet"]), ApplicationKind::Standalone);
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("SERVLET".parse(), Ok(ApplicationKind::Servlet));
        assert_eq!("none".parse(), Ok(ApplicationKind::Standalone));
        assert!("grpc".parse::<ApplicationKind>().is_err());

        let kind: ApplicationKind = serde_json::from_str("\"Reactive\"").unwrap();
        assert_eq!(kind, ApplicationKind::Reactive);
    }
}
