//! # Plugin Catalog
//!
//! The catalog is the explicit replacement for a process-wide factory
//! declaration file. Each *capability* (run listeners, exception reporters,
//! bootstrap initializers, ...) maps to an ordered list of named factories.
//!
//! Asking the catalog for a capability constructs a **fresh** instance from
//! every declared factory, then sorts the instances by precedence:
//!
//! - ranked plugins (`order() == Some(n)`) first, lowest rank first;
//! - unranked plugins after all ranked ones;
//! - ties keep declaration order (the sort is stable).
//!
//! A factory failure aborts the whole lookup; partial plugin sets are never
//! returned.
//!
//! ```rust
//! use liftoff::listener::{RunListener, RunListeners};
//! use liftoff::plugin::PluginCatalog;
//!
//! struct Quiet;
//! impl RunListener for Quiet {}
//!
//! let mut catalog = PluginCatalog::new();
//! catalog.run_listener("quiet", |_args| Ok(Quiet));
//! assert_eq!(catalog.names::<RunListeners>(), vec!["quiet"]);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::bootstrap::{BootstrapInitializers, BootstrapRegistryInitializer};
use crate::context::{ContextInitializer, ContextInitializers};
use crate::error::{BoxError, PluginError};
use crate::events::{ApplicationListener, ApplicationListeners, EventPublishingRunListener};
use crate::listener::{ListenerArgs, RunListener, RunListeners};
use crate::report::{ExceptionReporter, ExceptionReporters, ReporterArgs};

/// A kind of extension point that the catalog can populate.
///
/// Implemented by zero-sized marker types; the associated types describe what
/// factories receive and what they build.
pub trait Capability: 'static {
    /// Arguments handed to every factory of this capability.
    type Args: 'static;

    /// The plugin trait object produced by factories.
    type Plugin: ?Sized + 'static;

    /// Human readable capability name, used in error messages.
    const NAME: &'static str;

    /// Precedence rank of a constructed plugin.
    fn order_of(plugin: &Self::Plugin) -> Option<i32>;
}

type Factory<C> = Arc<
    dyn Fn(&<C as Capability>::Args) -> Result<Box<<C as Capability>::Plugin>, BoxError>
        + Send
        + Sync,
>;

struct Declaration<C: Capability> {
    name: String,
    factory: Factory<C>,
}

/// Sort key implementing "ranked first, lowest rank first, unranked last".
pub fn precedence(order: Option<i32>) -> (bool, i32) {
    (order.is_none(), order.unwrap_or_default())
}

/// Name-keyed registration table of plugin factories, grouped by capability.
///
/// The catalog is read-only once handed to an [`crate::Application`] and may be
/// shared between concurrent runs behind an `Arc`.
#[derive(Default)]
pub struct PluginCatalog {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl PluginCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the default declarations: the
    /// [`EventPublishingRunListener`] that forwards lifecycle phases to
    /// application listeners.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.run_listener("event-publishing", |args: &ListenerArgs| {
            Ok(EventPublishingRunListener::new(args.listeners.clone()))
        });
        catalog
    }

    /// Declares a factory under capability `C`.
    ///
    /// Names are unique per capability: declaring an existing name again is
    /// ignored, and the first declaration keeps its position.
    pub fn declare<C, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        C: Capability,
        F: Fn(&C::Args) -> Result<Box<C::Plugin>, BoxError> + Send + Sync + 'static,
    {
        let name = name.into();
        let declarations = self
            .entries
            .entry(TypeId::of::<C>())
            .or_insert_with(|| Box::new(Vec::<Declaration<C>>::new()))
            .downcast_mut::<Vec<Declaration<C>>>();
        if let Some(declarations) = declarations {
            if declarations.iter().any(|d| d.name == name) {
                debug!(capability = C::NAME, %name, "Duplicate declaration ignored");
            } else {
                declarations.push(Declaration {
                    name,
                    factory: Arc::new(factory),
                });
            }
        }
        self
    }

    /// Declared implementation names for capability `C`, in declaration order.
    pub fn names<C: Capability>(&self) -> Vec<&str> {
        self.declarations::<C>()
            .map(|declarations| declarations.iter().map(|d| d.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Constructs one instance per declaration of `C` and sorts them by precedence.
    pub fn instantiate<C: Capability>(
        &self,
        args: &C::Args,
    ) -> Result<Vec<Box<C::Plugin>>, PluginError> {
        let Some(declarations) = self.declarations::<C>() else {
            return Ok(Vec::new());
        };

        let mut instances = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            let instance =
                (declaration.factory)(args).map_err(|source| PluginError::Instantiation {
                    capability: C::NAME,
                    name: declaration.name.clone(),
                    source,
                })?;
            instances.push(instance);
        }
        instances.sort_by_key(|instance| precedence(C::order_of(&**instance)));
        debug!(capability = C::NAME, count = instances.len(), "Plugins instantiated");
        Ok(instances)
    }

    fn declarations<C: Capability>(&self) -> Option<&Vec<Declaration<C>>> {
        self.entries
            .get(&TypeId::of::<C>())
            .and_then(|entry| entry.downcast_ref::<Vec<Declaration<C>>>())
    }

    // --- Typed declaration helpers ---

    /// Declares a [`RunListener`] factory.
    pub fn run_listener<L, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        L: RunListener + 'static,
        F: Fn(&ListenerArgs) -> Result<L, BoxError> + Send + Sync + 'static,
    {
        self.declare::<RunListeners, _>(name, move |args| {
            factory(args).map(|listener| Box::new(listener) as Box<dyn RunListener>)
        })
    }

    /// Declares an [`ExceptionReporter`] factory.
    pub fn exception_reporter<R, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        R: ExceptionReporter + 'static,
        F: Fn(&ReporterArgs) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        self.declare::<ExceptionReporters, _>(name, move |args| {
            factory(args).map(|reporter| Box::new(reporter) as Box<dyn ExceptionReporter>)
        })
    }

    /// Declares a [`BootstrapRegistryInitializer`] factory.
    pub fn bootstrap_initializer<I, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        I: BootstrapRegistryInitializer + 'static,
        F: Fn() -> Result<I, BoxError> + Send + Sync + 'static,
    {
        self.declare::<BootstrapInitializers, _>(name, move |_: &()| {
            factory().map(|initializer| Box::new(initializer) as Box<dyn BootstrapRegistryInitializer>)
        })
    }

    /// Declares a [`ContextInitializer`] factory.
    pub fn context_initializer<I, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        I: ContextInitializer + 'static,
        F: Fn() -> Result<I, BoxError> + Send + Sync + 'static,
    {
        self.declare::<ContextInitializers, _>(name, move |_: &()| {
            factory().map(|initializer| Box::new(initializer) as Box<dyn ContextInitializer>)
        })
    }

    /// Declares an [`ApplicationListener`] factory.
    pub fn application_listener<L, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        L: ApplicationListener + 'static,
        F: Fn() -> Result<L, BoxError> + Send + Sync + 'static,
    {
        self.declare::<ApplicationListeners, _>(name, move |_: &()| {
            factory().map(|listener| Box::new(listener) as Box<dyn ApplicationListener>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn label(&self) -> &str;
        fn rank(&self) -> Option<i32>;
    }

    struct Plain(&'static str, Option<i32>);

    impl Named for Plain {
        fn label(&self) -> &str {
            self.0
        }
        fn rank(&self) -> Option<i32> {
            self.1
        }
    }

    struct Labels;

    impl Capability for Labels {
        type Args = ();
        type Plugin = dyn Named;
        const NAME: &'static str = "Labels";

        fn order_of(plugin: &dyn Named) -> Option<i32> {
            plugin.rank()
        }
    }

    fn declare(catalog: &mut PluginCatalog, label: &'static str, rank: Option<i32>) {
        catalog.declare::<Labels, _>(label, move |_| Ok(Box::new(Plain(label, rank)) as Box<dyn Named>));
    }

    fn labels(catalog: &PluginCatalog) -> Vec<String> {
        catalog
            .instantiate::<Labels>(&())
            .unwrap()
            .iter()
            .map(|p| p.label().to_string())
            .collect()
    }

    #[test]
    fn ranked_plugins_sort_before_unranked_and_ties_keep_declaration_order() {
        let mut catalog = PluginCatalog::new();
        declare(&mut catalog, "unranked-a", None);
        declare(&mut catalog, "late", Some(10));
        declare(&mut catalog, "early", Some(-5));
        declare(&mut catalog, "unranked-b", None);
        declare(&mut catalog, "late-twin", Some(10));

        assert_eq!(
            labels(&catalog),
            vec!["early", "late", "late-twin", "unranked-a", "unranked-b"]
        );
    }

    #[test]
    fn lookup_is_deterministic() {
        let mut catalog = PluginCatalog::new();
        for (i, label) in ["a", "b", "c", "d"].into_iter().enumerate() {
            declare(&mut catalog, label, if i % 2 == 0 { None } else { Some(1) });
        }
        assert_eq!(labels(&catalog), labels(&catalog));
    }

    #[test]
    fn duplicate_names_keep_first_declaration() {
        let mut catalog = PluginCatalog::new();
        declare(&mut catalog, "same", Some(1));
        catalog.declare::<Labels, _>("same", |_| Ok(Box::new(Plain("other", None)) as Box<dyn Named>));
        assert_eq!(catalog.names::<Labels>(), vec!["same"]);
        assert_eq!(labels(&catalog), vec!["same"]);
    }

    #[test]
    fn construction_failure_is_wrapped_with_name() {
        let mut catalog = PluginCatalog::new();
        declare(&mut catalog, "fine", None);
        catalog.declare::<Labels, _>("broken", |_| Err("no dice".into()));

        let err = catalog.instantiate::<Labels>(&()).err().unwrap();
        assert_eq!(err.to_string(), "Cannot instantiate Labels : broken");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "no dice");
    }

    #[test]
    fn unknown_capability_yields_nothing() {
        let catalog = PluginCatalog::new();
        assert!(catalog.instantiate::<Labels>(&()).unwrap().is_empty());
        assert!(catalog.names::<Labels>().is_empty());
    }
}
