use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::DefinitionRegistry;
use crate::error::BoxError;

/// A component that contributes bean definitions.
pub trait Configuration: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, registry: &dyn DefinitionRegistry) -> Result<(), BoxError>;
}

/// A primary source declared on the application.
#[derive(Clone)]
pub enum Source {
    /// A configuration component given directly.
    Component(Arc<dyn Configuration>),
    /// A package name to scan.
    Package(String),
    /// A resource locator, e.g. `classpath:beans.json`.
    Resource(String),
}

impl Source {
    pub fn component(configuration: impl Configuration + 'static) -> Self {
        Source::Component(Arc::new(configuration))
    }

    /// Interprets a textual source, as found in the `liftoff.main.sources` property.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.contains(':') || text.contains('/') {
            Source::Resource(text.to_string())
        } else {
            Source::Package(text.to_string())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Source::Component(configuration) => configuration.name(),
            Source::Package(name) | Source::Resource(name) => name,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Component(c) => write!(f, "Component({})", c.name()),
            Source::Package(p) => write!(f, "Package({p})"),
            Source::Resource(r) => write!(f, "Resource({r})"),
        }
    }
}

/// Loads declared sources into a container's definition registry.
pub trait DefinitionLoader: Send + Sync {
    fn load(&self, registry: &dyn DefinitionRegistry, sources: &[Source]) -> Result<(), BoxError>;
}

/// Default loader.
///
/// Components register themselves. Packages resolve to the configurations
/// added with [`SourceLoader::with_package`]; resources resolve through
/// [`SourceLoader::with_resource`]. An unknown package contributes nothing; an
/// unknown resource is an error.
#[derive(Default, Clone)]
pub struct SourceLoader {
    packages: HashMap<String, Vec<Arc<dyn Configuration>>>,
    resources: HashMap<String, Arc<dyn Configuration>>,
}

impl SourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(
        mut self,
        package: impl Into<String>,
        configuration: impl Configuration + 'static,
    ) -> Self {
        self.packages
            .entry(package.into())
            .or_default()
            .push(Arc::new(configuration));
        self
    }

    pub fn with_resource(
        mut self,
        location: impl Into<String>,
        configuration: impl Configuration + 'static,
    ) -> Self {
        self.resources.insert(location.into(), Arc::new(configuration));
        self
    }
}

impl DefinitionLoader for SourceLoader {
    fn load(&self, registry: &dyn DefinitionRegistry, sources: &[Source]) -> Result<(), BoxError> {
        for source in sources {
            debug!(source = source.name(), "Loading source");
            match source {
                Source::Component(configuration) => configuration.register(registry)?,
                Source::Package(package) => {
                    for configuration in self.packages.get(package).into_iter().flatten() {
                        configuration.register(registry)?;
                    }
                }
                Source::Resource(location) => {
                    let configuration = self
                        .resources
                        .get(location)
                        .ok_or_else(|| format!("Cannot load resource '{location}'"))?;
                    configuration.register(registry)?;
                }
            }
            registry.register_source(source.name());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ApplicationKind, Bean, GenericContext};

    struct Greeting;

    impl Configuration for Greeting {
        fn name(&self) -> &str {
            "greeting"
        }

        fn register(&self, registry: &dyn DefinitionRegistry) -> Result<(), BoxError> {
            registry.register_bean("greeting", Bean::value("hello"))?;
            Ok(())
        }
    }

    #[test]
    fn parse_distinguishes_packages_and_resources() {
        assert!(matches!(Source::parse("app.web"), Source::Package(p) if p == "app.web"));
        assert!(matches!(Source::parse("classpath:beans.json"), Source::Resource(_)));
    }

    #[test]
    fn loads_components_packages_and_resources() {
        let context = GenericContext::new(ApplicationKind::Standalone);
        let loader = SourceLoader::new().with_package("app", Greeting);
        loader
            .load(&context, &[Source::Package("app".into()), Source::Package("empty".into())])
            .unwrap();
        assert!(context.contains_bean("greeting"));
        assert_eq!(context.loaded_sources(), vec!["app", "empty"]);

        let err = loader
            .load(&context, &[Source::Resource("classpath:missing.json".into())])
            .unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }
}
