//! # Application Orchestrator
//!
//! [`Application`] describes what to start (primary sources plus settings)
//! and [`Application::run`] drives the start sequence:
//!
//! 1. create the [`BootstrapContext`] and apply bootstrap initializers
//! 2. set the process-wide headless flag (once per process)
//! 3. build the [`LifecycleBus`] and dispatch `starting`
//! 4. prepare the [`Environment`] (command-line and default properties,
//!    `environmentPrepared`, self-binding of `liftoff.main.*`, kind conversion)
//! 5. print the banner
//! 6. create the container through the [`ContextFactory`]
//! 7. prepare it: environment, post-processing, context initializers,
//!    `contextPrepared`, bootstrap close, singletons, source loading,
//!    `contextLoaded`
//! 8. register it with the [`ShutdownCoordinator`] and refresh it
//! 9. run the after-refresh hook, log the startup time, dispatch `started`
//! 10. call the runners found in the container
//! 11. dispatch `running`
//!
//! Any failure in steps 1 to 10 resolves an exit code, dispatches `failed`,
//! runs the exception reporters, closes the container and returns
//! [`RunError::Startup`]. A failure in step 11 goes through the same handling
//! without the listeners and returns [`RunError::Running`].
//!
//! ```rust
//! use std::sync::Arc;
//! use liftoff::context::{Configuration, DefinitionRegistry, Source};
//! use liftoff::error::BoxError;
//! use liftoff::{Application, PluginCatalog};
//!
//! struct Empty;
//!
//! impl Configuration for Empty {
//!     fn name(&self) -> &str {
//!         "empty"
//!     }
//!     fn register(&self, _: &dyn DefinitionRegistry) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! let mut app = Application::new(Arc::new(PluginCatalog::with_defaults()), [Source::component(Empty)]);
//! app.set_register_shutdown_hook(false).set_banner_mode(liftoff::banner::BannerMode::Off);
//! let context = app.run(["--greeting=hi"]).unwrap();
//! assert!(context.is_active());
//! ```

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, info_span, warn};

use crate::arguments::ApplicationArguments;
use crate::banner::{print_banner, Banner, BannerMode, PrintedBanner};
use crate::binder::{Binder, PropertyBinder, Settings, MAIN_PREFIX};
use crate::bootstrap::{BootstrapContext, BootstrapInitializers, BootstrapRegistryInitializer};
use crate::context::{
    ApplicationKind, ContextFactory, ContextInitializer, ContextInitializers, DefaultContextFactory,
    DefinitionLoader, SharedContext, Source, SourceLoader,
};
use crate::environment::{
    Environment, EnvironmentKind, PropertySource, COMMAND_LINE_ARGS, DEFAULT_PROPERTIES,
};
use crate::error::{BoxError, LaunchError, ReportedBy, RunError, RunFailure};
use crate::events::{ApplicationEvent, ApplicationListener, ApplicationListeners};
use crate::exit::resolve_exit_code;
use crate::listener::{LifecycleBus, ListenerArgs, RunListeners};
use crate::plugin::{precedence, PluginCatalog};
use crate::report::{ExceptionReporters, ReporterArgs};
use crate::runner::ordered_runners;
use crate::shutdown::ShutdownCoordinator;
use crate::startup::{log_started, log_starting, ApplicationStartup, DefaultStartup};

/// Name of the container singleton holding the [`ApplicationArguments`].
pub const ARGUMENTS_BEAN: &str = "applicationArguments";
/// Name of the container singleton holding the [`PrintedBanner`].
pub const BANNER_BEAN: &str = "applicationBanner";
/// Process variable that overrides the headless setting.
pub const HEADLESS_ENV: &str = "LIFTOFF_HEADLESS";
/// Property that may not be used to set the environment prefix.
pub const ENVIRONMENT_PREFIX_PROPERTY: &str = "liftoff.main.environment-prefix";

static HEADLESS: OnceCell<bool> = OnceCell::new();

/// The process-wide headless flag, once a run has set it.
pub fn headless() -> Option<bool> {
    HEADLESS.get().copied()
}

/// Extension points around container preparation. Both default to no-ops.
pub trait ApplicationHooks: Send + Sync {
    /// Runs after the environment is attached, before context initializers.
    fn post_process_context(&self, context: &SharedContext) -> Result<(), BoxError> {
        let _ = context;
        Ok(())
    }

    /// Runs after the container is refreshed, before `started`.
    fn after_refresh(&self, context: &SharedContext, args: &ApplicationArguments) -> Result<(), BoxError> {
        let _ = (context, args);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ApplicationHooks for NoHooks {}

/// Describes an application and runs it.
pub struct Application {
    name: String,
    main_source: Option<String>,
    primary_sources: Vec<Source>,
    settings: Settings,
    catalog: Arc<PluginCatalog>,
    markers: Vec<String>,
    banner: Option<Arc<dyn Banner>>,
    environment: Option<Environment>,
    environment_prefix: Option<String>,
    default_properties: BTreeMap<String, String>,
    additional_profiles: Vec<String>,
    bootstrap_initializers: Vec<Arc<dyn BootstrapRegistryInitializer>>,
    initializers: Vec<Arc<dyn ContextInitializer>>,
    listeners: Vec<Arc<dyn ApplicationListener>>,
    context_factory: Arc<dyn ContextFactory>,
    loader: Arc<dyn DefinitionLoader>,
    binder: Arc<dyn Binder>,
    startup: Arc<dyn ApplicationStartup>,
    hooks: Arc<dyn ApplicationHooks>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl Application {
    pub fn new(catalog: Arc<PluginCatalog>, sources: impl IntoIterator<Item = Source>) -> Self {
        Self {
            name: "application".to_string(),
            main_source: None,
            primary_sources: sources.into_iter().collect(),
            settings: Settings::default(),
            catalog,
            markers: Vec::new(),
            banner: None,
            environment: None,
            environment_prefix: None,
            default_properties: BTreeMap::new(),
            additional_profiles: Vec::new(),
            bootstrap_initializers: Vec::new(),
            initializers: Vec::new(),
            listeners: Vec::new(),
            context_factory: Arc::new(DefaultContextFactory),
            loader: Arc::new(SourceLoader::new()),
            binder: Arc::new(PropertyBinder),
            startup: Arc::new(DefaultStartup),
            hooks: Arc::new(NoHooks),
            shutdown: ShutdownCoordinator::shared(),
        }
    }

    // --- Configuration ---

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Identifier of the main source, used in logs and the banner.
    pub fn set_main_source(&mut self, main_source: impl Into<String>) -> &mut Self {
        self.main_source = Some(main_source.into());
        self
    }

    /// Capability markers used to deduce the application kind.
    pub fn set_markers<I, S>(&mut self, markers: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub fn set_application_kind(&mut self, kind: ApplicationKind) -> &mut Self {
        self.settings.web_application_type = Some(kind);
        self
    }

    pub fn set_banner_mode(&mut self, mode: BannerMode) -> &mut Self {
        self.settings.banner_mode = mode;
        self
    }

    pub fn set_banner(&mut self, banner: impl Banner + 'static) -> &mut Self {
        self.banner = Some(Arc::new(banner));
        self
    }

    pub fn set_headless(&mut self, headless: bool) -> &mut Self {
        self.settings.headless = headless;
        self
    }

    pub fn set_log_startup_info(&mut self, log: bool) -> &mut Self {
        self.settings.log_startup_info = log;
        self
    }

    pub fn set_register_shutdown_hook(&mut self, register: bool) -> &mut Self {
        self.settings.register_shutdown_hook = register;
        self
    }

    pub fn set_add_command_line_properties(&mut self, add: bool) -> &mut Self {
        self.settings.add_command_line_properties = add;
        self
    }

    pub fn set_allow_bean_definition_overriding(&mut self, allow: bool) -> &mut Self {
        self.settings.allow_bean_definition_overriding = allow;
        self
    }

    pub fn set_lazy_initialization(&mut self, lazy: bool) -> &mut Self {
        self.settings.lazy_initialization = lazy;
        self
    }

    /// Extra textual sources, added after the primary ones.
    pub fn set_sources<I, S>(&mut self, sources: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Uses `environment` as is. A caller-supplied environment is never
    /// converted to another kind.
    pub fn set_environment(&mut self, environment: Environment) -> &mut Self {
        self.environment = Some(environment);
        self
    }

    /// Prefix applied to process variables in the `systemEnvironment` source.
    pub fn set_environment_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.environment_prefix = Some(prefix.into());
        self
    }

    pub fn set_default_properties<I, K, V>(&mut self, properties: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.default_properties = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn set_additional_profiles<I, S>(&mut self, profiles: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_bootstrap_initializer(
        &mut self,
        initializer: impl BootstrapRegistryInitializer + 'static,
    ) -> &mut Self {
        self.bootstrap_initializers.push(Arc::new(initializer));
        self
    }

    pub fn add_initializer(&mut self, initializer: impl ContextInitializer + 'static) -> &mut Self {
        self.initializers.push(Arc::new(initializer));
        self
    }

    pub fn add_listener(&mut self, listener: impl ApplicationListener + 'static) -> &mut Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn set_context_factory(&mut self, factory: impl ContextFactory + 'static) -> &mut Self {
        self.context_factory = Arc::new(factory);
        self
    }

    pub fn set_definition_loader(&mut self, loader: impl DefinitionLoader + 'static) -> &mut Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn set_binder(&mut self, binder: impl Binder + 'static) -> &mut Self {
        self.binder = Arc::new(binder);
        self
    }

    pub fn set_application_startup(&mut self, startup: Arc<dyn ApplicationStartup>) -> &mut Self {
        self.startup = startup;
        self
    }

    pub fn set_hooks(&mut self, hooks: impl ApplicationHooks + 'static) -> &mut Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Coordinator containers are registered with. Defaults to
    /// [`ShutdownCoordinator::shared`].
    pub fn set_shutdown_coordinator(&mut self, coordinator: Arc<ShutdownCoordinator>) -> &mut Self {
        self.shutdown = coordinator;
        self
    }

    // --- Accessors ---

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The configured kind, or the kind deduced from the markers.
    pub fn application_kind(&self) -> ApplicationKind {
        self.settings.web_application_type.unwrap_or_else(|| {
            let markers: Vec<&str> = self.markers.iter().map(String::as_str).collect();
            ApplicationKind::deduce(&markers)
        })
    }

    /// Primary sources followed by the textual ones.
    pub fn all_sources(&self) -> Vec<Source> {
        let mut sources = self.primary_sources.clone();
        sources.extend(self.settings.sources.iter().map(|s| Source::parse(s)));
        sources
    }

    // --- Run ---

    /// Runs the application and returns the refreshed container.
    pub fn run<I, S>(&mut self, args: I) -> Result<SharedContext, RunError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let started = Instant::now();
        let args: Arc<[String]> = args.into_iter().map(Into::into).collect();
        let span = info_span!("run", application = %self.name);
        let _guard = span.enter();

        let bootstrap = match self.create_bootstrap_context() {
            Ok(bootstrap) => bootstrap,
            Err(cause) => return Err(RunError::Startup(self.handle_run_failure(None, None, cause))),
        };
        self.configure_headless();
        let mut bus = match self.lifecycle_bus(&args) {
            Ok(bus) => bus,
            Err(cause) => return Err(RunError::Startup(self.handle_run_failure(None, None, cause))),
        };

        let mut created = None;
        let context = match self.launch(&mut bus, &bootstrap, &args, started, &mut created) {
            Ok(context) => context,
            Err(cause) => {
                let failure = self.handle_run_failure(created.as_ref(), Some(&mut bus), cause);
                return Err(RunError::Startup(failure));
            }
        };

        if let Err(cause) = bus.running(&context, started.elapsed()) {
            return Err(RunError::Running(self.handle_run_failure(Some(&context), None, cause)));
        }
        Ok(context)
    }

    fn launch(
        &mut self,
        bus: &mut LifecycleBus,
        bootstrap: &BootstrapContext,
        args: &Arc<[String]>,
        started: Instant,
        created: &mut Option<SharedContext>,
    ) -> Result<SharedContext, LaunchError> {
        bus.starting(bootstrap, self.main_source.as_deref())?;
        let arguments = ApplicationArguments::parse(args.iter().cloned())?;
        let environment = self.prepare_environment(bus, bootstrap, &arguments)?;
        let banner = print_banner(
            self.settings.banner_mode,
            &environment,
            self.banner.as_ref(),
            self.main_source.as_deref(),
        )
        .map_err(LaunchError::Banner)?;

        let kind = self.application_kind();
        let context = self
            .context_factory
            .create(kind)
            .map_err(|source| LaunchError::ContextCreation { kind, source })?;
        *created = Some(context.clone());
        context.set_application_startup(self.startup.clone());

        self.prepare_context(bus, bootstrap, &context, environment, &arguments, banner)?;
        self.refresh_context(&context)?;
        self.hooks
            .after_refresh(&context, &arguments)
            .map_err(LaunchError::AfterRefresh)?;

        let time_taken = started.elapsed();
        if self.settings.log_startup_info {
            log_started(&self.name, time_taken);
        }
        bus.started(&context, time_taken)?;
        self.call_runners(&context, &arguments)?;
        Ok(context)
    }

    fn create_bootstrap_context(&self) -> Result<BootstrapContext, LaunchError> {
        let bootstrap = BootstrapContext::new();
        for initializer in &self.bootstrap_initializers {
            initializer
                .initialize(&bootstrap)
                .map_err(LaunchError::BootstrapInitializer)?;
        }
        for initializer in self.catalog.instantiate::<BootstrapInitializers>(&())? {
            initializer
                .initialize(&bootstrap)
                .map_err(LaunchError::BootstrapInitializer)?;
        }
        Ok(bootstrap)
    }

    fn configure_headless(&self) {
        let headless = *HEADLESS.get_or_init(|| {
            std::env::var(HEADLESS_ENV)
                .ok()
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(self.settings.headless)
        });
        debug!(headless, "Headless mode");
    }

    fn application_listeners(&self) -> Result<Vec<Arc<dyn ApplicationListener>>, LaunchError> {
        let mut listeners = self.listeners.clone();
        listeners.extend(
            self.catalog
                .instantiate::<ApplicationListeners>(&())?
                .into_iter()
                .map(Arc::<dyn ApplicationListener>::from),
        );
        listeners.sort_by_key(|listener| precedence(listener.order()));
        Ok(listeners)
    }

    fn lifecycle_bus(&self, args: &Arc<[String]>) -> Result<LifecycleBus, LaunchError> {
        let listener_args = ListenerArgs {
            application: self.name.clone(),
            args: args.clone(),
            listeners: self.application_listeners()?,
        };
        let listeners = self.catalog.instantiate::<RunListeners>(&listener_args)?;
        debug!(listeners = listeners.len(), "Run listeners ready");
        Ok(LifecycleBus::new(listeners, self.startup.clone()))
    }

    fn prepare_environment(
        &mut self,
        bus: &mut LifecycleBus,
        bootstrap: &BootstrapContext,
        arguments: &ApplicationArguments,
    ) -> Result<Environment, LaunchError> {
        let mut environment = self.get_or_create_environment();
        self.configure_environment(&mut environment, arguments);
        bus.environment_prepared(bootstrap, &mut environment)?;

        let sources = environment.property_sources_mut();
        if let Some(defaults) = sources.remove(DEFAULT_PROPERTIES) {
            sources.add_last(defaults);
        }
        if environment.contains_property(ENVIRONMENT_PREFIX_PROPERTY) {
            return Err(LaunchError::EnvironmentPrefix);
        }
        self.binder
            .bind(&environment, MAIN_PREFIX, &mut self.settings)
            .map_err(LaunchError::Binding)?;

        if self.environment.is_none() {
            environment = environment.convert(EnvironmentKind::for_application(self.application_kind()));
        }
        Ok(environment)
    }

    fn get_or_create_environment(&self) -> Environment {
        match &self.environment {
            Some(environment) => environment.clone(),
            None => Environment::standard(
                EnvironmentKind::for_application(self.application_kind()),
                self.environment_prefix.as_deref(),
            ),
        }
    }

    fn configure_environment(&self, environment: &mut Environment, arguments: &ApplicationArguments) {
        let sources = environment.property_sources_mut();
        if !self.default_properties.is_empty() {
            match sources.get(DEFAULT_PROPERTIES).cloned() {
                Some(mut existing) => {
                    for (key, value) in &self.default_properties {
                        existing.insert(key.as_str(), value.as_str());
                    }
                    sources.replace(DEFAULT_PROPERTIES, existing);
                }
                None => sources.add_last(PropertySource::new(
                    DEFAULT_PROPERTIES,
                    self.default_properties.clone(),
                )),
            }
        }

        if self.settings.add_command_line_properties && !arguments.source_args().is_empty() {
            let mut incoming = arguments.to_property_source();
            match sources.get(COMMAND_LINE_ARGS).cloned() {
                Some(existing) => {
                    for key in existing.keys() {
                        if let (false, Some(value)) = (incoming.contains(key), existing.get(key)) {
                            incoming.insert(key, value);
                        }
                    }
                    sources.replace(COMMAND_LINE_ARGS, incoming);
                }
                None => sources.add_first(incoming),
            }
        }

        if !self.additional_profiles.is_empty() {
            let mut profiles = self.additional_profiles.clone();
            for profile in environment.active_profiles() {
                if !profiles.contains(&profile) {
                    profiles.push(profile);
                }
            }
            environment.set_active_profiles(profiles);
        }
    }

    fn prepare_context(
        &self,
        bus: &mut LifecycleBus,
        bootstrap: &BootstrapContext,
        context: &SharedContext,
        environment: Environment,
        arguments: &ApplicationArguments,
        banner: Option<PrintedBanner>,
    ) -> Result<(), LaunchError> {
        context.set_environment(environment.clone());
        self.hooks
            .post_process_context(context)
            .map_err(LaunchError::PostProcess)?;
        self.apply_initializers(context)?;
        bus.context_prepared(context)?;
        bootstrap.close(context)?;

        if self.settings.log_startup_info {
            log_starting(&self.name);
            self.log_profiles(&environment);
        }

        context.register_singleton(ARGUMENTS_BEAN, Arc::new(arguments.clone()))?;
        if let Some(banner) = banner {
            context.register_singleton(BANNER_BEAN, Arc::new(banner))?;
        }
        context.set_allow_definition_overriding(self.settings.allow_bean_definition_overriding);
        if self.settings.lazy_initialization {
            context.set_lazy_initialization(true);
        }

        let sources = self.all_sources();
        if sources.is_empty() {
            return Err(LaunchError::NoSources);
        }
        let registry = context
            .definition_registry()
            .ok_or(LaunchError::NoDefinitionRegistry)?;
        debug!(sources = ?sources, "Loading sources");
        self.loader.load(registry, &sources).map_err(LaunchError::Load)?;
        bus.context_loaded(context)
    }

    fn apply_initializers(&self, context: &SharedContext) -> Result<(), LaunchError> {
        let mut initializers = self.initializers.clone();
        initializers.extend(
            self.catalog
                .instantiate::<ContextInitializers>(&())?
                .into_iter()
                .map(Arc::<dyn ContextInitializer>::from),
        );
        initializers.sort_by_key(|initializer| precedence(initializer.order()));

        for initializer in initializers {
            if let Some(required) = initializer.required_kind() {
                if required != context.kind() {
                    return Err(LaunchError::InitializerMismatch {
                        initializer: initializer.name().to_string(),
                        required,
                        actual: context.kind(),
                    });
                }
            }
            debug!(initializer = initializer.name(), "Applying context initializer");
            initializer
                .initialize(context)
                .map_err(|source| LaunchError::Initializer {
                    initializer: initializer.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    fn log_profiles(&self, environment: &Environment) {
        let active = environment.active_profiles();
        if active.is_empty() {
            info!(
                application = %self.name,
                "No active profile set, falling back to default profiles: {}",
                environment.default_profiles().join(", ")
            );
        } else {
            info!(
                application = %self.name,
                "The following profiles are active: {}",
                active.join(", ")
            );
        }
    }

    fn refresh_context(&self, context: &SharedContext) -> Result<(), LaunchError> {
        if self.settings.register_shutdown_hook {
            self.shutdown.register_context(context)?;
        }
        context.refresh().map_err(LaunchError::Refresh)
    }

    fn call_runners(&self, context: &SharedContext, arguments: &ApplicationArguments) -> Result<(), LaunchError> {
        for runner in ordered_runners(context.runners()) {
            debug!(runner = runner.kind(), "Calling runner");
            runner.call(arguments).map_err(|source| LaunchError::Runner {
                runner: runner.kind(),
                source,
            })?;
        }
        Ok(())
    }

    // --- Failure path ---

    fn handle_run_failure(
        &self,
        context: Option<&SharedContext>,
        bus: Option<&mut LifecycleBus>,
        cause: LaunchError,
    ) -> RunFailure {
        let exit_code = resolve_exit_code(context, &cause);
        if exit_code != 0 {
            if let Some(context) = context {
                if let Err(e) = context.publish_event(&ApplicationEvent::ExitCode(exit_code)) {
                    warn!(error = %e, "Unable to publish exit code");
                }
            }
        }
        if let Some(bus) = bus {
            if let Err(e) = bus.failed(context, Some(&cause as &(dyn Error + 'static))) {
                warn!(error = %e, "Unable to notify run listeners of failure");
            }
        }
        let reported_by = self.report_failure(context, &cause);
        if let Some(context) = context {
            if let Err(e) = context.close() {
                warn!(error = %e, "Unable to close application context");
            }
        }
        RunFailure {
            exit_code,
            reported_by,
            cause,
        }
    }

    fn report_failure(&self, context: Option<&SharedContext>, failure: &LaunchError) -> ReportedBy {
        let args = ReporterArgs {
            context: context.cloned(),
        };
        let reporters = self
            .catalog
            .instantiate::<ExceptionReporters>(&args)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Exception reporters unavailable, falling back to log");
                Vec::new()
            });
        for reporter in reporters {
            if reporter.report(failure) {
                return ReportedBy::Reporter(reporter.name().to_string());
            }
        }
        error!(
            application = %self.name,
            error = %failure,
            causes = ?cause_chain(failure),
            "Application run failed"
        );
        ReportedBy::Log
    }
}

fn cause_chain(error: &(dyn Error + 'static)) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain
}

/// Runs an application built from `sources` with default settings.
pub fn run(
    catalog: Arc<PluginCatalog>,
    sources: impl IntoIterator<Item = Source>,
    args: impl IntoIterator<Item = String>,
) -> Result<SharedContext, RunError> {
    Application::new(catalog, sources).run(args)
}
