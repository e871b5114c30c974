//! Catalog participants of the sample.

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use liftoff::bootstrap::{BootstrapContext, BootstrapRegistryInitializer, InstanceSupplier};
use liftoff::context::SharedContext;
use liftoff::environment::Environment;
use liftoff::error::BoxError;
use liftoff::listener::RunListener;
use liftoff::report::ExceptionReporter;
use liftoff::PluginCatalog;

use crate::greeting::find_greeting_error;

/// Container singleton holding the [`LaunchStamp`].
pub const LAUNCH_STAMP_BEAN: &str = "launchStamp";

/// When the bootstrap phase began.
#[derive(Debug, Clone, Copy)]
pub struct LaunchStamp(pub Instant);

/// Stamps the launch time and hands it to the container when bootstrap ends.
pub struct LaunchStampInitializer;

impl BootstrapRegistryInitializer for LaunchStampInitializer {
    fn initialize(&self, registry: &BootstrapContext) -> Result<(), BoxError> {
        registry.register(InstanceSupplier::of(LaunchStamp(Instant::now())))?;
        registry.add_close_listener(|bootstrap, context| {
            let stamp = bootstrap.get::<LaunchStamp>()?;
            info!(
                context = context.id(),
                elapsed_ms = stamp.0.elapsed().as_millis() as u64,
                "Bootstrap finished"
            );
            context.register_singleton(LAUNCH_STAMP_BEAN, Arc::new(*stamp))?;
            Ok(())
        })?;
        Ok(())
    }
}

/// Logs every phase.
pub struct AuditListener;

impl RunListener for AuditListener {
    fn order(&self) -> Option<i32> {
        Some(10)
    }

    fn starting(&self, _: &BootstrapContext) -> Result<(), BoxError> {
        info!("audit: starting");
        Ok(())
    }

    fn environment_prepared(&self, _: &BootstrapContext, environment: &mut Environment) -> Result<(), BoxError> {
        info!(sources = ?environment.property_sources().names(), "audit: environment prepared");
        Ok(())
    }

    fn context_loaded(&self, context: &SharedContext) -> Result<(), BoxError> {
        info!(context = context.id(), "audit: context loaded");
        Ok(())
    }

    fn running(&self, context: &SharedContext, time_taken: Duration) -> Result<(), BoxError> {
        info!(context = context.id(), ms = time_taken.as_millis() as u64, "audit: running");
        Ok(())
    }

    fn failed(&self, _: Option<&SharedContext>, error: Option<&(dyn Error + 'static)>) -> Result<(), BoxError> {
        if let Some(error) = error {
            info!(%error, "audit: failed");
        }
        Ok(())
    }
}

/// Reports greeting failures in a short form and claims them.
pub struct ConsoleReporter;

impl ExceptionReporter for ConsoleReporter {
    fn name(&self) -> &'static str {
        "console"
    }

    fn report(&self, failure: &(dyn Error + 'static)) -> bool {
        match find_greeting_error(failure) {
            Some(greeting) => {
                error!("Cannot greet: {greeting}");
                true
            }
            None => false,
        }
    }
}

/// The sample's catalog: the defaults plus the participants above.
pub fn catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::with_defaults();
    catalog
        .run_listener("audit", |_| Ok(AuditListener))
        .exception_reporter("console", |_| Ok(ConsoleReporter))
        .bootstrap_initializer("launch-stamp", || Ok(LaunchStampInitializer));
    catalog
}
