//! # Application Events
//!
//! Application-level notifications derived from the lifecycle. The default
//! [`EventPublishingRunListener`] turns each lifecycle phase into an
//! [`ApplicationEvent`] for the [`ApplicationListener`]s configured on the
//! application. Until the container is loaded the run listener delivers the
//! events itself; afterwards the listeners are attached to the container and
//! the container publishes.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::bootstrap::BootstrapContext;
use crate::context::SharedContext;
use crate::environment::Environment;
use crate::error::BoxError;
use crate::listener::RunListener;
use crate::plugin::Capability;

#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationEvent {
    Starting,
    EnvironmentPrepared { active_profiles: Vec<String> },
    ContextInitialized { context_id: String },
    Prepared { context_id: String },
    ContextRefreshed { context_id: String },
    Started { context_id: String, time_taken: Duration },
    Ready { context_id: String, time_taken: Duration },
    Failed { context_id: Option<String>, error: String },
    ExitCode(i32),
    ContextClosed { context_id: String },
}

impl ApplicationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ApplicationEvent::Starting => "Starting",
            ApplicationEvent::EnvironmentPrepared { .. } => "EnvironmentPrepared",
            ApplicationEvent::ContextInitialized { .. } => "ContextInitialized",
            ApplicationEvent::Prepared { .. } => "Prepared",
            ApplicationEvent::ContextRefreshed { .. } => "ContextRefreshed",
            ApplicationEvent::Started { .. } => "Started",
            ApplicationEvent::Ready { .. } => "Ready",
            ApplicationEvent::Failed { .. } => "Failed",
            ApplicationEvent::ExitCode(_) => "ExitCode",
            ApplicationEvent::ContextClosed { .. } => "ContextClosed",
        }
    }
}

/// Receiver of [`ApplicationEvent`]s.
pub trait ApplicationListener: Send + Sync {
    fn order(&self) -> Option<i32> {
        None
    }

    fn on_event(&self, event: &ApplicationEvent) -> Result<(), BoxError>;
}

impl<F> ApplicationListener for F
where
    F: Fn(&ApplicationEvent) -> Result<(), BoxError> + Send + Sync,
{
    fn on_event(&self, event: &ApplicationEvent) -> Result<(), BoxError> {
        self(event)
    }
}

/// Catalog capability for [`ApplicationListener`]s.
pub struct ApplicationListeners;

impl Capability for ApplicationListeners {
    type Args = ();
    type Plugin = dyn ApplicationListener;
    const NAME: &'static str = "ApplicationListener";

    fn order_of(listener: &dyn ApplicationListener) -> Option<i32> {
        listener.order()
    }
}

/// Run listener that publishes [`ApplicationEvent`]s.
pub struct EventPublishingRunListener {
    listeners: Vec<Arc<dyn ApplicationListener>>,
}

impl EventPublishingRunListener {
    pub fn new(listeners: Vec<Arc<dyn ApplicationListener>>) -> Self {
        Self { listeners }
    }

    fn multicast(&self, event: &ApplicationEvent) -> Result<(), BoxError> {
        debug!(event = event.name(), listeners = self.listeners.len(), "Multicasting");
        for listener in &self.listeners {
            listener.on_event(event)?;
        }
        Ok(())
    }
}

impl RunListener for EventPublishingRunListener {
    fn order(&self) -> Option<i32> {
        Some(0)
    }

    fn starting(&self, _: &BootstrapContext) -> Result<(), BoxError> {
        self.multicast(&ApplicationEvent::Starting)
    }

    fn environment_prepared(
        &self,
        _: &BootstrapContext,
        environment: &mut Environment,
    ) -> Result<(), BoxError> {
        self.multicast(&ApplicationEvent::EnvironmentPrepared {
            active_profiles: environment.active_profiles(),
        })
    }

    fn context_prepared(&self, context: &SharedContext) -> Result<(), BoxError> {
        self.multicast(&ApplicationEvent::ContextInitialized {
            context_id: context.id().to_string(),
        })
    }

    fn context_loaded(&self, context: &SharedContext) -> Result<(), BoxError> {
        for listener in &self.listeners {
            context.add_application_listener(listener.clone());
        }
        self.multicast(&ApplicationEvent::Prepared {
            context_id: context.id().to_string(),
        })
    }

    fn started(&self, context: &SharedContext, time_taken: Duration) -> Result<(), BoxError> {
        context.publish_event(&ApplicationEvent::Started {
            context_id: context.id().to_string(),
            time_taken,
        })
    }

    fn running(&self, context: &SharedContext, time_taken: Duration) -> Result<(), BoxError> {
        context.publish_event(&ApplicationEvent::Ready {
            context_id: context.id().to_string(),
            time_taken,
        })
    }

    fn failed(
        &self,
        context: Option<&SharedContext>,
        error: Option<&(dyn Error + 'static)>,
    ) -> Result<(), BoxError> {
        let event = ApplicationEvent::Failed {
            context_id: context.map(|c| c.id().to_string()),
            error: error.map(|e| e.to_string()).unwrap_or_default(),
        };
        if let Some(context) = context.filter(|c| c.is_active()) {
            return context.publish_event(&event);
        }
        // The container never came up: deliver directly and keep going past
        // listeners that fail.
        for listener in &self.listeners {
            if let Err(e) = listener.on_event(&event) {
                warn!(error = %e, "Error calling application listener");
            }
        }
        Ok(())
    }
}
