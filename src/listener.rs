//! # Lifecycle Event Bus
//!
//! [`RunListener`]s observe every phase of a run. The [`LifecycleBus`] holds
//! the listeners of one run (freshly built by the plugin catalog) and fans each
//! phase out to all of them, in precedence order, on the calling thread.
//!
//! Phases move strictly forward:
//!
//! ```text
//! starting -> environment-prepared -> context-prepared -> context-loaded -> started -> running
//!     \____________________\__________________\________________\_____________\________-> failed
//! ```
//!
//! A listener error aborts the run in every phase but `failed`. During
//! `failed`, listener errors are logged and swallowed, unless no triggering
//! error was given, in which case the listener's own error is returned.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info_span, warn};

use crate::bootstrap::BootstrapContext;
use crate::context::SharedContext;
use crate::environment::Environment;
use crate::error::{BoxError, LaunchError};
use crate::events::ApplicationListener;
use crate::plugin::Capability;
use crate::startup::ApplicationStartup;

/// A phase of the run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Starting,
    EnvironmentPrepared,
    ContextPrepared,
    ContextLoaded,
    Started,
    Running,
    Failed,
}

impl LifecyclePhase {
    /// Stable label used for startup steps and tracing spans.
    pub fn step_name(self) -> &'static str {
        match self {
            LifecyclePhase::Starting => "liftoff.application.starting",
            LifecyclePhase::EnvironmentPrepared => "liftoff.application.environment-prepared",
            LifecyclePhase::ContextPrepared => "liftoff.application.context-prepared",
            LifecyclePhase::ContextLoaded => "liftoff.application.context-loaded",
            LifecyclePhase::Started => "liftoff.application.started",
            LifecyclePhase::Running => "liftoff.application.running",
            LifecyclePhase::Failed => "liftoff.application.failed",
        }
    }

    /// Whether this phase may be entered right after `previous`.
    pub fn can_follow(self, previous: Option<LifecyclePhase>) -> bool {
        use LifecyclePhase::*;
        match (previous, self) {
            (None, Starting) => true,
            (Some(Failed), _) => false,
            (Some(_), Failed) => true,
            (Some(Starting), EnvironmentPrepared)
            | (Some(EnvironmentPrepared), ContextPrepared)
            | (Some(ContextPrepared), ContextLoaded)
            | (Some(ContextLoaded), Started)
            | (Some(Started), Running) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecyclePhase::Starting => "starting",
            LifecyclePhase::EnvironmentPrepared => "environmentPrepared",
            LifecyclePhase::ContextPrepared => "contextPrepared",
            LifecyclePhase::ContextLoaded => "contextLoaded",
            LifecyclePhase::Started => "started",
            LifecyclePhase::Running => "running",
            LifecyclePhase::Failed => "failed",
        })
    }
}

/// Observer of the run lifecycle. Every method defaults to a no-op.
pub trait RunListener: Send + Sync {
    fn order(&self) -> Option<i32> {
        None
    }

    /// Called as soon as the run begins.
    fn starting(&self, bootstrap: &BootstrapContext) -> Result<(), BoxError> {
        let _ = bootstrap;
        Ok(())
    }

    /// Called once the environment is ready, before the container exists.
    /// Listeners may add or reorder property sources here.
    fn environment_prepared(
        &self,
        bootstrap: &BootstrapContext,
        environment: &mut Environment,
    ) -> Result<(), BoxError> {
        let _ = (bootstrap, environment);
        Ok(())
    }

    /// Called once the container is created and initialized, before sources load.
    fn context_prepared(&self, context: &SharedContext) -> Result<(), BoxError> {
        let _ = context;
        Ok(())
    }

    /// Called once sources are loaded, before refresh.
    fn context_loaded(&self, context: &SharedContext) -> Result<(), BoxError> {
        let _ = context;
        Ok(())
    }

    /// Called after refresh, before runners are invoked.
    fn started(&self, context: &SharedContext, time_taken: Duration) -> Result<(), BoxError> {
        let _ = (context, time_taken);
        Ok(())
    }

    /// Called after every runner completed.
    fn running(&self, context: &SharedContext, time_taken: Duration) -> Result<(), BoxError> {
        let _ = (context, time_taken);
        Ok(())
    }

    /// Called when the run fails. `context` is `None` if the failure happened
    /// before the container was created.
    fn failed(
        &self,
        context: Option<&SharedContext>,
        error: Option<&(dyn Error + 'static)>,
    ) -> Result<(), BoxError> {
        let _ = (context, error);
        Ok(())
    }
}

/// What every [`RunListener`] factory receives.
#[derive(Clone)]
pub struct ListenerArgs {
    /// Name of the application being run.
    pub application: String,
    /// Raw command-line arguments.
    pub args: Arc<[String]>,
    /// The application listeners configured on the application.
    pub listeners: Vec<Arc<dyn ApplicationListener>>,
}

/// Catalog capability for [`RunListener`]s.
pub struct RunListeners;

impl Capability for RunListeners {
    type Args = ListenerArgs;
    type Plugin = dyn RunListener;
    const NAME: &'static str = "RunListener";

    fn order_of(listener: &dyn RunListener) -> Option<i32> {
        listener.order()
    }
}

/// Fan-out dispatcher for the listeners of one run.
pub struct LifecycleBus {
    listeners: Vec<Box<dyn RunListener>>,
    startup: Arc<dyn ApplicationStartup>,
    phase: Option<LifecyclePhase>,
}

impl LifecycleBus {
    /// `listeners` are expected in precedence order, as returned by the catalog.
    pub fn new(listeners: Vec<Box<dyn RunListener>>, startup: Arc<dyn ApplicationStartup>) -> Self {
        Self {
            listeners,
            startup,
            phase: None,
        }
    }

    /// The last phase dispatched.
    pub fn phase(&self) -> Option<LifecyclePhase> {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn starting(
        &mut self,
        bootstrap: &BootstrapContext,
        main_source: Option<&str>,
    ) -> Result<(), LaunchError> {
        let tags: Vec<(&str, String)> = main_source
            .map(|name| vec![("mainSource", name.to_string())])
            .unwrap_or_default();
        self.dispatch(LifecyclePhase::Starting, &tags, |l| l.starting(bootstrap))
    }

    pub fn environment_prepared(
        &mut self,
        bootstrap: &BootstrapContext,
        environment: &mut Environment,
    ) -> Result<(), LaunchError> {
        self.dispatch(LifecyclePhase::EnvironmentPrepared, &[], |l| {
            l.environment_prepared(bootstrap, &mut *environment)
        })
    }

    pub fn context_prepared(&mut self, context: &SharedContext) -> Result<(), LaunchError> {
        self.dispatch(LifecyclePhase::ContextPrepared, &[], |l| l.context_prepared(context))
    }

    pub fn context_loaded(&mut self, context: &SharedContext) -> Result<(), LaunchError> {
        self.dispatch(LifecyclePhase::ContextLoaded, &[], |l| l.context_loaded(context))
    }

    pub fn started(&mut self, context: &SharedContext, time_taken: Duration) -> Result<(), LaunchError> {
        self.dispatch(LifecyclePhase::Started, &[], |l| l.started(context, time_taken))
    }

    pub fn running(&mut self, context: &SharedContext, time_taken: Duration) -> Result<(), LaunchError> {
        self.dispatch(LifecyclePhase::Running, &[], |l| l.running(context, time_taken))
    }

    /// Notifies every listener of a failure.
    ///
    /// With a triggering `error`, listener failures are logged and the
    /// remaining listeners still run. Without one, the first listener failure
    /// is returned.
    pub fn failed(
        &mut self,
        context: Option<&SharedContext>,
        error: Option<&(dyn Error + 'static)>,
    ) -> Result<(), LaunchError> {
        let mut tags = Vec::new();
        if let Some(error) = error {
            tags.push(("exception", format!("{error:?}")));
            tags.push(("message", error.to_string()));
        }
        self.dispatch(LifecyclePhase::Failed, &tags, |listener| {
            match listener.failed(context, error) {
                Err(e) if error.is_some() => {
                    warn!(error = %e, "Error handling failed");
                    Ok(())
                }
                other => other,
            }
        })
    }

    fn dispatch<F>(
        &mut self,
        phase: LifecyclePhase,
        tags: &[(&str, String)],
        mut call: F,
    ) -> Result<(), LaunchError>
    where
        F: FnMut(&dyn RunListener) -> Result<(), BoxError>,
    {
        if !phase.can_follow(self.phase) {
            return Err(LaunchError::PhaseOrder {
                from: self.phase,
                to: phase,
            });
        }
        self.phase = Some(phase);

        let span = info_span!("lifecycle", step = phase.step_name());
        let _guard = span.enter();
        let mut step = self.startup.start(phase.step_name());
        for (key, value) in tags {
            step.tag(key, value);
        }
        debug!(%phase, listeners = self.listeners.len(), "Dispatching");

        let result = self
            .listeners
            .iter()
            .try_for_each(|listener| call(listener.as_ref()))
            .map_err(|source| LaunchError::Listener { phase, source });
        step.end();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ApplicationKind, GenericContext};
    use crate::startup::BufferingStartup;
    use parking_lot::Mutex;

    struct Scripted {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_in: Option<LifecyclePhase>,
    }

    impl Scripted {
        fn record(&self, phase: LifecyclePhase) -> Result<(), BoxError> {
            self.log.lock().push(format!("{}:{phase}", self.name));
            if self.fail_in == Some(phase) {
                return Err(format!("{} broke", self.name).into());
            }
            Ok(())
        }
    }

    impl RunListener for Scripted {
        fn starting(&self, _: &BootstrapContext) -> Result<(), BoxError> {
            self.record(LifecyclePhase::Starting)
        }

        fn environment_prepared(&self, _: &BootstrapContext, _: &mut Environment) -> Result<(), BoxError> {
            self.record(LifecyclePhase::EnvironmentPrepared)
        }

        fn failed(
            &self,
            _: Option<&SharedContext>,
            _: Option<&(dyn Error + 'static)>,
        ) -> Result<(), BoxError> {
            self.record(LifecyclePhase::Failed)
        }
    }

    fn bus(scripted: Vec<(&'static str, Option<LifecyclePhase>)>) -> (LifecycleBus, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let listeners = scripted
            .into_iter()
            .map(|(name, fail_in)| {
                Box::new(Scripted {
                    name,
                    log: log.clone(),
                    fail_in,
                }) as Box<dyn RunListener>
            })
            .collect();
        (LifecycleBus::new(listeners, Arc::new(BufferingStartup::new())), log)
    }

    #[test]
    fn phases_must_move_forward() {
        assert!(LifecyclePhase::Starting.can_follow(None));
        assert!(!LifecyclePhase::Started.can_follow(None));
        assert!(LifecyclePhase::Running.can_follow(Some(LifecyclePhase::Started)));
        assert!(!LifecyclePhase::Running.can_follow(Some(LifecyclePhase::ContextLoaded)));
        assert!(LifecyclePhase::Failed.can_follow(Some(LifecyclePhase::ContextPrepared)));
        assert!(!LifecyclePhase::Failed.can_follow(None));
        assert!(!LifecyclePhase::Failed.can_follow(Some(LifecyclePhase::Failed)));

        let (mut bus, _) = bus(vec![]);
        let bootstrap = BootstrapContext::new();
        let err = bus
            .environment_prepared(&bootstrap, &mut Environment::new(crate::environment::EnvironmentKind::Standard))
            .unwrap_err();
        assert!(matches!(err, LaunchError::PhaseOrder { from: None, .. }));
    }

    #[test]
    fn listener_error_aborts_the_phase() {
        let (mut bus, log) = bus(vec![("a", Some(LifecyclePhase::Starting)), ("b", None)]);
        let err = bus.starting(&BootstrapContext::new(), None).unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Listener { phase: LifecyclePhase::Starting, .. }
        ));
        assert_eq!(*log.lock(), vec!["a:starting"]);
    }

    #[test]
    fn failed_swallows_listener_errors_when_a_cause_exists() {
        let (mut bus, log) = bus(vec![("a", Some(LifecyclePhase::Failed)), ("b", None)]);
        bus.starting(&BootstrapContext::new(), Some("demo")).unwrap();
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        bus.failed(None, Some(&cause as &(dyn Error + 'static))).unwrap();
        assert_eq!(*log.lock(), vec!["a:starting", "b:starting", "a:failed", "b:failed"]);
    }

    #[test]
    fn failed_reraises_listener_errors_without_a_cause() {
        let (mut bus, log) = bus(vec![("a", Some(LifecyclePhase::Failed)), ("b", None)]);
        bus.starting(&BootstrapContext::new(), None).unwrap();
        let context: SharedContext = Arc::new(GenericContext::new(ApplicationKind::Standalone));
        let err = bus.failed(Some(&context), None).unwrap_err();
        assert_eq!(err.to_string(), "Run listener failed during failed");
        assert_eq!(std::error::Error::source(&err).unwrap().to_string(), "a broke");
        assert_eq!(log.lock().last().map(String::as_str), Some("a:failed"));
    }

    #[test]
    fn every_dispatch_records_a_startup_step() {
        let startup = Arc::new(BufferingStartup::new());
        let mut bus = LifecycleBus::new(Vec::new(), startup.clone());
        bus.starting(&BootstrapContext::new(), Some("demo")).unwrap();
        let steps = startup.steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].name, "liftoff.application.starting");
        assert_eq!(
            steps[0].tags,
            vec![("mainSource".to_string(), "demo".to_string())]
        );
    }

    #[test]
    fn step_names_follow_the_phase() {
        use LifecyclePhase::*;
        let expected = [
            (Starting, "liftoff.application.starting"),
            (EnvironmentPrepared, "liftoff.application.environment-prepared"),
            (ContextPrepared, "liftoff.application.context-prepared"),
            (ContextLoaded, "liftoff.application.context-loaded"),
            (Started, "liftoff.application.started"),
            (Running, "liftoff.application.running"),
            (Failed, "liftoff.application.failed"),
        ];
        for (phase, name) in expected {
            assert_eq!(phase.step_name(), name);
        }
    }
}
