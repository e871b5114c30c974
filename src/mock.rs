//! # Test Doubles
//!
//! Utilities for exercising [`crate::Application::run`] end to end.
//!
//! - [`PhaseRecorder`] records every lifecycle phase it sees into a shared
//!   [`PhaseLog`], and can fail in a chosen phase.
//! - [`StubRunner`] counts its calls and can fail with an exit code.
//! - [`TrackingFactory`] builds [`TrackingContext`]s, which count closes and
//!   can fail to close.
//! - [`FixedReporter`] claims (or declines) every failure and counts calls.
//!
//! ```rust
//! use liftoff::mock::{PhaseLog, PhaseRecorder};
//! use liftoff::PluginCatalog;
//!
//! let log = PhaseLog::new();
//! let mut catalog = PluginCatalog::new();
//! let recorder = log.clone();
//! catalog.run_listener("recorder", move |_| Ok(PhaseRecorder::new(recorder.clone())));
//! assert!(log.phases().is_empty());
//! ```

use std::any::Any;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::arguments::ApplicationArguments;
use crate::bootstrap::BootstrapContext;
use crate::context::{
    ApplicationContext, ApplicationKind, ContextFactory, DefinitionRegistry, GenericContext,
    SharedContext,
};
use crate::environment::Environment;
use crate::error::{BoxError, ContextError};
use crate::events::{ApplicationEvent, ApplicationListener};
use crate::exit::{ExitCodeExceptionMapper, ExitCodeGenerator, ExitStatusError};
use crate::listener::{LifecyclePhase, RunListener};
use crate::report::ExceptionReporter;
use crate::runner::{ApplicationRunner, Runner};
use crate::startup::ApplicationStartup;

// =============================================================================
// LIFECYCLE RECORDING
// =============================================================================

/// Shared, ordered record of dispatched phases.
#[derive(Debug, Clone, Default)]
pub struct PhaseLog {
    phases: Arc<Mutex<Vec<LifecyclePhase>>>,
}

impl PhaseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phases(&self) -> Vec<LifecyclePhase> {
        self.phases.lock().clone()
    }

    pub fn clear(&self) {
        self.phases.lock().clear();
    }

    fn push(&self, phase: LifecyclePhase) {
        self.phases.lock().push(phase);
    }
}

/// Run listener that appends each phase to a [`PhaseLog`].
pub struct PhaseRecorder {
    log: PhaseLog,
    fail_in: Option<LifecyclePhase>,
    order: Option<i32>,
}

impl PhaseRecorder {
    pub fn new(log: PhaseLog) -> Self {
        Self {
            log,
            fail_in: None,
            order: None,
        }
    }

    /// Fails (after recording) when `phase` is dispatched.
    pub fn failing_in(mut self, phase: LifecyclePhase) -> Self {
        self.fail_in = Some(phase);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    fn record(&self, phase: LifecyclePhase) -> Result<(), BoxError> {
        self.log.push(phase);
        if self.fail_in == Some(phase) {
            return Err(format!("recorder failing in {phase}").into());
        }
        Ok(())
    }
}

impl RunListener for PhaseRecorder {
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn starting(&self, _: &BootstrapContext) -> Result<(), BoxError> {
        self.record(LifecyclePhase::Starting)
    }

    fn environment_prepared(&self, _: &BootstrapContext, _: &mut Environment) -> Result<(), BoxError> {
        self.record(LifecyclePhase::EnvironmentPrepared)
    }

    fn context_prepared(&self, _: &SharedContext) -> Result<(), BoxError> {
        self.record(LifecyclePhase::ContextPrepared)
    }

    fn context_loaded(&self, _: &SharedContext) -> Result<(), BoxError> {
        self.record(LifecyclePhase::ContextLoaded)
    }

    fn started(&self, _: &SharedContext, _: Duration) -> Result<(), BoxError> {
        self.record(LifecyclePhase::Started)
    }

    fn running(&self, _: &SharedContext, _: Duration) -> Result<(), BoxError> {
        self.record(LifecyclePhase::Running)
    }

    fn failed(&self, _: Option<&SharedContext>, _: Option<&(dyn Error + 'static)>) -> Result<(), BoxError> {
        self.record(LifecyclePhase::Failed)
    }
}

// =============================================================================
// RUNNERS
// =============================================================================

/// Application runner that counts calls and optionally fails.
#[derive(Clone, Default)]
pub struct StubRunner {
    calls: Arc<AtomicUsize>,
    exit_code: Option<i32>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner that fails with an [`ExitStatusError`] carrying `code`.
    pub fn failing(code: i32) -> Self {
        Self {
            calls: Arc::default(),
            exit_code: Some(code),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ApplicationRunner for StubRunner {
    fn run(&self, _: &ApplicationArguments) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.exit_code {
            Some(code) => Err(Box::new(ExitStatusError::new(code, "stub runner failed"))),
            None => Ok(()),
        }
    }
}

// =============================================================================
// CONTAINERS
// =============================================================================

/// A [`GenericContext`] that counts `close` calls and can fail them.
pub struct TrackingContext {
    inner: GenericContext,
    closes: AtomicUsize,
    close_failure: Option<String>,
}

impl TrackingContext {
    pub fn new(kind: ApplicationKind) -> Self {
        Self {
            inner: GenericContext::new(kind),
            closes: AtomicUsize::new(0),
            close_failure: None,
        }
    }

    /// Closes normally, then reports `message` as a close failure.
    pub fn failing_close(mut self, message: impl Into<String>) -> Self {
        self.close_failure = Some(message.into());
        self
    }

    /// Number of `close` calls so far.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl DefinitionRegistry for TrackingContext {
    fn register_bean(&self, name: &str, bean: crate::context::Bean) -> Result<(), ContextError> {
        self.inner.register_bean(name, bean)
    }

    fn register_source(&self, name: &str) {
        self.inner.register_source(name)
    }

    fn contains_bean(&self, name: &str) -> bool {
        self.inner.contains_bean(name)
    }

    fn bean_names(&self) -> Vec<String> {
        self.inner.bean_names()
    }
}

impl ApplicationContext for TrackingContext {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> ApplicationKind {
        self.inner.kind()
    }

    fn set_environment(&self, environment: Environment) {
        self.inner.set_environment(environment)
    }

    fn environment(&self) -> Option<Environment> {
        self.inner.environment()
    }

    fn set_application_startup(&self, startup: Arc<dyn ApplicationStartup>) {
        self.inner.set_application_startup(startup)
    }

    fn register_singleton(&self, name: &str, value: Arc<dyn Any + Send + Sync>) -> Result<(), ContextError> {
        self.inner.register_singleton(name, value)
    }

    fn singleton(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.singleton(name)
    }

    fn set_allow_definition_overriding(&self, allow: bool) {
        self.inner.set_allow_definition_overriding(allow)
    }

    fn set_lazy_initialization(&self, lazy: bool) {
        self.inner.set_lazy_initialization(lazy)
    }

    fn definition_registry(&self) -> Option<&dyn DefinitionRegistry> {
        Some(self)
    }

    fn add_application_listener(&self, listener: Arc<dyn ApplicationListener>) {
        self.inner.add_application_listener(listener)
    }

    fn publish_event(&self, event: &ApplicationEvent) -> Result<(), BoxError> {
        self.inner.publish_event(event)
    }

    fn refresh(&self) -> Result<(), BoxError> {
        self.inner.refresh()
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn close(&self) -> Result<(), BoxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()?;
        match &self.close_failure {
            Some(message) => Err(message.clone().into()),
            None => Ok(()),
        }
    }

    fn on_close(&self, callback: Box<dyn FnOnce() + Send>) {
        self.inner.on_close(callback)
    }

    fn runners(&self) -> Vec<Runner> {
        self.inner.runners()
    }

    fn exit_code_mappers(&self) -> Vec<Arc<dyn ExitCodeExceptionMapper>> {
        self.inner.exit_code_mappers()
    }

    fn exit_code_generators(&self) -> Vec<Arc<dyn ExitCodeGenerator>> {
        self.inner.exit_code_generators()
    }
}

/// Context factory that hands out [`TrackingContext`]s and keeps them.
#[derive(Clone, Default)]
pub struct TrackingFactory {
    created: Arc<Mutex<Vec<Arc<TrackingContext>>>>,
    close_failure: Option<String>,
}

impl TrackingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every context built by this factory fails to close with `message`.
    pub fn failing_close(mut self, message: impl Into<String>) -> Self {
        self.close_failure = Some(message.into());
        self
    }

    pub fn created(&self) -> Vec<Arc<TrackingContext>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<TrackingContext>> {
        self.created.lock().last().cloned()
    }
}

impl ContextFactory for TrackingFactory {
    fn create(&self, kind: ApplicationKind) -> Result<SharedContext, BoxError> {
        let mut context = TrackingContext::new(kind);
        if let Some(message) = &self.close_failure {
            context = context.failing_close(message.clone());
        }
        let context = Arc::new(context);
        self.created.lock().push(context.clone());
        Ok(context)
    }
}

// =============================================================================
// REPORTERS
// =============================================================================

/// Exception reporter with a fixed answer.
#[derive(Clone)]
pub struct FixedReporter {
    name: &'static str,
    claims: bool,
    order: Option<i32>,
    calls: Arc<AtomicUsize>,
}

impl FixedReporter {
    pub fn claiming(name: &'static str) -> Self {
        Self::build(name, true)
    }

    pub fn declining(name: &'static str) -> Self {
        Self::build(name, false)
    }

    fn build(name: &'static str, claims: bool) -> Self {
        Self {
            name,
            claims,
            order: None,
            calls: Arc::default(),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExceptionReporter for FixedReporter {
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn report(&self, _: &(dyn Error + 'static)) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_fails_only_in_its_phase() {
        let log = PhaseLog::new();
        let recorder = PhaseRecorder::new(log.clone()).failing_in(LifecyclePhase::ContextLoaded);
        let bootstrap = BootstrapContext::new();
        recorder.starting(&bootstrap).unwrap();

        let context: SharedContext = Arc::new(GenericContext::new(ApplicationKind::Standalone));
        assert!(recorder.context_loaded(&context).is_err());
        assert_eq!(
            log.phases(),
            vec![LifecyclePhase::Starting, LifecyclePhase::ContextLoaded]
        );
    }

    #[test]
    fn tracking_context_counts_and_fails_closes() {
        let factory = TrackingFactory::new().failing_close("disk full");
        let context = factory.create(ApplicationKind::Servlet).unwrap();
        assert!(context.close().is_err());
        let tracked = factory.last().unwrap();
        assert_eq!(tracked.closes(), 1);
        assert!(tracked.is_closed());
    }
}
