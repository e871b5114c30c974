use std::sync::Arc;

use parking_lot::Mutex;

use liftoff::banner::BannerMode;
use liftoff::bootstrap::{BootstrapContext, InstanceSupplier};
use liftoff::context::{
    ApplicationKind, Bean, Configuration, ContextInitializer, DefinitionRegistry, SharedContext,
    Source,
};
use liftoff::environment::{Environment, EnvironmentKind};
use liftoff::error::{BoxError, LaunchError, ReportedBy};
use liftoff::events::ApplicationEvent;
use liftoff::listener::LifecyclePhase;
use liftoff::mock::{FixedReporter, PhaseLog, PhaseRecorder, StubRunner, TrackingFactory};
use liftoff::{Application, PluginCatalog, RunError};

/// Registers the given runner as a bean.
struct Runners(Vec<StubRunner>);

impl Configuration for Runners {
    fn name(&self) -> &str {
        "runners"
    }

    fn register(&self, registry: &dyn DefinitionRegistry) -> Result<(), BoxError> {
        for (i, runner) in self.0.iter().enumerate() {
            registry.register_bean(&format!("runner{i}"), Bean::application_runner(runner.clone()))?;
        }
        Ok(())
    }
}

struct NeedsReactive;

impl ContextInitializer for NeedsReactive {
    fn required_kind(&self) -> Option<ApplicationKind> {
        Some(ApplicationKind::Reactive)
    }

    fn initialize(&self, _: &SharedContext) -> Result<(), BoxError> {
        Ok(())
    }
}

fn recording_catalog(log: &PhaseLog) -> PluginCatalog {
    let mut catalog = PluginCatalog::with_defaults();
    let recorder = log.clone();
    catalog.run_listener("recorder", move |_| Ok(PhaseRecorder::new(recorder.clone())));
    catalog
}

fn application(catalog: PluginCatalog, runners: Vec<StubRunner>, factory: &TrackingFactory) -> Application {
    let mut app = Application::new(Arc::new(catalog), [Source::component(Runners(runners))]);
    app.set_name("lifecycle-test")
        .set_banner_mode(BannerMode::Off)
        .set_register_shutdown_hook(false)
        .set_environment(Environment::new(EnvironmentKind::Standard))
        .set_context_factory(factory.clone());
    app
}

#[test]
fn successful_run_dispatches_every_phase_in_order() {
    let log = PhaseLog::new();
    let runner = StubRunner::new();
    let factory = TrackingFactory::new();
    let mut app = application(recording_catalog(&log), vec![runner.clone()], &factory);

    let context = app.run(["--mode=test"]).expect("run should succeed");

    assert_eq!(
        log.phases(),
        vec![
            LifecyclePhase::Starting,
            LifecyclePhase::EnvironmentPrepared,
            LifecyclePhase::ContextPrepared,
            LifecyclePhase::ContextLoaded,
            LifecyclePhase::Started,
            LifecyclePhase::Running,
        ]
    );
    assert_eq!(runner.calls(), 1);
    assert!(context.is_active());
    assert_eq!(factory.last().map(|c| c.closes()), Some(0));
}

#[test]
fn initializer_kind_mismatch_fails_before_context_prepared() {
    let log = PhaseLog::new();
    let factory = TrackingFactory::new();
    let mut app = application(recording_catalog(&log), Vec::new(), &factory);
    app.add_initializer(NeedsReactive);

    let err = app.run(Vec::<String>::new()).unwrap_err();

    assert!(matches!(err, RunError::Startup(_)));
    assert!(matches!(
        err.cause(),
        LaunchError::InitializerMismatch {
            required: ApplicationKind::Reactive,
            actual: ApplicationKind::Standalone,
            ..
        }
    ));
    assert_eq!(
        log.phases(),
        vec![
            LifecyclePhase::Starting,
            LifecyclePhase::EnvironmentPrepared,
            LifecyclePhase::Failed,
        ]
    );
    let context = factory.last().expect("context was created");
    assert!(context.is_closed());
}

#[test]
fn runner_failure_routes_through_the_failure_path() {
    let log = PhaseLog::new();
    let first = StubRunner::failing(3);
    let second = StubRunner::new();
    let factory = TrackingFactory::new();
    let mut app = application(recording_catalog(&log), vec![first.clone(), second.clone()], &factory);

    let err = app.run(Vec::<String>::new()).unwrap_err();

    assert!(matches!(err, RunError::Startup(_)));
    assert!(matches!(err.cause(), LaunchError::Runner { runner: "ApplicationRunner", .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(*err.reported_by(), ReportedBy::Log);
    assert_eq!(log.phases().last(), Some(&LifecyclePhase::Failed));
    assert!(!log.phases().contains(&LifecyclePhase::Running));
    assert_eq!(second.calls(), 0);

    let context = factory.last().expect("context was created");
    assert!(context.is_closed());
    assert_eq!(context.closes(), 1);
}

#[test]
fn first_claiming_reporter_stops_the_chain() {
    let log = PhaseLog::new();
    let mut catalog = recording_catalog(&log);
    let first = FixedReporter::claiming("first").with_order(1);
    let second = FixedReporter::claiming("second").with_order(2);
    let declining = FixedReporter::declining("declining").with_order(0);
    {
        let r = second.clone();
        catalog.exception_reporter("second", move |_| Ok(r.clone()));
        let r = first.clone();
        catalog.exception_reporter("first", move |_| Ok(r.clone()));
        let r = declining.clone();
        catalog.exception_reporter("declining", move |_| Ok(r.clone()));
    }
    let factory = TrackingFactory::new();
    let mut app = application(catalog, vec![StubRunner::failing(2)], &factory);

    let err = app.run(Vec::<String>::new()).unwrap_err();

    assert_eq!(*err.reported_by(), ReportedBy::Reporter("first".to_string()));
    assert_eq!(declining.calls(), 1);
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
}

#[test]
fn running_failure_skips_listeners_but_closes_the_context() {
    let log = PhaseLog::new();
    let mut catalog = PluginCatalog::new();
    let recorder = log.clone();
    catalog.run_listener("recorder", move |_| {
        Ok(PhaseRecorder::new(recorder.clone()).failing_in(LifecyclePhase::Running))
    });
    let factory = TrackingFactory::new();
    let mut app = application(catalog, Vec::new(), &factory);

    let err = app.run(Vec::<String>::new()).unwrap_err();

    assert!(matches!(err, RunError::Running(_)));
    assert!(matches!(
        err.cause(),
        LaunchError::Listener {
            phase: LifecyclePhase::Running,
            ..
        }
    ));
    assert_eq!(log.phases().last(), Some(&LifecyclePhase::Running));
    assert!(!log.phases().contains(&LifecyclePhase::Failed));
    assert!(factory.last().expect("context was created").is_closed());
}

#[test]
fn close_failure_does_not_mask_the_cause() {
    let log = PhaseLog::new();
    let factory = TrackingFactory::new().failing_close("disk full");
    let mut app = application(recording_catalog(&log), vec![StubRunner::failing(5)], &factory);

    let err = app.run(Vec::<String>::new()).unwrap_err();

    assert!(matches!(err.cause(), LaunchError::Runner { .. }));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(factory.last().map(|c| c.closes()), Some(1));
}

#[test]
fn listener_failure_before_the_container_has_no_context() {
    let log = PhaseLog::new();
    let mut catalog = PluginCatalog::new();
    let recorder = log.clone();
    catalog.run_listener("recorder", move |_| {
        Ok(PhaseRecorder::new(recorder.clone()).failing_in(LifecyclePhase::EnvironmentPrepared))
    });
    let factory = TrackingFactory::new();
    let mut app = application(catalog, Vec::new(), &factory);

    let err = app.run(Vec::<String>::new()).unwrap_err();

    assert!(matches!(
        err.cause(),
        LaunchError::Listener {
            phase: LifecyclePhase::EnvironmentPrepared,
            ..
        }
    ));
    assert_eq!(
        log.phases(),
        vec![
            LifecyclePhase::Starting,
            LifecyclePhase::EnvironmentPrepared,
            LifecyclePhase::Failed,
        ]
    );
    assert!(factory.created().is_empty());
}

#[test]
fn plugin_construction_failure_aborts_before_any_phase() {
    let log = PhaseLog::new();
    let mut catalog = recording_catalog(&log);
    catalog.run_listener("broken", |_| -> Result<PhaseRecorder, BoxError> {
        Err("missing dependency".into())
    });
    let factory = TrackingFactory::new();
    let mut app = application(catalog, Vec::new(), &factory);

    let err = app.run(Vec::<String>::new()).unwrap_err();

    assert!(matches!(err.cause(), LaunchError::Plugin(_)));
    assert!(log.phases().is_empty());
    assert!(factory.created().is_empty());
}

#[derive(Debug)]
struct Greeting(String);

#[test]
fn bootstrap_entries_reach_the_finished_container() {
    let factory = TrackingFactory::new();
    let seen = Arc::new(Mutex::new(None::<String>));
    let mut app = application(PluginCatalog::with_defaults(), Vec::new(), &factory);

    let sink = seen.clone();
    app.add_bootstrap_initializer(move |registry: &BootstrapContext| -> Result<(), BoxError> {
        registry.register(InstanceSupplier::of(Greeting("hello".into())))?;
        let sink = sink.clone();
        registry.add_close_listener(move |bootstrap, context| {
            let greeting = bootstrap.get::<Greeting>()?;
            *sink.lock() = Some(format!("{} from {}", greeting.0, context.id()));
            Ok(())
        })?;
        Ok(())
    });

    let context = app.run(Vec::<String>::new()).unwrap();
    assert_eq!(
        seen.lock().clone(),
        Some(format!("hello from {}", context.id()))
    );
}

#[test]
fn application_listeners_see_events_from_start_to_ready() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let factory = TrackingFactory::new();
    let mut app = application(PluginCatalog::with_defaults(), Vec::new(), &factory);
    let sink = events.clone();
    app.add_listener(move |event: &ApplicationEvent| -> Result<(), BoxError> {
        sink.lock().push(event.name());
        Ok(())
    });

    let context = app.run(Vec::<String>::new()).unwrap();
    context.close().unwrap();

    let names = events.lock().clone();
    assert_eq!(names.first(), Some(&"Starting"));
    assert!(names.contains(&"ContextRefreshed"));
    let ready = names.iter().position(|n| *n == "Ready");
    let closed = names.iter().position(|n| *n == "ContextClosed");
    assert!(ready.is_some() && closed > ready);
}
