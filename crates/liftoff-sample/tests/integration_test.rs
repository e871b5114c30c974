use liftoff::error::ReportedBy;
use liftoff::RunError;
use liftoff_sample::greeting::GREETING_EXIT_CODE;
use liftoff_sample::plugins::{LaunchStamp, LAUNCH_STAMP_BEAN};
use liftoff_sample::{application, Transcript};

fn run(args: &[&str]) -> (Result<liftoff::SharedContext, RunError>, Transcript) {
    let transcript = Transcript::default();
    let mut app = application(transcript.clone());
    app.set_register_shutdown_hook(false);
    let result = app.run(args.iter().map(|s| s.to_string()));
    (result, transcript)
}

/// Full end-to-end run of the sample application.
#[test]
fn test_greets_and_echoes() {
    let (result, transcript) = run(&["--name=Ada", "--salutation=Hi", "extra"]);
    let context = result.expect("run should succeed");

    assert_eq!(transcript.lines(), vec!["Hi, Ada!", "args: extra"]);
    assert!(context.is_active());
    assert!(context.bean::<LaunchStamp>(LAUNCH_STAMP_BEAN).is_some());

    let env = context.environment().expect("environment is attached");
    assert_eq!(env.get_property("name").as_deref(), Some("Ada"));
    assert_eq!(
        env.get_property("liftoff.main.banner-mode").as_deref(),
        Some("log")
    );

    assert_eq!(liftoff::exit::exit(&context, &[]), 0);
    assert!(!context.is_active());
}

#[test]
fn test_default_name() {
    let (result, transcript) = run(&[]);
    result.expect("run should succeed");
    assert_eq!(transcript.lines(), vec!["Hello, world!"]);
}

#[test]
fn test_empty_name_is_reported_by_console() {
    let (result, transcript) = run(&["--name="]);
    let err = result.expect_err("empty name should fail");

    assert!(matches!(err, RunError::Startup(_)));
    assert_eq!(err.exit_code(), GREETING_EXIT_CODE);
    assert_eq!(*err.reported_by(), ReportedBy::Reporter("console".to_string()));
    assert!(transcript.lines().is_empty());
}

#[test]
fn test_malformed_argument_fails_the_run() {
    let (result, _) = run(&["--=oops"]);
    let err = result.expect_err("malformed option should fail");
    assert_eq!(err.exit_code(), 0);
    assert_eq!(*err.reported_by(), ReportedBy::Log);
}
