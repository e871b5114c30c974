use liftoff::exit::exit;
use liftoff::logging::setup_tracing;
use liftoff_sample::Transcript;
use tracing::info;

fn main() {
    // Setup tracing once for the entire application
    setup_tracing();

    let transcript = Transcript::default();
    let mut app = liftoff_sample::application(transcript.clone());

    let code = match app.run(std::env::args().skip(1)) {
        Ok(context) => {
            for line in transcript.lines() {
                println!("{line}");
            }
            info!("Application completed successfully");
            exit(&context, &[])
        }
        Err(e) if e.exit_code() != 0 => e.exit_code(),
        Err(_) => 1,
    };
    std::process::exit(code);
}
