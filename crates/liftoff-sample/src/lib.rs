//! # Liftoff Sample
//!
//! A small greeting application assembled with `liftoff`.
//!
//! ## 🚀 Core Components
//!
//! - **[greeting]**: the configuration source. It contributes a greeting runner,
//!   an echo runner and an exit-code mapper for [`GreetingError`](greeting::GreetingError).
//! - **[plugins]**: catalog participants: an audit run listener, a console
//!   exception reporter and a bootstrap initializer that stamps the launch time.
//!
//! ## 📚 Quick Start
//!
//! ```bash
//! RUST_LOG=info cargo run -p liftoff-sample -- --name=Ada --salutation=Hi
//! ```

use std::sync::Arc;

use liftoff::context::Source;
use liftoff::Application;

pub mod greeting;
pub mod plugins;

pub use greeting::Transcript;

/// Builds the sample application. Greetings are written to `transcript`.
pub fn application(transcript: Transcript) -> Application {
    let mut app = Application::new(
        Arc::new(plugins::catalog()),
        [Source::component(greeting::GreetingConfig::new(transcript))],
    );
    app.set_name("liftoff-sample")
        .set_main_source("liftoff_sample::greeting::GreetingConfig")
        .set_default_properties([("liftoff.main.banner-mode", "log")]);
    app
}
