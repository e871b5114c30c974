#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Liftoff
//!
//! > **A bootstrap orchestrator for plugin-assembled applications.**
//!
//! `liftoff` takes a description of an application (primary sources, settings,
//! listeners, initializers) and drives it from an empty process to a refreshed,
//! running container. Participants are discovered through a typed plugin
//! catalog and notified of every lifecycle phase along the way.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### One orchestrator, many participants
//! The [`Application`] owns the order of operations. Everything else (run
//! listeners, exception reporters, initializers, the container itself) is a
//! trait object supplied by the caller or declared in the [`PluginCatalog`].
//! - **Benefit**: the start sequence is written once and every extension point
//!   is replaceable.
//! - **Trade-off**: participants cannot reorder phases; they can only observe
//!   or fail them.
//!
//! ### Failures are values
//! A run returns `Result<SharedContext, RunError>`. The error carries the
//! resolved exit code and who reported the failure, so a `main` can exit with
//! the right status without global state.
//!
//! ## 🚀 Core Concepts
//!
//! ### Lifecycle phases
//! `starting → environmentPrepared → contextPrepared → contextLoaded → started
//! → running`, with `failed` reachable from any of them. The
//! [`LifecycleBus`](listener::LifecycleBus) rejects out-of-order dispatch.
//!
//! ### Bootstrap context
//! A short-lived, type-keyed registry shared by early participants. It closes
//! when the container is prepared; close listeners see the container.
//!
//! ### Shutdown
//! Containers register with a [`ShutdownCoordinator`](shutdown::ShutdownCoordinator)
//! and are closed exactly once, whether by a signal or an explicit trigger.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Type-Safe Error Handling
//! Each layer has its own `thiserror` enum. Plugin failures are
//! [`BoxError`](error::BoxError)s kept as error sources, so the exit-code
//! resolution can walk the whole cause chain.
//!
//! ### 2. Synchronous runs
//! A run is sequential on the calling thread. Concurrency only enters at the
//! shutdown coordinator, which is guarded by a lock and safe to trigger from
//! several threads at once.
//!
//! ### 3. Observability
//! Every phase runs inside a `lifecycle` span tagged with its step name and is
//! recorded by the configured [`ApplicationStartup`](startup::ApplicationStartup).
//! See [`logging`] for subscriber setup.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Orchestrator ([`application`])
//! - **Key items**: [`Application`], [`ApplicationHooks`](application::ApplicationHooks).
//!
//! ### 2. Discovery ([`plugin`])
//! - **Key items**: [`PluginCatalog`], [`Capability`](plugin::Capability).
//!
//! ### 3. Phases and events ([`listener`], [`events`], [`startup`])
//! - **Key items**: [`RunListener`](listener::RunListener),
//!   [`ApplicationListener`](events::ApplicationListener),
//!   [`EventPublishingRunListener`](events::EventPublishingRunListener).
//!
//! ### 4. State ([`bootstrap`], [`environment`], [`context`], [`arguments`], [`binder`])
//! - **Key items**: [`BootstrapContext`](bootstrap::BootstrapContext),
//!   [`Environment`](environment::Environment),
//!   [`ApplicationContext`](context::ApplicationContext).
//!
//! ### 5. Endings ([`exit`], [`report`], [`shutdown`])
//! - **Key items**: [`resolve_exit_code`](exit::resolve_exit_code),
//!   [`ExceptionReporter`](report::ExceptionReporter).
//!
//! ## 🚀 Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use liftoff::context::Source;
//! use liftoff::{Application, PluginCatalog};
//!
//! liftoff::logging::setup_tracing();
//! let catalog = Arc::new(PluginCatalog::with_defaults());
//! let mut app = Application::new(catalog, [Source::parse("app.web")]);
//! match app.run(std::env::args().skip(1)) {
//!     Ok(context) => println!("{} is up", context.id()),
//!     Err(e) => std::process::exit(e.exit_code()),
//! }
//! ```

pub mod application;
pub mod arguments;
pub mod banner;
pub mod binder;
pub mod bootstrap;
pub mod context;
pub mod environment;
pub mod error;
pub mod events;
pub mod exit;
pub mod listener;
pub mod logging;
pub mod mock;
pub mod plugin;
pub mod report;
pub mod runner;
pub mod shutdown;
pub mod startup;

pub use application::Application;
pub use context::SharedContext;
pub use error::RunError;
pub use plugin::PluginCatalog;
