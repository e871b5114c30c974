//! # Tracing Setup
//!
//! Every part of the orchestrator reports through `tracing` with structured
//! fields; lifecycle dispatches run inside a `lifecycle` span carrying the
//! `step` name, and each run is wrapped in a `run` span.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     liftoff::logging::setup_tracing();
//!     // ...
//! }
//! ```
//!
//! Control the output with `RUST_LOG`:
//!
//! ```bash
//! RUST_LOG=info cargo run                        # startup lines only
//! RUST_LOG=liftoff=debug cargo run               # plugins, phases, sources
//! RUST_LOG=info,liftoff::shutdown=debug cargo run
//! ```

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
///
/// Calling it again once a global subscriber exists has no effect.
pub fn setup_tracing() {
    // Err only when a global subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}
