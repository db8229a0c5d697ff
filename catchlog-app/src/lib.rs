//! CatchLog identity lifecycle.
//!
//! [`IdentityController`] drives sign-in, sign-out and account switches:
//! session teardown through the guard, key derivation and the background
//! encryption migration. [`CatchlogConfig`] gathers the tunables of every
//! crate below it.

mod config;
mod controller;
mod error;

pub use config::CatchlogConfig;
pub use controller::{AppLayers, IdentityController, SignInOutcome, SignOutOutcome};
pub use error::{AppError, AppResult};

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Safe to call more
/// than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
