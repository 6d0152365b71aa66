//! Tracing bootstrap for binaries embedding the engine
//!
//! Library code only emits events; installing a subscriber is left to the
//! binary.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `info` (or `debug` when `verbose`).
pub fn init_tracing(verbose: bool) -> Result<(), TryInitError> {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .try_init()
}
