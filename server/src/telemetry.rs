//! Tracing subscriber setup.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(String),
}

/// Installs the global subscriber on first call; later calls are no-ops.
///
/// `RUST_LOG` wins over `default_filter` when set.
pub fn initialise(default_filter: &str) -> Result<(), TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(default_filter))
        .map(|_| ())
}

fn install_subscriber(default_filter: &str) -> Result<(), TelemetryError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(from_env) => EnvFilter::try_new(from_env),
        Err(_) => EnvFilter::try_new(default_filter),
    }
    .map_err(|e| TelemetryError::Filter(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}
