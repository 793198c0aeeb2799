//! Tracing setup for the command-line binary.

use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding an `EnvFilter` directive, e.g. `tidywatch=debug`.
pub const LOG_ENV_VAR: &str = "TIDYWATCH_LOG";

/// Filter directive used when [`LOG_ENV_VAR`] is unset or invalid.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init(verbosity: u8) {
    let filter = env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(verbosity)));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time(),
        )
        .with(filter)
        .try_init();
}
