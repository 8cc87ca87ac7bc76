// src/logger.rs

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (`info`, `javagen=debug`, ...).
pub const LOG_ENV: &str = "JAVAGEN_LOG";

/// Install the global subscriber. Logs go to stderr so stdout stays clean
/// for command output. Safe to call more than once.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter(default_level: &str) -> EnvFilter {
    // Fall back to the default level when the variable is unset or invalid.
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}
