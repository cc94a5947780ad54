/// Logging setup using `tracing` + `tracing-subscriber`.
///
/// Filter priority:
/// 1. `STALLWATCH_LOG` environment variable (any `EnvFilter` directive)
/// 2. `--verbose` (debug) or `--quiet` (warn)
/// 3. `log.level` from the config file
///
/// Logs go to stderr so the supervised command's stdout stays untouched.
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "STALLWATCH_LOG";

/// Pick the filter directive for the given flags and configured level.
fn directive(env: Option<String>, verbose: bool, quiet: bool, configured: &str) -> String {
    if let Some(env) = env.filter(|s| !s.trim().is_empty()) {
        return env;
    }
    if verbose {
        "debug".to_string()
    } else if quiet {
        "warn".to_string()
    } else {
        configured.to_string()
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init(verbose: bool, quiet: bool, configured: &str) {
    let directive = directive(std::env::var(LOG_ENV).ok(), verbose, quiet, configured);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}
