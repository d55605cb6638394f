//! Tracing setup. Logs go to stderr; stdout carries CLI output.

use tracing_subscriber::EnvFilter;

pub const ENV_LOG: &str = "WEAVER_LOG";

/// Default directive for a `-v` count
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,weaver_lib=info,weaver=info",
        2 => "info,weaver_lib=debug,weaver=debug",
        _ => "debug,weaver_lib=trace,weaver=trace",
    }
}

/// Filter from `WEAVER_LOG`, then `RUST_LOG`, then the verbosity default
pub fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_writer(std::io::stderr)
        .try_init();
}
