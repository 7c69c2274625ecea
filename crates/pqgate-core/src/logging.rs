//! Tracing subscriber setup shared by the binary and integration tests.

use tracing_subscriber::EnvFilter;

/// Environment variable switching log output to JSON lines.
pub const LOG_JSON_ENV: &str = "PQGATE_LOG_JSON";

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "pqgate=info";

/// Whether JSON logging was requested through the environment.
pub fn json_requested() -> bool {
    std::env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false)
}

/// Install the global tracing subscriber. Logs go to stderr so command
/// output on stdout stays clean.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(DEFAULT_FILTER).add_directive(tracing::Level::WARN.into())
    });

    let result = if json {
        // JSON format for container deployments
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
