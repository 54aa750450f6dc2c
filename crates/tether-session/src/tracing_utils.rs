//! Logging setup and span helpers.
//!
//! Every component logs with `tracing` and structured fields
//! (`session_id`, `request_id`, `version`). [`init_logging`] installs the
//! global subscriber once; later calls are no-ops.

use tether_config::LoggingConfig;
use tracing::{span, Level, Span};
use tracing_subscriber::EnvFilter;

const FALLBACK_FILTER: &str = "info";

/// Install the global fmt subscriber described by `config`.
///
/// Returns `false` if a subscriber was already installed. An invalid filter
/// directive falls back to `info`.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = build_filter(&config.filter);
    let installed = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(filter = %config.filter, json = config.json, "Logging initialized");
    }
    installed
}

fn build_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|err| {
        eprintln!("Invalid log filter '{directives}': {err}; using '{FALLBACK_FILTER}'");
        EnvFilter::new(FALLBACK_FILTER)
    })
}

/// Span covering the lifetime of one session's event loop.
pub fn session_span(session_id: &str) -> Span {
    span!(Level::INFO, "tether_session", session_id = %session_id)
}

/// Span for one inbound RPC.
pub fn rpc_span(session_id: &str, method: &str, request_id: Option<&str>) -> Span {
    span!(
        Level::DEBUG,
        "rpc_request",
        session_id = %session_id,
        method = %method,
        request_id = %request_id.unwrap_or("none"),
    )
}
