//! Structured Logging Configuration
//!
//! Every redundancy controller binary logs through `tracing`. This module
//! installs the subscriber:
//! - JSON output for log aggregation (LOG_FORMAT=json)
//! - Human-readable output otherwise
//!
//! # Usage
//!
//! ```rust,ignore
//! use rc_common::logging::init_logging;
//!
//! fn main() {
//!     init_logging("rc-node");
//!
//!     tracing::info!(node_name = %node, "Controller starting");
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: Set to "json" for JSON output, anything else for text (default: text)
//! - `RUST_LOG`: Standard log level filter (default: info)
//!   Examples: `RUST_LOG=debug`, `RUST_LOG=rc_standby=debug,mongodb=warn`

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// Anything other than "json" (case-insensitive) selects text output.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }

    pub fn from_env() -> Self {
        Self::parse(&std::env::var("LOG_FORMAT").unwrap_or_default())
    }
}

/// Map a numeric verbosity (0 = minimal .. 3 = debug) to a filter directive.
///
/// Used when the operator passes a level on the command line instead of
/// setting `RUST_LOG`.
pub fn level_directive(level: u8) -> &'static str {
    match level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize logging with the given service name.
///
/// Reads `RUST_LOG` for filtering (defaults to INFO) and `LOG_FORMAT` for
/// the output format.
pub fn init_logging(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    init_with_filter(service_name, env_filter);
}

/// Initialize logging with an explicit default level, still overridable by `RUST_LOG`.
pub fn init_logging_with_level(service_name: &str, level: u8) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(level)));
    init_with_filter(service_name, env_filter);
}

fn init_with_filter(service_name: &str, env_filter: EnvFilter) {
    match LogFormat::from_env() {
        LogFormat::Json => init_json_logging(env_filter),
        LogFormat::Text => init_text_logging(env_filter),
    }
    tracing::debug!(service = %service_name, "Logging initialized");
}

/// Initialize JSON logging for production.
fn init_json_logging(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(false)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE)
        )
        .init();
}

/// Initialize human-readable text logging for development.
fn init_text_logging(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(true)
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Text);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
    }

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive(0), "warn");
        assert_eq!(level_directive(1), "info");
        assert_eq!(level_directive(2), "debug");
        assert_eq!(level_directive(9), "trace");
    }

    #[test]
    fn test_directives_parse_as_filters() {
        for level in 0..4 {
            let filter = EnvFilter::try_new(level_directive(level));
            assert!(filter.is_ok());
        }
    }
}
