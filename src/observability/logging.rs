//! Structured logging using the tracing crate
//!
//! Probe runs log their progress on stderr so the report on stdout stays
//! machine-readable.
//!
//! ## Log Format Options
//!
//! - `json` - Structured JSON format for log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to compact
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! LOG_FORMAT=json LOG_LEVEL=INFO mqtt-probe --broker mqtt://localhost all
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG mqtt-probe --broker mqtt://localhost payload
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string, defaulting to compact
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Parse a log level name, defaulting to INFO
pub fn parse_level(s: &str) -> Level {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Level for a `-v` count on top of a base level
pub fn level_for_verbosity(base: Level, verbose: u8) -> Level {
    match verbose {
        0 => base,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn parse_spans(s: &str) -> bool {
    s.to_lowercase() == "true"
}

/// Filter for a base level with noisy dependencies capped at WARN
fn build_filter(level: Level) -> EnvFilter {
    // Allow RUST_LOG to override
    match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => EnvFilter::new(format!("{level},rumqttc=warn,tokio=warn")),
    }
}

/// Initialize logging with manual configuration
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));
    let span_events = if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    };

    match format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_writer(std::io::stderr)
                .with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
    }
}

/// Initialize logging from environment variables, with optional overrides
/// (from the config file or command line) taking precedence
pub fn init_logging_with_overrides(level: Option<Level>, format: Option<LogFormat>) {
    let level = level.unwrap_or_else(|| parse_level(&env::var("LOG_LEVEL").unwrap_or_default()));
    let format = format
        .unwrap_or_else(|| LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default()));
    let include_spans = parse_spans(&env::var("LOG_SPANS").unwrap_or_default());

    init_logging(level, format, include_spans);
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    init_logging_with_overrides(None, None);
}

/// Create a span for one probe
#[macro_export]
macro_rules! probe_span {
    ($($field:tt)*) => {
        tracing::info_span!("probe", $($field)*)
    };
}

/// Create a span for one boundary trial
#[macro_export]
macro_rules! trial_span {
    ($($field:tt)*) => {
        tracing::debug_span!("boundary_trial", $($field)*)
    };
}

pub use {probe_span, trial_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_compact() {
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(""), LogFormat::Compact);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Compact);
    }

    #[test]
    fn test_parse_level() {
        let test_cases = vec![
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Info", Level::INFO),
            ("DEBUG", Level::DEBUG),
            ("trace", Level::TRACE),
            ("invalid", Level::INFO),
            ("", Level::INFO),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_level(input), expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(Level::WARN, 0), Level::WARN);
        assert_eq!(level_for_verbosity(Level::WARN, 1), Level::DEBUG);
        assert_eq!(level_for_verbosity(Level::INFO, 3), Level::TRACE);
    }

    #[test]
    fn test_log_spans_boolean_parsing() {
        let test_cases = vec![
            ("true", true),
            ("TRUE", true),
            ("false", false),
            ("", false),
            ("yes", false),
            ("1", false),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_spans(input), expected, "Failed for input: '{input}'");
        }
    }
}
