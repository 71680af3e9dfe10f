//! Observability for probe runs: structured logging and span macros

pub mod logging;

pub use logging::{
    init_default_logging, init_logging, init_logging_with_overrides, level_for_verbosity,
    parse_level, LogFormat,
};

// Span macros for structured logging
pub use logging::{probe_span, trial_span};
