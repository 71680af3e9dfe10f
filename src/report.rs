//! Rendering of probe results for the command line
//!
//! `pretty` is an indented text summary; `json` is the serde serialization of
//! the result value, so scripts see the same structure the library returns.

use crate::probe::{
    qos_label, ConnectOutcome, DiscoveryResult, IdentifierCharsResult, ProbeOutcome,
    ProbeReport, QosProbeResult, TrialOutcome, WildcardProbeResult,
};
use serde::Serialize;
use std::fmt::Write;

/// Output formatting options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary (default)
    #[default]
    Pretty,
    /// JSON for programmatic processing
    Json,
}

/// Text summary of a result value
pub trait PrettyReport {
    fn pretty(&self) -> String;
}

/// Render a result in the requested format
pub fn render<T>(value: &T, format: OutputFormat) -> Result<String, serde_json::Error>
where
    T: Serialize + PrettyReport + ?Sized,
{
    match format {
        OutputFormat::Pretty => Ok(value.pretty()),
        OutputFormat::Json => serde_json::to_string_pretty(value),
    }
}

impl PrettyReport for ProbeOutcome {
    fn pretty(&self) -> String {
        self.to_string()
    }
}

impl PrettyReport for ConnectOutcome {
    fn pretty(&self) -> String {
        self.to_string()
    }
}

impl PrettyReport for QosProbeResult {
    fn pretty(&self) -> String {
        format!(
            "{}: Received {}/{} publishes in {:.2}ms ({})",
            qos_label(self.qos),
            self.received,
            self.repetitions,
            self.elapsed.as_secs_f64() * 1000.0,
            self.outcome
        )
    }
}

impl PrettyReport for WildcardProbeResult {
    fn pretty(&self) -> String {
        format!(
            "Single-level (+): {}\nMulti-level (#): {}",
            self.single_level, self.multi_level
        )
    }
}

impl<T: TrialOutcome + std::fmt::Display> PrettyReport for DiscoveryResult<T> {
    fn pretty(&self) -> String {
        let mut out = String::new();
        match self.largest_success() {
            Some(size) => {
                let _ = writeln!(out, "Largest accepted: {size} bytes");
            }
            None => {
                let _ = writeln!(out, "Largest accepted: none");
            }
        }
        let _ = write!(out, "Boundary: {} ({} trials)", self.boundary, self.trials.len());
        for trial in &self.trials {
            let _ = write!(out, "\n  {:>8} {}", trial.size, trial.outcome);
        }
        out
    }
}

impl PrettyReport for IdentifierCharsResult {
    fn pretty(&self) -> String {
        if self.all_accepted {
            return "All identifier characters accepted".to_string();
        }

        let rejected: Vec<_> = self.rejected().collect();
        if rejected.is_empty() {
            return "All identifier characters accepted individually".to_string();
        }

        let mut out = format!("Rejected identifier characters ({}):", rejected.len());
        for result in rejected {
            let _ = write!(out, "\n  '{}' {}", result.character, result.outcome);
        }
        out
    }
}

impl PrettyReport for ProbeReport {
    fn pretty(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Connect: {}", self.connect);

        if let Some(result) = &self.topic_length {
            let _ = writeln!(out, "Maximum topic length: {}", size_summary(result));
        }
        if let Some(outcome) = &self.shared_subscription {
            let _ = writeln!(out, "Shared subscriptions: {outcome}");
        }
        for result in &self.qos {
            let _ = writeln!(out, "{}", result.pretty());
        }
        if let Some(outcome) = &self.retain {
            let _ = writeln!(out, "Retain: {outcome}");
        }
        if let Some(result) = &self.wildcard {
            let _ = writeln!(
                out,
                "Wildcard subscriptions: + {}, # {}",
                result.single_level, result.multi_level
            );
        }
        if let Some(result) = &self.payload_size {
            let _ = writeln!(out, "Maximum payload size: {}", size_summary(result));
        }
        if let Some(result) = &self.client_id_length {
            let _ = writeln!(out, "Maximum client id length: {}", size_summary(result));
        }
        if let Some(result) = &self.identifier_chars {
            let _ = writeln!(out, "{}", result.pretty());
        }
        if !self.skipped.is_empty() {
            let names: Vec<String> = self
                .skipped
                .iter()
                .map(|step| format!("{step:?}"))
                .collect();
            let _ = writeln!(out, "Skipped: {}", names.join(", "));
        }
        if self.interrupted {
            let _ = writeln!(out, "Interrupted");
        }
        out.trim_end().to_string()
    }
}

fn size_summary<T: TrialOutcome>(result: &DiscoveryResult<T>) -> String {
    match result.largest_success() {
        Some(size) => format!("{size} bytes"),
        None => "none accepted".to_string(),
    }
}
