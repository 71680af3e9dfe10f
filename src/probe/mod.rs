//! Broker capability probing
//!
//! [`CapabilityProber`] runs each probe against sessions created by a
//! [`SessionFactory`](crate::transport::SessionFactory). Boundary probes drive
//! [`BoundarySearch`] with a single-size trial; feature probes wait on a
//! [`Latch`] armed before any traffic is sent.

pub mod boundary;
pub mod features;
pub mod limits;
pub mod outcome;
pub mod prober;
pub mod signal;

pub use boundary::{BoundarySearch, SizeTrial, SyncTrial, TrialOutcome};
pub use limits::IDENTIFIER_CHARS;
pub use outcome::{
    qos_from_level, qos_label, qos_level, CharProbeResult, ConnectOutcome, DiscoveryResult,
    IdentifierCharsResult, ProbeOutcome, QosProbeResult, SizedProbeResult, WildcardProbeResult,
};
pub use prober::{CapabilityProber, ProbeReport, ProbeSettings, SuiteStep};
pub use signal::{interruptible_sleep, Interrupt, InterruptHandle, Latch, WaitOutcome};
