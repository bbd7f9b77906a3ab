//! Environment Checks
//!
//! Probes, result types, the severity aggregator and the TTL scheduler that
//! decides when the probes run.

pub mod aggregate;
pub mod probes;
pub mod result;
pub mod scheduler;
pub mod version;

pub use aggregate::{aggregate, most_severe, ProbeOutcome};
pub use probes::{default_probes, CheckEnvironment, Probe, ProbeRef};
pub use result::{CheckAction, CheckResult, CheckStatus, ClusterCheckResult, ClusterCheckStatus};
pub use scheduler::{CachedCheckState, CheckScheduler};
pub use version::{parse_hardware_version, Version};
