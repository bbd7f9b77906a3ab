//! vSphere CSI Driver Operator - Environment Checks
//!
//! Verifies that a vSphere environment can run the vSphere CSI driver and
//! gates the driver's lifecycle on the outcome: installation is withheld on
//! an unsupported environment, an installed driver is reported degraded, and
//! upgrades are blocked until the environment is fixed or acknowledged.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Controller Runner                                   │
//! │        (resync interval, cluster object changes, graceful shutdown)          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Connection    │  │ Check Scheduler │  │   Condition Reconciler      │  │
//! │  │    Manager      │  │   (TTL cache,   │  │  Available / Upgradeable /  │  │
//! │  │                 │  │    backoff)     │  │        Degraded             │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           │           ┌────────┴────────┐                │                   │
//! │           │           │     Probes      │                │                   │
//! │           │           │ connectivity,   │                │                   │
//! │           │           │ versions, hw,   │                │                   │
//! │           │           │ migration       │                │                   │
//! │           │           └────────┬────────┘                │                   │
//! │           │                    │                         │                   │
//! │           └──────────► Sub-controller Gate ◄─────────────┘                   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                        Platform Adapters                                     │
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌──────────────────────┐   │
//! │  │   vCenter REST     │  │  Reflector caches  │  │  CSIDriver and       │   │
//! │  │   sessions         │  │  + status patches  │  │  StorageClass apply  │   │
//! │  └────────────────────┘  └────────────────────┘  └──────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`checks`]: Probes, results, aggregation and the check scheduler
//! - [`controller`]: Connection, conditions, gate and the controller loop
//! - [`platform`]: vCenter and Kubernetes adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain traits
//! - [`config`]: Operator configuration
//! - [`metrics`]: Prometheus collectors
//! - [`error`]: Error types and handling

pub mod checks;
pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod platform;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use checks::{
    aggregate, most_severe, CheckAction, CheckResult, CheckScheduler, CheckStatus,
    ClusterCheckResult, ClusterCheckStatus, Probe, ProbeOutcome, Version,
};

pub use config::{AdminAckConfig, CheckConfig, OperatorConfig, StorageClassConfig, VCenterConfig};

pub use controller::{
    ControllerDeps, ControllerEvent, ControllerRunner, EventBus, GateDecision, VSphereController,
};

pub use crd::{ClusterCSIDriver, ClusterCSIDriverSpec, OperatorCondition, OperatorStatus};

pub use domain::ports::{
    AdminAckLookup, ClusterSnapshot, ConnectionFactory, KubeApiInterface, OperatorStatusClient,
    SyncController, VSphereConnection,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::CheckMetrics;

pub use platform::{
    KubeStatusClient, OperandController, ReflectorApi, RestConnectionFactory, StorageClassController,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
