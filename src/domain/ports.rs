//! Domain Ports - Core trait definitions for the environment-check engine
//!
//! These traits define the boundaries between the check engine and the
//! systems it observes or drives: the Kubernetes object caches, the vCenter
//! endpoint, the gated sub-controllers and the status publisher.

use crate::checks::CheckStatus;
use crate::crd::{OperatorCondition, VSphereStorageDriver};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, PersistentVolume};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Cluster Snapshot Port
// =============================================================================

/// Infrastructure metadata for the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureInfo {
    /// Platform type, "VSphere" on supported clusters
    pub platform: String,
    /// vCenter servers referenced by the cluster
    #[serde(default)]
    pub vcenter_servers: Vec<String>,
}

/// Read-only accessor for the cluster objects the probes inspect
pub trait KubeApiInterface: Send + Sync {
    fn list_nodes(&self) -> Vec<Arc<Node>>;

    fn get_csi_driver(&self, name: &str) -> Option<Arc<CSIDriver>>;

    fn list_csi_nodes(&self) -> Vec<Arc<CSINode>>;

    fn list_persistent_volumes(&self) -> Vec<Arc<PersistentVolume>>;

    /// Configured storage driver for in-tree volumes, if set
    fn storage_driver(&self) -> Option<VSphereStorageDriver>;

    fn infrastructure(&self) -> InfrastructureInfo;
}

/// Administrator acknowledgment of an overridable upgrade block
pub trait AdminAckLookup: Send + Sync {
    fn is_acknowledged(&self, status: CheckStatus) -> bool;
}

// =============================================================================
// vCenter Port
// =============================================================================

/// vCenter appliance version information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VCenterAbout {
    pub version: String,
    #[serde(default)]
    pub build: String,
}

/// ESXi host managed by vCenter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
    pub version: String,
}

/// Live session to a vCenter endpoint
#[async_trait]
pub trait VSphereConnection: Send + Sync {
    /// vCenter server this session talks to
    fn server(&self) -> &str;

    /// Whether the session still answers
    async fn is_alive(&self) -> bool;

    async fn about(&self) -> Result<VCenterAbout>;

    async fn list_hosts(&self) -> Result<Vec<HostInfo>>;

    /// Hardware version of the VM backing a node, `None` if no such VM
    async fn vm_hardware_version(&self, vm_name: &str) -> Result<Option<String>>;
}

/// Establishes new vCenter sessions
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn VSphereConnection>>;
}

// =============================================================================
// Sub-controller Port
// =============================================================================

/// Narrow contract toward the gated sub-controllers
#[async_trait]
pub trait SyncController: Send + Sync {
    fn name(&self) -> &str;

    async fn sync(
        &self,
        connection: Option<&dyn VSphereConnection>,
        api: &dyn KubeApiInterface,
    ) -> Result<()>;
}

// =============================================================================
// Status Publisher Port
// =============================================================================

/// Reads and writes conditions on the operator's published status.
///
/// `publish` owns the read-modify-write and its optimistic concurrency.
#[async_trait]
pub trait OperatorStatusClient: Send + Sync {
    async fn conditions(&self) -> Result<Vec<OperatorCondition>>;

    async fn publish(&self, conditions: Vec<OperatorCondition>) -> Result<()>;
}

// =============================================================================
// Clock Port
// =============================================================================

/// Time source for TTL comparisons
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =============================================================================
// In-Memory Snapshot
// =============================================================================

/// Fixed set of cluster objects implementing the snapshot accessor
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<Arc<Node>>,
    pub csi_drivers: Vec<Arc<CSIDriver>>,
    pub csi_nodes: Vec<Arc<CSINode>>,
    pub persistent_volumes: Vec<Arc<PersistentVolume>>,
    pub storage_driver: Option<VSphereStorageDriver>,
    pub infrastructure: InfrastructureInfo,
    /// Admin-ack ConfigMap data
    pub admin_acks: BTreeMap<String, String>,
}

impl ClusterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(Arc::new(node));
        self
    }

    pub fn with_csi_driver(mut self, driver: CSIDriver) -> Self {
        self.csi_drivers.push(Arc::new(driver));
        self
    }

    pub fn with_csi_node(mut self, csi_node: CSINode) -> Self {
        self.csi_nodes.push(Arc::new(csi_node));
        self
    }

    pub fn with_persistent_volume(mut self, pv: PersistentVolume) -> Self {
        self.persistent_volumes.push(Arc::new(pv));
        self
    }

    pub fn with_storage_driver(mut self, driver: VSphereStorageDriver) -> Self {
        self.storage_driver = Some(driver);
        self
    }

    pub fn with_infrastructure(mut self, infrastructure: InfrastructureInfo) -> Self {
        self.infrastructure = infrastructure;
        self
    }

    pub fn with_admin_ack(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.admin_acks.insert(key.into(), value.into());
        self
    }
}

impl KubeApiInterface for ClusterSnapshot {
    fn list_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.clone()
    }

    fn get_csi_driver(&self, name: &str) -> Option<Arc<CSIDriver>> {
        self.csi_drivers
            .iter()
            .find(|d| d.metadata.name.as_deref() == Some(name))
            .cloned()
    }

    fn list_csi_nodes(&self) -> Vec<Arc<CSINode>> {
        self.csi_nodes.clone()
    }

    fn list_persistent_volumes(&self) -> Vec<Arc<PersistentVolume>> {
        self.persistent_volumes.clone()
    }

    fn storage_driver(&self) -> Option<VSphereStorageDriver> {
        self.storage_driver
    }

    fn infrastructure(&self) -> InfrastructureInfo {
        self.infrastructure.clone()
    }
}

impl AdminAckLookup for ClusterSnapshot {
    fn is_acknowledged(&self, status: CheckStatus) -> bool {
        admin_ack_value_is_true(self.admin_acks.get(&status.admin_ack_key()))
    }
}

/// Acknowledgment values are case-insensitive "true"
pub fn admin_ack_value_is_true(value: Option<&String>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type KubeApiRef = Arc<dyn KubeApiInterface>;
pub type AdminAckLookupRef = Arc<dyn AdminAckLookup>;
pub type VSphereConnectionRef = Arc<dyn VSphereConnection>;
pub type ConnectionFactoryRef = Arc<dyn ConnectionFactory>;
pub type SyncControllerRef = Arc<dyn SyncController>;
pub type OperatorStatusClientRef = Arc<dyn OperatorStatusClient>;
pub type ClockRef = Arc<dyn Clock>;
