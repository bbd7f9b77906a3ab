//! ClusterCSIDriver CRD
//!
//! Operator configuration for the vSphere CSI driver. Its status holds the
//! conditions published by the environment-check engine.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the CSI driver managed by this operator
pub const VSPHERE_CSI_DRIVER_NAME: &str = "csi.vsphere.vmware.com";

/// Annotation marking a CSIDriver object as installed by this operator
pub const MANAGED_BY_OPERATOR_ANNOTATION: &str = "csi.openshift.io/managed";

/// Name of the singleton ClusterCSIDriver object
pub const CLUSTER_CSI_DRIVER_OBJECT: &str = "csi.vsphere.vmware.com";

// =============================================================================
// ClusterCSIDriver CRD
// =============================================================================

/// ClusterCSIDriver configures the lifecycle of the vSphere CSI driver.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "ClusterCSIDriver",
    plural = "clustercsidrivers",
    status = "OperatorStatus",
    printcolumn = r#"{"name": "Upgradeable", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"VMwareVSphereControllerUpgradeable\")].status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverSpec {
    /// Whether the operator manages the driver
    #[serde(default)]
    pub management_state: ManagementState,

    /// Which vSphere storage driver serves in-tree volumes
    #[serde(default)]
    pub storage_driver: Option<VSphereStorageDriver>,

    /// Topology categories passed to the driver
    #[serde(default)]
    pub topology_categories: Vec<String>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Management state of the operand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
    Removed,
}

/// Storage driver selection for in-tree vSphere volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum VSphereStorageDriver {
    /// In-tree plugin still serves existing volumes
    LegacyDeprecatedInTreeDriver,
    /// CSI driver serves in-tree volumes through migration
    #[serde(rename = "CSIWithMigrationDriver")]
    CsiWithMigrationDriver,
}

impl VSphereStorageDriver {
    pub fn migration_enabled(&self) -> bool {
        matches!(self, VSphereStorageDriver::CsiWithMigrationDriver)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Published operator status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,

    /// Generation last observed by the operator
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Operator condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    /// Type of condition, controller name plus suffix
    pub r#type: String,
    pub status: ConditionStatus,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl OperatorCondition {
    pub fn new(
        r#type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type.into(),
            status,
            last_transition_time: None,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

impl OperatorStatus {
    /// Find a condition by type
    pub fn condition(&self, condition_type: &str) -> Option<&OperatorCondition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }

    /// Set a condition, stamping the transition time when the status changes
    pub fn set_condition(&mut self, mut condition: OperatorCondition, now: DateTime<Utc>) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.or(Some(now))
            } else {
                Some(now)
            };
            *existing = condition;
        } else {
            condition.last_transition_time = Some(now);
            self.conditions.push(condition);
        }
    }
}

/// Condition type for a controller and suffix
pub fn condition_type(controller_name: &str, suffix: &str) -> String {
    format!("{}{}", controller_name, suffix)
}

pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_UPGRADEABLE: &str = "Upgradeable";
pub const CONDITION_DEGRADED: &str = "Degraded";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_set_condition_stamps_transitions() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);
        let mut status = OperatorStatus::default();

        status.set_condition(
            OperatorCondition::new("CtrlUpgradeable", ConditionStatus::False, "DeprecatedVCenter", ""),
            t0,
        );
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_time, Some(t0));

        // Same status, new reason: transition time kept
        status.set_condition(
            OperatorCondition::new("CtrlUpgradeable", ConditionStatus::False, "DeprecatedHWVersion", ""),
            t1,
        );
        let cond = status.condition("CtrlUpgradeable").unwrap();
        assert_eq!(cond.reason, "DeprecatedHWVersion");
        assert_eq!(cond.last_transition_time, Some(t0));

        // Status flip: transition time moves
        status.set_condition(
            OperatorCondition::new("CtrlUpgradeable", ConditionStatus::True, "AsExpected", ""),
            t1,
        );
        assert_eq!(
            status.condition("CtrlUpgradeable").unwrap().last_transition_time,
            Some(t1)
        );
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_storage_driver_migration() {
        assert!(VSphereStorageDriver::CsiWithMigrationDriver.migration_enabled());
        assert!(!VSphereStorageDriver::LegacyDeprecatedInTreeDriver.migration_enabled());
        let parsed: VSphereStorageDriver = serde_json::from_str("\"CSIWithMigrationDriver\"").unwrap();
        assert_eq!(parsed, VSphereStorageDriver::CsiWithMigrationDriver);
    }

    #[test]
    fn test_condition_type() {
        assert_eq!(
            condition_type("VMwareVSphereController", CONDITION_UPGRADEABLE),
            "VMwareVSphereControllerUpgradeable"
        );
    }
}
