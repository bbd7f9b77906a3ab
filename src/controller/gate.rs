//! Sub-controller Gate
//!
//! Decides which gated sub-controllers run on this tick. First installation
//! is cautious: any upgrade block withholds the driver. Once the driver is
//! installed the operand keeps running and failing checks degrade it
//! instead.

use crate::checks::{CheckAction, ClusterCheckResult};
use crate::crd::{MANAGED_BY_OPERATOR_ANNOTATION, VSPHERE_CSI_DRIVER_NAME};
use crate::domain::ports::KubeApiInterface;
use k8s_openapi::api::storage::v1::CSIDriver;
use kube::ResourceExt;

/// What the gate allows on this tick
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// Run both sub-controllers
    Proceed,
    /// Not installed and blocked: run neither
    Refuse,
    /// Another driver already claims the name: run neither
    ForeignDriver { reason: String },
    /// Installed and failing: keep the operand, skip the storage class
    Degrade(ClusterCheckResult),
}

impl GateDecision {
    pub fn runs_operand(&self) -> bool {
        matches!(self, GateDecision::Proceed | GateDecision::Degrade(_))
    }

    pub fn runs_storage_class(&self) -> bool {
        matches!(self, GateDecision::Proceed)
    }
}

fn is_owned(driver: &CSIDriver) -> bool {
    driver
        .annotations()
        .get(MANAGED_BY_OPERATOR_ANNOTATION)
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Whether the driver was brought up by this operator
pub fn installation_marker(api: &dyn KubeApiInterface) -> bool {
    api.get_csi_driver(VSPHERE_CSI_DRIVER_NAME)
        .map(|driver| is_owned(&driver))
        .unwrap_or(false)
}

/// Evidence of a vSphere CSI driver installed by someone else
pub fn foreign_driver(api: &dyn KubeApiInterface) -> Option<String> {
    if let Some(driver) = api.get_csi_driver(VSPHERE_CSI_DRIVER_NAME) {
        if is_owned(&driver) {
            return None;
        }
        return Some(format!(
            "CSIDriver {} exists and is not managed by this operator",
            VSPHERE_CSI_DRIVER_NAME
        ));
    }

    let mut registered: Vec<String> = api
        .list_csi_nodes()
        .iter()
        .filter(|csi_node| {
            csi_node
                .spec
                .drivers
                .iter()
                .any(|d| d.name == VSPHERE_CSI_DRIVER_NAME)
        })
        .map(|csi_node| csi_node.name_any())
        .collect();

    if registered.is_empty() {
        return None;
    }
    registered.sort();
    Some(format!(
        "CSINode objects [{}] already register driver {}",
        registered.join(", "),
        VSPHERE_CSI_DRIVER_NAME
    ))
}

/// Gate the sub-controllers on the aggregate and the installation state.
///
/// `BlockUpgradeViaAdminAck` never withholds or degrades the driver; it only
/// affects the `Upgradeable` condition.
pub fn decide(result: &ClusterCheckResult, installed: bool, foreign: Option<String>) -> GateDecision {
    let blocking = matches!(result.action, CheckAction::BlockUpgrade | CheckAction::Degrade);

    if installed {
        return if blocking {
            GateDecision::Degrade(result.escalate())
        } else {
            GateDecision::Proceed
        };
    }

    if blocking {
        return GateDecision::Refuse;
    }

    match foreign {
        Some(reason) => GateDecision::ForeignDriver { reason },
        None => GateDecision::Proceed,
    }
}
