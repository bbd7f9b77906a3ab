//! Check Results
//!
//! Status codes, severity classes and result values produced by the
//! environment probes and by the aggregator.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Check Status
// =============================================================================

/// Machine-readable outcome of a check, surfaced as the condition reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckStatus {
    Pass,
    VSphereConnectionFailed,
    DeprecatedVCenter,
    #[serde(rename = "DeprecatedESXIVersion")]
    DeprecatedEsxiVersion,
    #[serde(rename = "DeprecatedHWVersion")]
    DeprecatedHwVersion,
    BuggyMigrationPlatform,
    IntreePluginInUse,
    #[serde(rename = "VCenterAPIError")]
    VCenterApiError,
}

impl CheckStatus {
    /// Key an administrator sets in the acknowledgment ConfigMap
    pub fn admin_ack_key(&self) -> String {
        format!("ack-{}", self)
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "Pass"),
            CheckStatus::VSphereConnectionFailed => write!(f, "VSphereConnectionFailed"),
            CheckStatus::DeprecatedVCenter => write!(f, "DeprecatedVCenter"),
            CheckStatus::DeprecatedEsxiVersion => write!(f, "DeprecatedESXIVersion"),
            CheckStatus::DeprecatedHwVersion => write!(f, "DeprecatedHWVersion"),
            CheckStatus::BuggyMigrationPlatform => write!(f, "BuggyMigrationPlatform"),
            CheckStatus::IntreePluginInUse => write!(f, "IntreePluginInUse"),
            CheckStatus::VCenterApiError => write!(f, "VCenterAPIError"),
        }
    }
}

// =============================================================================
// Check Action
// =============================================================================

/// Severity class of a check result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckAction {
    Pass,
    BlockUpgrade,
    BlockUpgradeViaAdminAck,
    Degrade,
}

impl CheckAction {
    /// Explicit severity rank; higher is worse
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            CheckAction::Pass => 0,
            CheckAction::BlockUpgrade => 1,
            CheckAction::BlockUpgradeViaAdminAck => 2,
            CheckAction::Degrade => 3,
        }
    }

    /// Whether this action is strictly more severe than `other`
    #[inline]
    pub fn is_worse_than(self, other: CheckAction) -> bool {
        self.rank() > other.rank()
    }
}

impl std::fmt::Display for CheckAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckAction::Pass => write!(f, "Pass"),
            CheckAction::BlockUpgrade => write!(f, "BlockUpgrade"),
            CheckAction::BlockUpgradeViaAdminAck => write!(f, "BlockUpgradeViaAdminAck"),
            CheckAction::Degrade => write!(f, "Degrade"),
        }
    }
}

// =============================================================================
// Aggregate Status
// =============================================================================

/// Cluster-wide status derived from the worst action of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterCheckStatus {
    AllGood,
    UpgradesBlocked,
    UpgradesBlockedViaAdminAck,
    ClusterDegraded,
}

impl From<CheckAction> for ClusterCheckStatus {
    fn from(action: CheckAction) -> Self {
        match action {
            CheckAction::Pass => ClusterCheckStatus::AllGood,
            CheckAction::BlockUpgrade => ClusterCheckStatus::UpgradesBlocked,
            CheckAction::BlockUpgradeViaAdminAck => ClusterCheckStatus::UpgradesBlockedViaAdminAck,
            CheckAction::Degrade => ClusterCheckStatus::ClusterDegraded,
        }
    }
}

impl std::fmt::Display for ClusterCheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterCheckStatus::AllGood => write!(f, "AllGood"),
            ClusterCheckStatus::UpgradesBlocked => write!(f, "UpgradesBlocked"),
            ClusterCheckStatus::UpgradesBlockedViaAdminAck => {
                write!(f, "UpgradesBlockedViaAdminAck")
            }
            ClusterCheckStatus::ClusterDegraded => write!(f, "ClusterDegraded"),
        }
    }
}

// =============================================================================
// Probe Result
// =============================================================================

/// Result of a single probe invocation
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub action: CheckAction,
    /// Human-readable explanation
    pub reason: String,
    /// Underlying failure, if any
    pub error: Option<Arc<Error>>,
    /// Message shown on the blocking condition; defaults to `reason`
    pub blocked_message: Option<String>,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            status: CheckStatus::Pass,
            action: CheckAction::Pass,
            reason: String::new(),
            error: None,
            blocked_message: None,
        }
    }

    pub fn new(status: CheckStatus, action: CheckAction, reason: impl Into<String>) -> Self {
        Self {
            status,
            action,
            reason: reason.into(),
            error: None,
            blocked_message: None,
        }
    }

    pub fn with_error(mut self, error: Error) -> Self {
        self.error = Some(Arc::new(error));
        self
    }

    pub fn with_blocked_message(mut self, message: impl Into<String>) -> Self {
        self.blocked_message = Some(message.into());
        self
    }

    /// Session to vCenter could not be established or has gone away
    pub fn connection_failed(error: Error) -> Self {
        let reason = format!("Failed to connect to vSphere: {}", error);
        Self::new(CheckStatus::VSphereConnectionFailed, CheckAction::BlockUpgrade, reason)
            .with_error(error)
    }

    /// Platform version is older than what the driver supports
    pub fn deprecated_environment(status: CheckStatus, reason: impl Into<String>) -> Self {
        Self::new(status, CheckAction::BlockUpgrade, reason)
    }

    /// Platform version is known to mishandle in-tree volume migration
    pub fn buggy_migration_platform(reason: impl Into<String>) -> Self {
        Self::new(
            CheckStatus::BuggyMigrationPlatform,
            CheckAction::BlockUpgrade,
            reason,
        )
    }

    /// vCenter answered, but an API call failed
    pub fn vcenter_api_error(error: Error) -> Self {
        let reason = format!("vCenter API error: {}", error);
        Self::new(CheckStatus::VCenterApiError, CheckAction::BlockUpgrade, reason).with_error(error)
    }

    pub fn is_pass(&self) -> bool {
        self.action == CheckAction::Pass
    }

    /// Message to publish on a blocking condition
    pub fn message(&self) -> &str {
        self.blocked_message.as_deref().unwrap_or(&self.reason)
    }
}

// =============================================================================
// Aggregate Result
// =============================================================================

/// Single result selected from a batch of probe results
#[derive(Debug, Clone)]
pub struct ClusterCheckResult {
    pub check_status: CheckStatus,
    pub action: CheckAction,
    pub reason: String,
    pub error: Option<Arc<Error>>,
    pub blocked_message: Option<String>,
    /// Probe whose result was selected
    pub source: Option<String>,
}

impl ClusterCheckResult {
    pub fn pass() -> Self {
        Self::from_result(None, CheckResult::pass())
    }

    /// Lift a probe result to cluster scope
    pub fn from_result(source: Option<&str>, result: CheckResult) -> Self {
        Self {
            check_status: result.status,
            action: result.action,
            reason: result.reason,
            error: result.error,
            blocked_message: result.blocked_message,
            source: source.map(str::to_string),
        }
    }

    pub fn status(&self) -> ClusterCheckStatus {
        self.action.into()
    }

    pub fn is_pass(&self) -> bool {
        self.action == CheckAction::Pass
    }

    pub fn message(&self) -> &str {
        self.blocked_message.as_deref().unwrap_or(&self.reason)
    }

    /// Same result reclassified as degrading an installed driver
    pub fn escalate(&self) -> Self {
        let mut escalated = self.clone();
        escalated.action = CheckAction::Degrade;
        escalated
    }

    /// Error handed to the outer driver for a degraded cluster
    pub fn to_degraded_error(&self) -> Error {
        let message = if self.reason.is_empty() {
            format!("cluster check {} degraded the driver", self.check_status)
        } else {
            self.reason.clone()
        };
        Error::ClusterDegraded {
            status: self.check_status,
            message,
        }
    }
}

impl From<CheckResult> for ClusterCheckResult {
    fn from(result: CheckResult) -> Self {
        Self::from_result(None, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_rank_is_total() {
        let ordered = [
            CheckAction::Pass,
            CheckAction::BlockUpgrade,
            CheckAction::BlockUpgradeViaAdminAck,
            CheckAction::Degrade,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[1].is_worse_than(pair[0]));
            assert!(!pair[0].is_worse_than(pair[1]));
        }
        assert!(!CheckAction::Degrade.is_worse_than(CheckAction::Degrade));
    }

    #[test]
    fn test_cluster_status_from_action() {
        assert_eq!(
            ClusterCheckStatus::from(CheckAction::Pass),
            ClusterCheckStatus::AllGood
        );
        assert_eq!(
            ClusterCheckStatus::from(CheckAction::BlockUpgradeViaAdminAck),
            ClusterCheckStatus::UpgradesBlockedViaAdminAck
        );
        assert_eq!(
            ClusterCheckStatus::from(CheckAction::Degrade),
            ClusterCheckStatus::ClusterDegraded
        );
    }

    #[test]
    fn test_status_display_matches_reason_codes() {
        assert_eq!(CheckStatus::DeprecatedEsxiVersion.to_string(), "DeprecatedESXIVersion");
        assert_eq!(CheckStatus::VCenterApiError.to_string(), "VCenterAPIError");
        assert_eq!(
            CheckStatus::IntreePluginInUse.admin_ack_key(),
            "ack-IntreePluginInUse"
        );
    }

    #[test]
    fn test_connection_failed_result() {
        let result = CheckResult::connection_failed(Error::VCenterConnection {
            server: "vc.local".into(),
            reason: "connection refused".into(),
        });
        assert_eq!(result.status, CheckStatus::VSphereConnectionFailed);
        assert_eq!(result.action, CheckAction::BlockUpgrade);
        assert!(result.reason.starts_with("Failed to connect to vSphere:"));
        assert!(result.error.is_some());
    }

    #[test]
    fn test_escalate_keeps_reason() {
        let result: ClusterCheckResult = CheckResult::deprecated_environment(
            CheckStatus::DeprecatedVCenter,
            "found older vcenter version, expected is 6.7.3",
        )
        .into();
        let escalated = result.escalate();
        assert_eq!(escalated.action, CheckAction::Degrade);
        assert_eq!(escalated.check_status, CheckStatus::DeprecatedVCenter);
        assert_eq!(escalated.reason, result.reason);
        assert_eq!(
            escalated.to_degraded_error().to_string(),
            "found older vcenter version, expected is 6.7.3"
        );
    }
}
