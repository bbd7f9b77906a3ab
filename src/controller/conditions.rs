//! Condition Reconciler
//!
//! Maps an aggregate check result to operator conditions. Reconciliation is
//! idempotent: an existing condition with the same reason and status comes
//! back unchanged and flagged as unmodified, so a steady cluster produces no
//! status writes.

use crate::checks::ClusterCheckResult;
use crate::crd::{ConditionStatus, OperatorCondition};
use crate::domain::ports::OperatorStatusClient;
use crate::error::{Error, Result};
use tracing::debug;

/// Reason on conditions that report no problem
pub const REASON_AS_EXPECTED: &str = "AsExpected";

/// Condition paired with whether it differs from the published one
pub type ConditionUpdate = (OperatorCondition, bool);

/// Reconcile one condition against the aggregate result.
///
/// A passing result maps to `True`/`AsExpected`. Anything else uses
/// `blocked_status` and the result's status code as reason.
pub fn reconcile_condition(
    result: &ClusterCheckResult,
    existing: Option<&OperatorCondition>,
    desired_type: &str,
    blocked_status: ConditionStatus,
) -> ConditionUpdate {
    let (status, reason, message) = if result.is_pass() {
        (ConditionStatus::True, REASON_AS_EXPECTED.to_string(), String::new())
    } else {
        (
            blocked_status,
            result.check_status.to_string(),
            result.message().to_string(),
        )
    };
    reconcile(existing, desired_type, status, reason, message)
}

/// `Available` condition for a tick that reached the gate
pub fn available_condition(existing: Option<&OperatorCondition>, desired_type: &str) -> ConditionUpdate {
    reconcile(
        existing,
        desired_type,
        ConditionStatus::True,
        REASON_AS_EXPECTED.to_string(),
        String::new(),
    )
}

/// `Degraded` condition from the outcome of a tick
pub fn degraded_condition(
    existing: Option<&OperatorCondition>,
    desired_type: &str,
    error: Option<&Error>,
) -> ConditionUpdate {
    match error {
        None => reconcile(
            existing,
            desired_type,
            ConditionStatus::False,
            REASON_AS_EXPECTED.to_string(),
            String::new(),
        ),
        Some(error) => {
            let reason = match error {
                Error::ClusterDegraded { status, .. } => status.to_string(),
                Error::SubControllerSync { .. } => "SyncError".to_string(),
                _ => "Error".to_string(),
            };
            reconcile(
                existing,
                desired_type,
                ConditionStatus::True,
                reason,
                error.to_string(),
            )
        }
    }
}

fn reconcile(
    existing: Option<&OperatorCondition>,
    desired_type: &str,
    status: ConditionStatus,
    reason: String,
    message: String,
) -> ConditionUpdate {
    match existing {
        None => (OperatorCondition::new(desired_type, status, reason, message), true),
        Some(current) if current.reason == reason && current.status == status => {
            (current.clone(), false)
        }
        Some(current) => {
            let mut updated = current.clone();
            updated.status = status;
            updated.reason = reason;
            updated.message = message;
            (updated, true)
        }
    }
}

/// Find a condition by type
pub fn find<'a>(conditions: &'a [OperatorCondition], condition_type: &str) -> Option<&'a OperatorCondition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Publish the modified updates in one write and return them
pub async fn publish_changed(
    client: &dyn OperatorStatusClient,
    updates: Vec<ConditionUpdate>,
) -> Result<Vec<OperatorCondition>> {
    let changed: Vec<OperatorCondition> = updates
        .into_iter()
        .filter_map(|(condition, modified)| modified.then_some(condition))
        .collect();

    if changed.is_empty() {
        debug!("Conditions unchanged, skipping status update");
        return Ok(changed);
    }

    client.publish(changed.clone()).await?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckResult, CheckStatus};
    use crate::testing::InMemoryStatusClient;

    const CONDITION_TYPE: &str = "VSphereControllerUpgradeable";

    fn failed(status: CheckStatus) -> ClusterCheckResult {
        ClusterCheckResult::from(CheckResult::deprecated_environment(status, format!("{} failed", status)))
    }

    #[test]
    fn test_missing_condition_is_added() {
        let (condition, modified) = reconcile_condition(
            &failed(CheckStatus::VSphereConnectionFailed),
            None,
            CONDITION_TYPE,
            ConditionStatus::False,
        );
        assert!(modified);
        assert_eq!(condition.r#type, CONDITION_TYPE);
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "VSphereConnectionFailed");
    }

    #[test]
    fn test_equal_condition_is_not_modified() {
        let existing = OperatorCondition::new(
            CONDITION_TYPE,
            ConditionStatus::False,
            "VSphereConnectionFailed",
            "older message",
        );
        let (condition, modified) = reconcile_condition(
            &failed(CheckStatus::VSphereConnectionFailed),
            Some(&existing),
            CONDITION_TYPE,
            ConditionStatus::False,
        );
        assert!(!modified);
        assert_eq!(condition, existing);
    }

    #[test]
    fn test_different_reason_is_modified() {
        let existing = OperatorCondition::new(
            CONDITION_TYPE,
            ConditionStatus::False,
            "DeprecatedVCenter",
            "",
        );
        let (condition, modified) = reconcile_condition(
            &failed(CheckStatus::VSphereConnectionFailed),
            Some(&existing),
            CONDITION_TYPE,
            ConditionStatus::False,
        );
        assert!(modified);
        assert_eq!(condition.reason, "VSphereConnectionFailed");
        assert_eq!(condition.message, "VSphereConnectionFailed failed");
    }

    #[test]
    fn test_status_change_alone_is_modified() {
        let existing = OperatorCondition::new(
            CONDITION_TYPE,
            ConditionStatus::False,
            "VSphereConnectionFailed",
            "",
        );
        let (condition, modified) = reconcile_condition(
            &failed(CheckStatus::VSphereConnectionFailed),
            Some(&existing),
            CONDITION_TYPE,
            ConditionStatus::Unknown,
        );
        assert!(modified);
        assert_eq!(condition.status, ConditionStatus::Unknown);
    }

    #[test]
    fn test_pass_is_as_expected() {
        let (condition, modified) =
            reconcile_condition(&ClusterCheckResult::pass(), None, CONDITION_TYPE, ConditionStatus::False);
        assert!(modified);
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, REASON_AS_EXPECTED);
    }

    #[test]
    fn test_degraded_condition_reason() {
        let error = failed(CheckStatus::DeprecatedVCenter).to_degraded_error();
        let (condition, _) = degraded_condition(None, "VSphereControllerDegraded", Some(&error));
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, "DeprecatedVCenter");

        let (healthy, modified) = degraded_condition(Some(&condition), "VSphereControllerDegraded", None);
        assert!(modified);
        assert_eq!(healthy.status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn test_unchanged_updates_skip_write() {
        let client = InMemoryStatusClient::new();
        let existing = OperatorCondition::new(CONDITION_TYPE, ConditionStatus::True, REASON_AS_EXPECTED, "");
        let changed = publish_changed(&client, vec![(existing, false)]).await.unwrap();
        assert!(changed.is_empty());
        assert_eq!(client.writes(), 0);

        let update = available_condition(None, "VSphereControllerAvailable");
        let changed = publish_changed(&client, vec![update]).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(client.writes(), 1);
        assert!(client.condition("VSphereControllerAvailable").is_some());
    }
}
