//! Version-compatibility probes for vCenter and the ESXi hosts it manages.

use super::{CheckEnvironment, Probe};
use crate::checks::result::{CheckResult, CheckStatus};
use crate::checks::version::Version;
use async_trait::async_trait;
use tracing::{debug, warn};

// =============================================================================
// vCenter
// =============================================================================

/// Blocks upgrades while vCenter is older than the supported minimum
#[derive(Debug, Clone)]
pub struct VCenterVersionProbe {
    minimum: Version,
}

impl VCenterVersionProbe {
    pub fn new(minimum: Version) -> Self {
        Self { minimum }
    }
}

#[async_trait]
impl Probe for VCenterVersionProbe {
    fn name(&self) -> &str {
        "vcenter-version"
    }

    async fn evaluate(&self, env: &CheckEnvironment<'_>) -> CheckResult {
        let connection = match env.require_connection() {
            Ok(c) => c,
            Err(result) => return result,
        };

        let about = match connection.about().await {
            Ok(about) => about,
            Err(e) => return CheckResult::vcenter_api_error(e),
        };

        let version = match about.version.parse::<Version>() {
            Ok(v) => v,
            Err(e) => return CheckResult::vcenter_api_error(e),
        };

        debug!(version = %version, minimum = %self.minimum, "Checked vCenter version");

        if version < self.minimum {
            warn!(version = %version, minimum = %self.minimum, "vCenter version is deprecated");
            return CheckResult::deprecated_environment(
                CheckStatus::DeprecatedVCenter,
                format!("found older vcenter version, expected is {}", self.minimum),
            )
            .with_blocked_message(format!(
                "vCenter version {} is older than the minimum supported version {}",
                version, self.minimum
            ));
        }

        CheckResult::pass()
    }
}

// =============================================================================
// ESXi
// =============================================================================

/// Blocks upgrades while any ESXi host is older than the supported minimum
#[derive(Debug, Clone)]
pub struct EsxiVersionProbe {
    minimum: Version,
}

impl EsxiVersionProbe {
    pub fn new(minimum: Version) -> Self {
        Self { minimum }
    }
}

#[async_trait]
impl Probe for EsxiVersionProbe {
    fn name(&self) -> &str {
        "esxi-version"
    }

    async fn evaluate(&self, env: &CheckEnvironment<'_>) -> CheckResult {
        let connection = match env.require_connection() {
            Ok(c) => c,
            Err(result) => return result,
        };

        let hosts = match connection.list_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => return CheckResult::vcenter_api_error(e),
        };

        let mut outdated = Vec::new();
        for host in &hosts {
            match host.version.parse::<Version>() {
                Ok(v) if v < self.minimum => outdated.push(format!("{} ({})", host.name, v)),
                Ok(_) => {}
                Err(e) => return CheckResult::vcenter_api_error(e),
            }
        }

        if outdated.is_empty() {
            return CheckResult::pass();
        }

        warn!(hosts = ?outdated, minimum = %self.minimum, "ESXi hosts run a deprecated version");
        CheckResult::deprecated_environment(
            CheckStatus::DeprecatedEsxiVersion,
            format!(
                "found older ESXi version on hosts {}, expected is {}",
                outdated.join(", "),
                self.minimum
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::result::CheckAction;
    use crate::domain::ports::ClusterSnapshot;
    use crate::testing::FakeVCenter;

    #[tokio::test]
    async fn test_vcenter_at_minimum_passes() {
        let api = ClusterSnapshot::new();
        let vcenter = FakeVCenter::new("6.7.3");
        let env = CheckEnvironment::new(&api, Some(&vcenter));
        let probe = VCenterVersionProbe::new(Version::new(6, 7, 3));
        assert!(probe.evaluate(&env).await.is_pass());
    }

    #[tokio::test]
    async fn test_older_vcenter_blocks_upgrade() {
        let api = ClusterSnapshot::new();
        let vcenter = FakeVCenter::new("6.5.0");
        let env = CheckEnvironment::new(&api, Some(&vcenter));
        let result = VCenterVersionProbe::new(Version::new(6, 7, 3))
            .evaluate(&env)
            .await;
        assert_eq!(result.status, CheckStatus::DeprecatedVCenter);
        assert_eq!(result.action, CheckAction::BlockUpgrade);
        assert_eq!(result.reason, "found older vcenter version, expected is 6.7.3");
        assert!(result.message().contains("6.5.0"));
    }

    #[tokio::test]
    async fn test_vcenter_api_failure_is_a_result() {
        let api = ClusterSnapshot::new();
        let vcenter = FakeVCenter::new("7.0.3");
        vcenter.fail_api_calls(true);
        let env = CheckEnvironment::new(&api, Some(&vcenter));
        let result = VCenterVersionProbe::new(Version::new(6, 7, 3))
            .evaluate(&env)
            .await;
        assert_eq!(result.status, CheckStatus::VCenterApiError);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_older_esxi_host_blocks_upgrade() {
        let api = ClusterSnapshot::new();
        let vcenter = FakeVCenter::new("7.0.3");
        vcenter.set_host_version("esxi-1", "7.0.3");
        vcenter.set_host_version("esxi-2", "6.5.0");
        let env = CheckEnvironment::new(&api, Some(&vcenter));
        let result = EsxiVersionProbe::new(Version::new(6, 7, 3))
            .evaluate(&env)
            .await;
        assert_eq!(result.status, CheckStatus::DeprecatedEsxiVersion);
        assert!(result.reason.contains("esxi-2"));
        assert!(!result.reason.contains("esxi-1"));
    }

    #[tokio::test]
    async fn test_current_esxi_hosts_pass() {
        let api = ClusterSnapshot::new();
        let vcenter = FakeVCenter::new("7.0.3");
        vcenter.set_host_version("esxi-1", "7.0.2");
        let env = CheckEnvironment::new(&api, Some(&vcenter));
        assert!(EsxiVersionProbe::new(Version::new(6, 7, 3))
            .evaluate(&env)
            .await
            .is_pass());
    }
}
