//! Environment Probes
//!
//! Each probe inspects one aspect of the vCenter environment or of the
//! cluster's own objects and reports a single [`CheckResult`]. Probes never
//! mutate state and never return raw errors: every failure is folded into a
//! result so the aggregator can rank it.

pub mod connectivity;
pub mod hardware;
pub mod migration;
pub mod platform_version;

pub use connectivity::*;
pub use hardware::*;
pub use migration::*;
pub use platform_version::*;

use crate::checks::result::CheckResult;
use crate::config::CheckConfig;
use crate::domain::ports::{KubeApiInterface, VSphereConnection};
use crate::error::Error;
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a probe may look at during one evaluation
#[derive(Clone, Copy)]
pub struct CheckEnvironment<'a> {
    pub api: &'a dyn KubeApiInterface,
    pub connection: Option<&'a dyn VSphereConnection>,
}

impl<'a> CheckEnvironment<'a> {
    pub fn new(api: &'a dyn KubeApiInterface, connection: Option<&'a dyn VSphereConnection>) -> Self {
        Self { api, connection }
    }

    /// Live connection, or the connectivity failure to report instead
    pub fn require_connection(&self) -> std::result::Result<&'a dyn VSphereConnection, CheckResult> {
        self.connection.ok_or_else(|| {
            CheckResult::connection_failed(Error::VCenterConnection {
                server: self.api.infrastructure().vcenter_servers.join(","),
                reason: "no vCenter session available".into(),
            })
        })
    }
}

/// A single independent health check
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable name used in logs, metrics and aggregate results
    fn name(&self) -> &str;

    async fn evaluate(&self, env: &CheckEnvironment<'_>) -> CheckResult;
}

pub type ProbeRef = Arc<dyn Probe>;

/// Probes in registration order.
///
/// The order is part of the aggregation contract: among equally severe
/// failures the earlier probe is reported.
pub fn default_probes(config: &CheckConfig) -> Vec<ProbeRef> {
    vec![
        Arc::new(ConnectivityProbe),
        Arc::new(VCenterVersionProbe::new(config.min_vcenter_version)),
        Arc::new(EsxiVersionProbe::new(config.min_esxi_version)),
        Arc::new(NodeHardwareVersionProbe::new(config.min_hardware_version)),
        Arc::new(MigrationReadinessProbe::new(config.migration_safe_version)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckAction, CheckStatus};
    use crate::domain::ports::{ClusterSnapshot, InfrastructureInfo};

    #[test]
    fn test_default_probe_order() {
        let names: Vec<String> = default_probes(&CheckConfig::default())
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "connectivity",
                "vcenter-version",
                "esxi-version",
                "node-hardware-version",
                "migration-readiness",
            ]
        );
    }

    #[test]
    fn test_missing_session_names_configured_servers() {
        let api = ClusterSnapshot::new().with_infrastructure(InfrastructureInfo {
            platform: "VSphere".into(),
            vcenter_servers: vec!["vc-1.example.com".into(), "vc-2.example.com".into()],
        });
        let env = CheckEnvironment::new(&api, None);

        let result = match env.require_connection() {
            Ok(_) => panic!("no session was provided"),
            Err(result) => result,
        };
        assert_eq!(result.status, CheckStatus::VSphereConnectionFailed);
        assert_eq!(result.action, CheckAction::BlockUpgrade);
        assert_eq!(
            result.reason,
            "Failed to connect to vSphere: vCenter connection to vc-1.example.com,vc-2.example.com failed: no vCenter session available"
        );
    }
}
