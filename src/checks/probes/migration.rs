//! Migration readiness probe.
//!
//! vCenter and ESXi releases older than the migration-safe version corrupt
//! volumes during in-tree to CSI migration. On such a platform upgrades may
//! only proceed once nothing uses the in-tree vSphere plugin, or once an
//! administrator accepts the risk.

use super::{CheckEnvironment, Probe};
use crate::checks::result::{CheckAction, CheckResult, CheckStatus, ClusterCheckStatus};
use crate::checks::version::Version;
use crate::domain::ports::{KubeApiInterface, VSphereConnection};
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

/// Prefix of in-tree vSphere volumes in a node's `volumesInUse`
pub const INTREE_VOLUME_PREFIX: &str = "kubernetes.io/vsphere-volume/";

#[derive(Debug, Clone)]
pub struct MigrationReadinessProbe {
    safe_version: Version,
}

impl MigrationReadinessProbe {
    pub fn new(safe_version: Version) -> Self {
        Self { safe_version }
    }

    /// Pass, or a BuggyMigrationPlatform result naming the old components
    async fn check_platform(&self, connection: &dyn VSphereConnection) -> CheckResult {
        let about = match connection.about().await {
            Ok(about) => about,
            Err(e) => return CheckResult::vcenter_api_error(e),
        };
        let hosts = match connection.list_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => return CheckResult::vcenter_api_error(e),
        };

        let mut buggy = Vec::new();
        match about.version.parse::<Version>() {
            Ok(v) if v < self.safe_version => buggy.push(format!("vCenter {}", v)),
            Ok(_) => {}
            Err(e) => return CheckResult::vcenter_api_error(e),
        }
        for host in &hosts {
            match host.version.parse::<Version>() {
                Ok(v) if v < self.safe_version => buggy.push(format!("ESXi host {} {}", host.name, v)),
                Ok(_) => {}
                Err(e) => return CheckResult::vcenter_api_error(e),
            }
        }

        if buggy.is_empty() {
            CheckResult::pass()
        } else {
            CheckResult::buggy_migration_platform(format!(
                "{} older than {} with known CSI migration issues",
                buggy.join(", "),
                self.safe_version
            ))
        }
    }
}

#[async_trait]
impl Probe for MigrationReadinessProbe {
    fn name(&self) -> &str {
        "migration-readiness"
    }

    async fn evaluate(&self, env: &CheckEnvironment<'_>) -> CheckResult {
        let connection = match env.require_connection() {
            Ok(c) => c,
            Err(result) => return result,
        };

        let platform = self.check_platform(connection).await;
        if platform.is_pass() || platform.status != CheckStatus::BuggyMigrationPlatform {
            return platform;
        }

        let (_, result) = check_for_intree_plugin_use(platform, env.api);
        result
    }
}

/// Decide whether a buggy migration platform actually endangers volumes.
///
/// Migration already enabled, or no volume served by the in-tree plugin,
/// means the platform issue cannot bite and the check passes. Otherwise the
/// block can only be lifted by an administrator.
pub fn check_for_intree_plugin_use(
    platform: CheckResult,
    api: &dyn KubeApiInterface,
) -> (ClusterCheckStatus, CheckResult) {
    if api
        .storage_driver()
        .map(|d| d.migration_enabled())
        .unwrap_or(false)
    {
        debug!("CSI migration is enabled, in-tree volumes are served by the CSI driver");
        return (ClusterCheckStatus::AllGood, CheckResult::pass());
    }

    let intree_pvs: Vec<String> = api
        .list_persistent_volumes()
        .iter()
        .filter(|pv| {
            pv.spec
                .as_ref()
                .map(|s| s.vsphere_volume.is_some())
                .unwrap_or(false)
        })
        .map(|pv| pv.name_any())
        .collect();

    let mut nodes_with_volumes: Vec<String> = api
        .list_nodes()
        .iter()
        .filter(|node| {
            node.status
                .as_ref()
                .and_then(|s| s.volumes_in_use.as_ref())
                .map(|volumes| volumes.iter().any(|v| v.starts_with(INTREE_VOLUME_PREFIX)))
                .unwrap_or(false)
        })
        .map(|node| node.name_any())
        .collect();
    nodes_with_volumes.sort();

    if intree_pvs.is_empty() && nodes_with_volumes.is_empty() {
        debug!("No in-tree vSphere volumes found");
        return (ClusterCheckStatus::AllGood, CheckResult::pass());
    }

    info!(
        persistent_volumes = intree_pvs.len(),
        nodes = ?nodes_with_volumes,
        "In-tree vSphere volumes in use on a buggy migration platform"
    );

    let reason = format!(
        "{}; found {} in-tree vSphere persistent volumes and in-tree volumes in use on nodes [{}]",
        platform.reason,
        intree_pvs.len(),
        nodes_with_volumes.join(", ")
    );
    let mut result = CheckResult::new(
        CheckStatus::IntreePluginInUse,
        CheckAction::BlockUpgradeViaAdminAck,
        reason,
    )
    .with_blocked_message(format!(
        "{}. Upgrading requires an administrator acknowledgment ({})",
        platform.reason,
        CheckStatus::IntreePluginInUse.admin_ack_key()
    ));
    result.error = platform.error;

    (ClusterCheckStatus::UpgradesBlockedViaAdminAck, result)
}
