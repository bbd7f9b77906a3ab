//! Per-node hardware capability probe.
//!
//! Every cluster node runs in a VM whose virtual hardware version must be
//! recent enough for the CSI driver.

use super::{CheckEnvironment, Probe};
use crate::checks::aggregate::most_severe;
use crate::checks::result::{CheckResult, CheckStatus};
use crate::checks::version::parse_hardware_version;
use crate::error::Error;
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct NodeHardwareVersionProbe {
    minimum: u32,
}

impl NodeHardwareVersionProbe {
    pub fn new(minimum: u32) -> Self {
        Self { minimum }
    }
}

#[async_trait]
impl Probe for NodeHardwareVersionProbe {
    fn name(&self) -> &str {
        "node-hardware-version"
    }

    async fn evaluate(&self, env: &CheckEnvironment<'_>) -> CheckResult {
        let connection = match env.require_connection() {
            Ok(c) => c,
            Err(result) => return result,
        };

        let mut node_names: Vec<String> = env.api.list_nodes().iter().map(|n| n.name_any()).collect();
        node_names.sort();

        let mut results = Vec::with_capacity(node_names.len());
        let mut outdated = Vec::new();

        for node in &node_names {
            let result = match connection.vm_hardware_version(node).await {
                Err(e) => CheckResult::vcenter_api_error(e),
                Ok(None) => CheckResult::vcenter_api_error(Error::VCenterApi {
                    operation: "find VM".into(),
                    reason: format!("no VM found for node {}", node),
                }),
                Ok(Some(raw)) => match parse_hardware_version(&raw) {
                    Err(e) => CheckResult::vcenter_api_error(e),
                    Ok(version) if version < self.minimum => {
                        outdated.push(format!("{} (vmx-{})", node, version));
                        CheckResult::deprecated_environment(
                            CheckStatus::DeprecatedHwVersion,
                            format!(
                                "node {} has hardware version vmx-{}, which is below the minimum required version vmx-{}",
                                node, version, self.minimum
                            ),
                        )
                    }
                    Ok(version) => {
                        debug!(node = %node, version, "Node hardware version ok");
                        CheckResult::pass()
                    }
                },
            };
            results.push(result);
        }

        let mut worst = match most_severe(&results) {
            Some(r) if !r.is_pass() => r.clone(),
            _ => return CheckResult::pass(),
        };

        if worst.status == CheckStatus::DeprecatedHwVersion && outdated.len() > 1 {
            worst.blocked_message = Some(format!(
                "nodes {} have hardware versions below vmx-{}",
                outdated.join(", "),
                self.minimum
            ));
        }

        warn!(reason = %worst.reason, "Node hardware check failed");
        worst
    }
}
