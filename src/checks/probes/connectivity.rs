//! Connectivity probe: the vCenter session must still answer.

use super::{CheckEnvironment, Probe};
use crate::checks::result::CheckResult;
use crate::error::Error;
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectivityProbe;

#[async_trait]
impl Probe for ConnectivityProbe {
    fn name(&self) -> &str {
        "connectivity"
    }

    async fn evaluate(&self, env: &CheckEnvironment<'_>) -> CheckResult {
        let connection = match env.require_connection() {
            Ok(c) => c,
            Err(result) => return result,
        };

        if connection.is_alive().await {
            CheckResult::pass()
        } else {
            debug!(server = %connection.server(), "vCenter session did not answer");
            CheckResult::connection_failed(Error::VCenterConnection {
                server: connection.server().to_string(),
                reason: "session is no longer valid".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::result::CheckStatus;
    use crate::domain::ports::ClusterSnapshot;
    use crate::testing::FakeVCenter;

    #[tokio::test]
    async fn test_live_session_passes() {
        let api = ClusterSnapshot::new();
        let vcenter = FakeVCenter::new("7.0.3");
        let env = CheckEnvironment::new(&api, Some(&vcenter));
        assert!(ConnectivityProbe.evaluate(&env).await.is_pass());
    }

    #[tokio::test]
    async fn test_dead_session_fails() {
        let api = ClusterSnapshot::new();
        let vcenter = FakeVCenter::new("7.0.3");
        vcenter.set_alive(false);
        let env = CheckEnvironment::new(&api, Some(&vcenter));
        let result = ConnectivityProbe.evaluate(&env).await;
        assert_eq!(result.status, CheckStatus::VSphereConnectionFailed);
    }

    #[tokio::test]
    async fn test_missing_session_fails() {
        let api = ClusterSnapshot::new();
        let env = CheckEnvironment::new(&api, None);
        let result = ConnectivityProbe.evaluate(&env).await;
        assert_eq!(result.status, CheckStatus::VSphereConnectionFailed);
    }
}
