//! vCenter connection manager.
//!
//! Keeps one session per process and reconnects lazily. A failed attempt is
//! reported as a connectivity result so it ranks with the probe results;
//! the next tick tries again.

use crate::checks::{CheckResult, ClusterCheckResult};
use crate::domain::ports::{ConnectionFactoryRef, VSphereConnectionRef};
use crate::error::Error;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Source name of connection failures in aggregate results
pub const CONNECTION_SOURCE: &str = "connection";

/// Outcome of a connect attempt
pub struct Connected {
    pub connection: Option<VSphereConnectionRef>,
    pub result: ClusterCheckResult,
    /// `true` when an existing live session was reused
    pub keep_existing: bool,
}

pub struct ConnectionManager {
    factory: ConnectionFactoryRef,
    timeout: Duration,
    current: Mutex<Option<VSphereConnectionRef>>,
}

impl ConnectionManager {
    pub fn new(factory: ConnectionFactoryRef, timeout: Duration) -> Self {
        Self {
            factory,
            timeout,
            current: Mutex::new(None),
        }
    }

    /// Reuse the live session or establish a new one
    pub async fn connect(&self) -> Connected {
        let mut current = self.current.lock().await;

        if let Some(existing) = current.as_ref() {
            let alive = tokio::time::timeout(self.timeout, existing.is_alive())
                .await
                .unwrap_or(false);
            if alive {
                return Connected {
                    connection: Some(existing.clone()),
                    result: ClusterCheckResult::pass(),
                    keep_existing: true,
                };
            }
            debug!(server = %existing.server(), "Dropping stale vCenter session");
            *current = None;
        }

        let error = match tokio::time::timeout(self.timeout, self.factory.connect()).await {
            Ok(Ok(connection)) => {
                info!(server = %connection.server(), "Connected to vCenter");
                *current = Some(connection.clone());
                return Connected {
                    connection: Some(connection),
                    result: ClusterCheckResult::pass(),
                    keep_existing: false,
                };
            }
            Ok(Err(e)) => e,
            Err(_) => Error::VCenterTimeout(self.timeout),
        };

        warn!(error = %error, "Failed to connect to vCenter");
        Connected {
            connection: None,
            result: ClusterCheckResult::from_result(
                Some(CONNECTION_SOURCE),
                CheckResult::connection_failed(error),
            ),
            keep_existing: false,
        }
    }
}
