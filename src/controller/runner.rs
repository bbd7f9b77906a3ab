//! Controller Runner
//!
//! Drives the vSphere controller: a tick on every resync interval and on
//! every cluster object change, a `Degraded` condition that mirrors the
//! tick's error and graceful shutdown through a cancellation token.

use crate::controller::conditions::{self, degraded_condition, publish_changed};
use crate::controller::vsphere_controller::VSphereController;
use crate::crd::{condition_type, CONDITION_DEGRADED};
use crate::domain::ports::OperatorStatusClientRef;
use crate::error::{Error, ErrorAction, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ControllerRunner {
    controller: Arc<VSphereController>,
    status: OperatorStatusClientRef,
    resync: Duration,
}

impl ControllerRunner {
    pub fn new(controller: Arc<VSphereController>, status: OperatorStatusClientRef, resync: Duration) -> Self {
        Self {
            controller,
            status,
            resync,
        }
    }

    /// Tick until `cancel` fires.
    ///
    /// Every item from `triggers` schedules an immediate tick.
    pub async fn run<S>(self, triggers: S, cancel: CancellationToken) -> Result<()>
    where
        S: Stream + Unpin,
    {
        let mut triggers = triggers;
        let mut retry = retry_backoff(self.resync);
        let mut delay = Duration::ZERO;

        info!(controller = self.controller.name(), resync = ?self.resync, "Starting controller loop");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                Some(_) = triggers.next() => debug!("Cluster objects changed"),
            }

            let outcome = self.tick(&cancel).await;
            delay = self.next_delay(&outcome, &mut retry);
        }

        info!(controller = self.controller.name(), "Controller loop stopped");
        Ok(())
    }

    /// One controller tick plus the `Degraded` condition update
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<()> {
        let outcome = self.controller.sync(cancel).await;

        match &outcome {
            Ok(()) => self.publish_degraded(None).await,
            Err(e) if e.is_degrading() => {
                warn!(error = %e, "Controller degraded");
                self.publish_degraded(Some(e)).await;
            }
            Err(Error::Cancelled) => debug!("Tick cancelled"),
            Err(e) => error!(error = %e, "Tick failed, retrying on next tick"),
        }

        outcome
    }

    async fn publish_degraded(&self, error: Option<&Error>) {
        let degraded_type = condition_type(self.controller.name(), CONDITION_DEGRADED);
        let update = match self.status.conditions().await {
            Ok(existing) => degraded_condition(conditions::find(&existing, &degraded_type), &degraded_type, error),
            Err(e) => {
                warn!(error = %e, "Failed to read operator conditions");
                return;
            }
        };
        if let Err(e) = publish_changed(self.status.as_ref(), vec![update]).await {
            warn!(error = %e, "Failed to publish Degraded condition");
        }
    }

    fn next_delay(&self, outcome: &Result<()>, retry: &mut ExponentialBackoff) -> Duration {
        match outcome {
            Ok(()) => {
                retry.reset();
                self.resync
            }
            Err(e) => match e.action() {
                ErrorAction::RequeueAfter(after) => after.min(self.resync),
                ErrorAction::RequeueWithBackoff => retry
                    .next_backoff()
                    .unwrap_or(self.resync)
                    .min(self.resync),
                ErrorAction::NoRequeue => self.resync,
            },
        }
    }
}

fn retry_backoff(max: Duration) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(5).min(max))
        .with_max_interval(max)
        .with_max_elapsed_time(None)
        .build()
}
