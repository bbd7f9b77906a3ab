//! vSphere Controller
//!
//! One tick of the environment-check engine:
//!
//! ```text
//!   connect ──► scheduler (TTL) ──► probes ──► aggregate
//!                                                  │
//!                     ┌────────────────────────────┤
//!                     ▼                            ▼
//!            Available / Upgradeable          gate decision
//!               (idempotent write)     ┌───────┬──────┴──┬──────────┐
//!                                   Proceed  Refuse  Foreign    Degrade
//!                                   operand +               operand only,
//!                                 storage class             error returned
//! ```

use crate::checks::{
    default_probes, CheckAction, CheckEnvironment, CheckScheduler, CheckStatus, ClusterCheckResult,
};
use crate::config::OperatorConfig;
use crate::controller::conditions::{self, available_condition, publish_changed, reconcile_condition};
use crate::controller::connection::ConnectionManager;
use crate::controller::events::{ControllerEvent, EventBus};
use crate::controller::gate::{self, GateDecision};
use crate::crd::{condition_type, ConditionStatus, CONDITION_AVAILABLE, CONDITION_UPGRADEABLE};
use crate::domain::ports::{
    AdminAckLookupRef, ClockRef, ConnectionFactoryRef, KubeApiRef, OperatorStatusClientRef,
    SyncController, SyncControllerRef, SystemClock, VSphereConnection,
};
use crate::error::{Error, Result};
use crate::metrics::CheckMetricsRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Collaborators of the vSphere controller
pub struct ControllerDeps {
    pub api: KubeApiRef,
    pub admin_acks: AdminAckLookupRef,
    pub connections: ConnectionFactoryRef,
    pub operand: SyncControllerRef,
    pub storage_class: SyncControllerRef,
    pub status: OperatorStatusClientRef,
}

pub struct VSphereController {
    name: String,
    api: KubeApiRef,
    admin_acks: AdminAckLookupRef,
    connections: ConnectionManager,
    scheduler: CheckScheduler,
    operand: SyncControllerRef,
    storage_class: SyncControllerRef,
    status: OperatorStatusClientRef,
    clock: ClockRef,
    events: EventBus,
    metrics: Option<CheckMetricsRef>,
    operand_started: AtomicBool,
    recheck_requested: AtomicBool,
}

impl VSphereController {
    pub fn new(config: &OperatorConfig, deps: ControllerDeps) -> Self {
        Self {
            name: config.controller_name.clone(),
            api: deps.api,
            admin_acks: deps.admin_acks,
            connections: ConnectionManager::new(deps.connections, config.vcenter.connect_timeout()),
            scheduler: CheckScheduler::new(default_probes(&config.checks), config.checks.clone()),
            operand: deps.operand,
            storage_class: deps.storage_class,
            status: deps.status,
            clock: Arc::new(SystemClock),
            events: EventBus::new(),
            metrics: None,
            operand_started: AtomicBool::new(false),
            recheck_requested: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: CheckMetricsRef) -> Self {
        self.scheduler = self.scheduler.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run the probes on the next tick regardless of the cache
    pub fn request_recheck(&self) {
        self.recheck_requested.store(true, Ordering::SeqCst);
    }

    /// Whether the operand sub-controller has been started in this process
    pub fn operand_controller_started(&self) -> bool {
        self.operand_started.load(Ordering::SeqCst)
    }

    /// One reconciliation tick.
    ///
    /// Returns an error only when the tick could not complete or when an
    /// installed driver is degraded.
    #[instrument(skip(self, cancel), fields(controller = %self.name))]
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<()> {
        let connected = self.connections.connect().await;
        let connection = connected.connection.clone();

        let result = match connection.as_deref() {
            None => connected.result,
            Some(live) => {
                let force = self.recheck_requested.swap(false, Ordering::SeqCst) || !connected.keep_existing;
                let env = CheckEnvironment::new(self.api.as_ref(), Some(live));
                self.scheduler
                    .get_or_run(self.clock.now(), force, &env, cancel)
                    .await?
            }
        };

        self.events.emit(ControllerEvent::ChecksCompleted {
            status: result.status(),
            reason: result.check_status,
        });

        let installed = self.operand_controller_started() || gate::installation_marker(self.api.as_ref());
        let foreign = if installed {
            None
        } else {
            gate::foreign_driver(self.api.as_ref())
        };
        let decision = gate::decide(&result, installed, foreign);
        debug!(?decision, installed, "Gate decision");

        if !matches!(decision, GateDecision::Degrade(_)) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.publish_conditions(&result).await?;
        }

        match decision {
            GateDecision::Proceed => {
                let live = connection.as_deref();
                self.run_sub_controller(self.operand.as_ref(), live).await?;
                if !self.operand_started.swap(true, Ordering::SeqCst) {
                    info!("CSI driver operand started");
                    self.events.emit(ControllerEvent::OperandStarted);
                    if let Some(metrics) = &self.metrics {
                        metrics.set_operand_started(true);
                    }
                }
                self.run_sub_controller(self.storage_class.as_ref(), live).await?;
                Ok(())
            }
            GateDecision::Refuse => {
                info!(
                    reason = %result.check_status,
                    message = %result.message(),
                    "Environment checks failed, not installing the CSI driver"
                );
                self.events.emit(ControllerEvent::InstallBlocked {
                    reason: result.reason.clone(),
                });
                Ok(())
            }
            GateDecision::ForeignDriver { reason } => {
                warn!(reason = %reason, "Existing vSphere CSI driver found, not installing");
                self.events.emit(ControllerEvent::InstallBlocked { reason });
                Ok(())
            }
            GateDecision::Degrade(degraded) => self.degrade(degraded, connection.as_deref()).await,
        }
    }

    /// Keep the operand running and report the failure.
    ///
    /// The operand keeps the live session when there is one; only the storage
    /// class is withheld.
    async fn degrade(
        &self,
        degraded: ClusterCheckResult,
        connection: Option<&dyn VSphereConnection>,
    ) -> Result<()> {
        error!(
            reason = %degraded.check_status,
            message = %degraded.message(),
            "Installed CSI driver is degraded"
        );

        let operand_error = self.operand.sync(connection, self.api.as_ref()).await.err();
        if let Some(e) = &operand_error {
            warn!(controller = self.operand.name(), error = %e, "Operand sync failed on degraded cluster");
        }
        if !self.operand_started.swap(true, Ordering::SeqCst) {
            if let Some(metrics) = &self.metrics {
                metrics.set_operand_started(true);
            }
        }

        self.events.emit(ControllerEvent::Degraded {
            reason: degraded.reason.clone(),
        });

        Err(match (degraded.to_degraded_error(), operand_error) {
            (Error::ClusterDegraded { status, message }, Some(e)) => Error::ClusterDegraded {
                status,
                message: format!("{}; {}", message, e),
            },
            (error, _) => error,
        })
    }

    async fn publish_conditions(&self, result: &ClusterCheckResult) -> Result<()> {
        let existing = self.status.conditions().await?;
        let available_type = condition_type(&self.name, CONDITION_AVAILABLE);
        let upgradeable_type = condition_type(&self.name, CONDITION_UPGRADEABLE);

        let updates = vec![
            available_condition(conditions::find(&existing, &available_type), &available_type),
            reconcile_condition(
                result,
                conditions::find(&existing, &upgradeable_type),
                &upgradeable_type,
                self.blocked_status(result),
            ),
        ];

        for changed in publish_changed(self.status.as_ref(), updates).await? {
            info!(
                condition = %changed.r#type,
                status = %changed.status,
                reason = %changed.reason,
                "Condition updated"
            );
            self.events.emit(ControllerEvent::ConditionChanged {
                condition_type: changed.r#type,
                status: changed.status,
                reason: changed.reason,
            });
        }
        Ok(())
    }

    /// Status of a non-passing `Upgradeable` condition
    fn blocked_status(&self, result: &ClusterCheckResult) -> ConditionStatus {
        if result.check_status == CheckStatus::VSphereConnectionFailed {
            return ConditionStatus::Unknown;
        }
        if result.action == CheckAction::BlockUpgradeViaAdminAck
            && self.admin_acks.is_acknowledged(result.check_status)
        {
            debug!(reason = %result.check_status, "Upgrade block acknowledged by administrator");
            return ConditionStatus::True;
        }
        ConditionStatus::False
    }

    async fn run_sub_controller(
        &self,
        controller: &dyn SyncController,
        connection: Option<&dyn VSphereConnection>,
    ) -> Result<()> {
        controller
            .sync(connection, self.api.as_ref())
            .await
            .map_err(|e| match e {
                Error::SubControllerSync { .. } => e,
                other => Error::SubControllerSync {
                    controller: controller.name().to_string(),
                    reason: other.to_string(),
                },
            })
    }
}
