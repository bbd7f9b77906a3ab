//! Controller Events
//!
//! Lifecycle events emitted by the vSphere controller for external consumers
//! such as the event recorder in `main.rs`.

use crate::checks::{CheckStatus, ClusterCheckStatus};
use crate::crd::ConditionStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the vSphere controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControllerEvent {
    /// A check evaluation finished, from fresh probe runs or from the cache
    ChecksCompleted {
        status: ClusterCheckStatus,
        reason: CheckStatus,
    },

    /// A published condition changed
    ConditionChanged {
        condition_type: String,
        status: ConditionStatus,
        reason: String,
    },

    /// The driver operand was started for the first time in this process
    OperandStarted,

    /// First installation withheld
    InstallBlocked { reason: String },

    /// An installed driver can no longer be verified
    Degraded { reason: String },
}

impl ControllerEvent {
    /// Short event reason in CamelCase
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerEvent::ChecksCompleted { .. } => "ChecksCompleted",
            ControllerEvent::ConditionChanged { .. } => "ConditionChanged",
            ControllerEvent::OperandStarted => "OperandStarted",
            ControllerEvent::InstallBlocked { .. } => "InstallBlocked",
            ControllerEvent::Degraded { .. } => "Degraded",
        }
    }

    /// Whether this event reports a problem
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ControllerEvent::InstallBlocked { .. } | ControllerEvent::Degraded { .. }
        )
    }
}

impl std::fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerEvent::ChecksCompleted { status, reason } => {
                write!(f, "environment checks completed: {} ({})", status, reason)
            }
            ControllerEvent::ConditionChanged {
                condition_type,
                status,
                reason,
            } => write!(f, "condition {} is now {} ({})", condition_type, status, reason),
            ControllerEvent::OperandStarted => write!(f, "CSI driver operand started"),
            ControllerEvent::InstallBlocked { reason } => {
                write!(f, "CSI driver installation blocked: {}", reason)
            }
            ControllerEvent::Degraded { reason } => write!(f, "CSI driver degraded: {}", reason),
        }
    }
}

/// Broadcast fan-out of controller events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ControllerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.sender.subscribe()
    }

    /// Send to current subscribers; dropped when nobody listens
    pub fn emit(&self, event: ControllerEvent) {
        let _ = self.sender.send(event);
    }
}
