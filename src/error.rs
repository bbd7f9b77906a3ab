//! Error types for the vSphere CSI Driver Operator
//!
//! Provides structured error types for the environment checks, the vCenter
//! connection, the gated sub-controllers and the Kubernetes adapters.

use crate::checks::CheckStatus;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // vCenter Errors
    // =========================================================================
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vCenter connection to {server} failed: {reason}")]
    VCenterConnection { server: String, reason: String },

    #[error("vCenter authentication failed for {server}")]
    VCenterAuthentication { server: String },

    #[error("vCenter API error: {operation} - {reason}")]
    VCenterApi { operation: String, reason: String },

    #[error("vCenter request timed out after {0:?}")]
    VCenterTimeout(Duration),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// An already installed driver can no longer be verified
    #[error("{message}")]
    ClusterDegraded { status: CheckStatus, message: String },

    #[error("Sub-controller {controller} sync failed: {reason}")]
    SubControllerSync { controller: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Version parse error: {0}")]
    VersionParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Http(_)
            | Error::Kube(_)
            | Error::VCenterConnection { .. }
            | Error::VCenterTimeout(_) => ErrorAction::RequeueWithBackoff,

            // Degraded driver - check again soon
            Error::ClusterDegraded { .. } | Error::SubControllerSync { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Credentials rarely fix themselves
            Error::VCenterAuthentication { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(300))
            }

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_) | Error::VersionParse(_) | Error::YamlParse(_) => {
                ErrorAction::NoRequeue
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Kube(_)
                | Error::VCenterConnection { .. }
                | Error::VCenterTimeout(_)
        )
    }

    /// Whether this error must be surfaced through the Degraded condition.
    ///
    /// Cancellation and internal logic errors abort the tick without
    /// touching published conditions.
    pub fn is_degrading(&self) -> bool {
        matches!(
            self,
            Error::ClusterDegraded { .. } | Error::SubControllerSync { .. }
        )
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
