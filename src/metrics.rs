//! Operator Metrics
//!
//! Prometheus collectors for the environment checks. `main.rs` registers them
//! on the default registry served at `/metrics`; tests use a private one.

use crate::checks::{CheckAction, ClusterCheckResult};
use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;
use std::time::Duration;

const NAMESPACE: &str = "vsphere_csi_operator";

/// Collectors updated by the check scheduler and the controller
#[derive(Clone)]
pub struct CheckMetrics {
    /// Probe runs by probe name and resulting status
    pub probe_runs: IntCounterVec,
    /// Probe duration by probe name
    pub probe_duration: HistogramVec,
    /// One-hot aggregate action, labelled by action
    pub cluster_status: IntGaugeVec,
    /// Runs answered from the cache
    pub cache_hits: IntGauge,
    /// Operand sub-controller started
    pub operand_started: IntGauge,
}

pub type CheckMetricsRef = Arc<CheckMetrics>;

impl CheckMetrics {
    /// Create collectors and register them on `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let probe_runs = IntCounterVec::new(
            Opts::new("probe_runs_total", "Environment probe evaluations").namespace(NAMESPACE),
            &["probe", "status"],
        )
        .map_err(metrics_error)?;

        let probe_duration = HistogramVec::new(
            HistogramOpts::new("probe_duration_seconds", "Environment probe duration")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
            &["probe"],
        )
        .map_err(metrics_error)?;

        let cluster_status = IntGaugeVec::new(
            Opts::new("cluster_check_status", "Aggregate environment check action")
                .namespace(NAMESPACE),
            &["action"],
        )
        .map_err(metrics_error)?;

        let cache_hits = IntGauge::with_opts(
            Opts::new("check_cache_hits", "Ticks answered from cached check results")
                .namespace(NAMESPACE),
        )
        .map_err(metrics_error)?;

        let operand_started = IntGauge::with_opts(
            Opts::new("operand_started", "Whether the CSI driver operand was started")
                .namespace(NAMESPACE),
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(probe_runs.clone())).map_err(metrics_error)?;
        registry.register(Box::new(probe_duration.clone())).map_err(metrics_error)?;
        registry.register(Box::new(cluster_status.clone())).map_err(metrics_error)?;
        registry.register(Box::new(cache_hits.clone())).map_err(metrics_error)?;
        registry.register(Box::new(operand_started.clone())).map_err(metrics_error)?;

        Ok(Self {
            probe_runs,
            probe_duration,
            cluster_status,
            cache_hits,
            operand_started,
        })
    }

    #[inline]
    pub fn record_probe(&self, probe: &str, status: &str, elapsed: Duration) {
        self.probe_runs.with_label_values(&[probe, status]).inc();
        self.probe_duration
            .with_label_values(&[probe])
            .observe(elapsed.as_secs_f64());
    }

    #[inline]
    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    /// Set the gauge of the aggregate's action to 1, all others to 0
    pub fn record_aggregate(&self, result: &ClusterCheckResult) {
        for action in [
            CheckAction::Pass,
            CheckAction::BlockUpgrade,
            CheckAction::BlockUpgradeViaAdminAck,
            CheckAction::Degrade,
        ] {
            let value = i64::from(action == result.action);
            self.cluster_status
                .with_label_values(&[&action.to_string()])
                .set(value);
        }
    }

    pub fn set_operand_started(&self, started: bool) {
        self.operand_started.set(i64::from(started));
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckResult, CheckStatus};

    #[test]
    fn test_register_twice_fails() {
        let registry = Registry::new();
        assert!(CheckMetrics::register(&registry).is_ok());
        assert!(CheckMetrics::register(&registry).is_err());
    }

    #[test]
    fn test_aggregate_gauge_is_one_hot() {
        let registry = Registry::new();
        let metrics = CheckMetrics::register(&registry).unwrap();
        let result: ClusterCheckResult = CheckResult::deprecated_environment(
            CheckStatus::DeprecatedVCenter,
            "found older vcenter version, expected is 6.7.3",
        )
        .into();
        metrics.record_aggregate(&result);

        assert_eq!(metrics.cluster_status.with_label_values(&["BlockUpgrade"]).get(), 1);
        assert_eq!(metrics.cluster_status.with_label_values(&["Pass"]).get(), 0);

        metrics.record_aggregate(&ClusterCheckResult::pass());
        assert_eq!(metrics.cluster_status.with_label_values(&["BlockUpgrade"]).get(), 0);
        assert_eq!(metrics.cluster_status.with_label_values(&["Pass"]).get(), 1);
    }

    #[test]
    fn test_probe_counter_by_status() {
        let registry = Registry::new();
        let metrics = CheckMetrics::register(&registry).unwrap();
        metrics.record_probe("connectivity", "Pass", Duration::from_millis(5));
        metrics.record_probe("connectivity", "Pass", Duration::from_millis(5));
        metrics.record_probe("connectivity", "VSphereConnectionFailed", Duration::from_millis(5));
        assert_eq!(
            metrics.probe_runs.with_label_values(&["connectivity", "Pass"]).get(),
            2
        );
    }
}
