//! Check Scheduler
//!
//! Bounds how often the probes hit vCenter. Each tick either returns the
//! cached aggregate or runs the whole probe registry again:
//!
//! ```text
//!   get_or_run(now, force)
//!        │
//!        ├── run in flight ──────────────► previous aggregate
//!        ├── now < next_check_at, !force ─► cached aggregate
//!        └── otherwise ─► probes (sequential, timed) ─► aggregate ─► store
//!                                                         │
//!                               pass: steady interval ◄───┴───► fail: backoff
//! ```

use crate::checks::aggregate::{aggregate, ProbeOutcome};
use crate::checks::probes::{CheckEnvironment, ProbeRef};
use crate::checks::result::{CheckResult, ClusterCheckResult};
use crate::config::CheckConfig;
use crate::error::{Error, Result};
use crate::metrics::CheckMetricsRef;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Cached State
// =============================================================================

/// Results of the last completed run
pub struct CachedCheckState {
    /// One outcome per registered probe, in registration order
    pub last_results: Vec<ProbeOutcome>,
    /// Earliest time the probes run again; `None` before the first run
    pub next_check_at: Option<DateTime<Utc>>,
    backoff: ExponentialBackoff,
}

impl CachedCheckState {
    fn new(config: &CheckConfig) -> Self {
        Self {
            last_results: Vec::new(),
            next_check_at: None,
            backoff: failure_backoff(config),
        }
    }
}

fn failure_backoff(config: &CheckConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(config.backoff_initial())
        .with_multiplier(2.0)
        .with_randomization_factor(0.0)
        .with_max_interval(config.backoff_max())
        .with_max_elapsed_time(None)
        .build()
}

// =============================================================================
// Scheduler
// =============================================================================

/// TTL cache in front of the probe registry
pub struct CheckScheduler {
    probes: Vec<ProbeRef>,
    config: CheckConfig,
    probe_timeout: Duration,
    state: Mutex<CachedCheckState>,
    /// Last published aggregate, readable while a run holds `state`
    published: RwLock<Option<ClusterCheckResult>>,
    metrics: Option<CheckMetricsRef>,
}

impl CheckScheduler {
    pub fn new(probes: Vec<ProbeRef>, config: CheckConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout(),
            state: Mutex::new(CachedCheckState::new(&config)),
            published: RwLock::new(None),
            probes,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: CheckMetricsRef) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Aggregate of the last completed run
    pub fn cached(&self) -> Option<ClusterCheckResult> {
        self.published.read().clone()
    }

    /// Return the cached aggregate, or run every probe when it is stale or
    /// `force` is set.
    #[instrument(skip(self, env, cancel), fields(probes = self.probes.len()))]
    pub async fn get_or_run(
        &self,
        now: DateTime<Utc>,
        force: bool,
        env: &CheckEnvironment<'_>,
        cancel: &CancellationToken,
    ) -> Result<ClusterCheckResult> {
        let (mut state, waited) = match self.state.try_lock() {
            Ok(guard) => (guard, false),
            Err(_) => {
                if let Some(previous) = self.cached() {
                    debug!("Check run in flight, returning previous aggregate");
                    return Ok(previous);
                }
                debug!("Check run in flight, waiting for its aggregate");
                let guard = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    guard = self.state.lock() => guard,
                };
                (guard, true)
            }
        };

        if state.next_check_at.is_some() && state.last_results.len() != self.probes.len() {
            return Err(Error::Internal(format!(
                "cached check state holds {} results for {} probes",
                state.last_results.len(),
                self.probes.len()
            )));
        }

        if waited {
            if let Some(previous) = self.cached() {
                return Ok(previous);
            }
        }

        if let Some(next_check_at) = state.next_check_at {
            if !force && now < next_check_at {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_hit();
                }
                debug!(next_check_at = %next_check_at, "Using cached check results");
                return Ok(aggregate(&state.last_results));
            }
        }

        let outcomes = self.run_probes(env, cancel).await?;
        let result = aggregate(&outcomes);

        let interval = if result.is_pass() {
            state.backoff.reset();
            self.config.interval()
        } else {
            state
                .backoff
                .next_backoff()
                .unwrap_or_else(|| self.config.backoff_max())
        };
        let interval = chrono::Duration::from_std(interval)
            .map_err(|e| Error::Internal(format!("invalid check interval: {}", e)))?;

        state.last_results = outcomes;
        state.next_check_at = Some(now + interval);
        *self.published.write() = Some(result.clone());

        if let Some(metrics) = &self.metrics {
            metrics.record_aggregate(&result);
        }

        info!(
            status = %result.status(),
            reason = %result.check_status,
            source = result.source.as_deref().unwrap_or("-"),
            next_check_in_secs = interval.num_seconds(),
            "Environment checks completed"
        );

        Ok(result)
    }

    /// Evaluate every probe in order; cancellation discards the whole batch
    async fn run_probes(
        &self,
        env: &CheckEnvironment<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProbeOutcome>> {
        let mut outcomes = Vec::with_capacity(self.probes.len());

        for probe in &self.probes {
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(probe = probe.name(), "Check run cancelled");
                    return Err(Error::Cancelled);
                }
                evaluated = tokio::time::timeout(self.probe_timeout, probe.evaluate(env)) => {
                    match evaluated {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(probe = probe.name(), timeout = ?self.probe_timeout, "Probe timed out");
                            CheckResult::connection_failed(Error::VCenterTimeout(self.probe_timeout))
                        }
                    }
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_probe(probe.name(), &result.status.to_string(), started.elapsed());
            }
            debug!(probe = probe.name(), status = %result.status, action = %result.action, "Probe evaluated");
            outcomes.push(ProbeOutcome::new(probe.name(), result));
        }

        Ok(outcomes)
    }

    #[cfg(test)]
    pub(crate) async fn overwrite_results(&self, results: Vec<ProbeOutcome>) {
        self.state.lock().await.last_results = results;
    }

    #[cfg(test)]
    pub(crate) async fn next_check_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.next_check_at
    }
}
