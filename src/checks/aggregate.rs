//! Result Aggregation
//!
//! Reduces an ordered batch of probe results to the single most severe one.
//! The reduction is stable: among results of equal severity the one that was
//! registered first wins, so a fixed probe order always yields the same
//! aggregate.

use crate::checks::result::{CheckAction, CheckResult, ClusterCheckResult};

/// Result of one probe, tagged with the probe that produced it
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub probe: String,
    pub result: CheckResult,
}

impl ProbeOutcome {
    pub fn new(probe: impl Into<String>, result: CheckResult) -> Self {
        Self {
            probe: probe.into(),
            result,
        }
    }
}

/// Select the most severe result, first-seen wins on ties.
///
/// Returns `None` for an empty batch.
pub fn most_severe<'a, I>(results: I) -> Option<&'a CheckResult>
where
    I: IntoIterator<Item = &'a CheckResult>,
{
    let mut worst: Option<&CheckResult> = None;
    for result in results {
        match worst {
            Some(current) if !result.action.is_worse_than(current.action) => {}
            _ => worst = Some(result),
        }
    }
    worst
}

/// Reduce a batch of probe outcomes to one cluster-wide result
pub fn aggregate(outcomes: &[ProbeOutcome]) -> ClusterCheckResult {
    let mut selected: Option<&ProbeOutcome> = None;
    for outcome in outcomes {
        match selected {
            Some(current) if !outcome.result.action.is_worse_than(current.result.action) => {}
            _ => selected = Some(outcome),
        }
    }

    match selected {
        Some(outcome) if outcome.result.action != CheckAction::Pass => {
            ClusterCheckResult::from_result(Some(&outcome.probe), outcome.result.clone())
        }
        _ => ClusterCheckResult::pass(),
    }
}
