//! Replication-lag evaluation
//!
//! The lag metric decides when the cutover may happen. Two predicates are
//! deliberately asymmetric: "acceptably low" trusts a single newest point
//! because an old zero can be stale, while "reached zero" wants three
//! consecutive zeros because transient zeros occur while writes quiesce.
//! The thresholds here are load-bearing; do not tune them.

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::gcp::GcpError;
use crate::manager::Manager;
use crate::resolved::{GcpProject, Instance, REGION};
use crate::retry::{retry, retryable, terminal};

const LAG_METRIC: &str =
    "cloudsql.googleapis.com/database/postgresql/external_sync/max_replica_byte_lag";

/// A single fresh point at or below this is close enough to cut over
const ACCEPTABLE_LAG_BYTES: i64 = 16 * 1024 * 1024;

/// Number of consecutive zero points required before promoting
const ZERO_POINTS_REQUIRED: usize = 3;

/// Query window and alignment
const LAG_WINDOW_MINUTES: i64 = 5;
const ALIGNMENT_SECS: u64 = 60;

const LAG_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const LAG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum LagError {
    #[error("Google API error: {0}")]
    Gcp(#[from] GcpError),

    #[error("no replication lag data for {0}")]
    NoData(String),

    #[error("replication lag predicate not satisfied for {0}")]
    NotSatisfied(String),
}

pub type Result<T, E = LagError> = std::result::Result<T, E>;

/// Lag condition to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagPredicate {
    /// At least one point, and the newest is at most 16 MiB behind
    AcceptablyLow,
    /// At least three points, the newest three all exactly zero
    ReachedZero,
}

impl LagPredicate {
    /// Evaluate against the aligned points, newest first.
    pub fn evaluate(&self, points: &[i64]) -> bool {
        match self {
            LagPredicate::AcceptablyLow => points
                .first()
                .map(|&lag| lag <= ACCEPTABLE_LAG_BYTES)
                .unwrap_or(false),
            LagPredicate::ReachedZero => {
                points.len() >= ZERO_POINTS_REQUIRED
                    && points[..ZERO_POINTS_REQUIRED].iter().all(|&lag| lag == 0)
            }
        }
    }
}

/// Poll the lag time series for the target until `predicate` holds.
///
/// An empty query result is retryable: the metric only appears some time
/// after replication starts. A point of any type other than int64 is a
/// hard error.
pub async fn wait_for_replication_lag(
    mgr: &Manager,
    project: &GcpProject,
    target: &Instance,
    predicate: LagPredicate,
) -> Result<()> {
    let filter = format!(
        "metric.type = \"{LAG_METRIC}\" AND resource.labels.region = \"{REGION}\" AND resource.labels.database_id = \"{}:{}\"",
        project.id, target.name,
    );

    retry(LAG_TIMEOUT, LAG_INTERVAL, || {
        let filter = filter.clone();
        async move {
            let end = Utc::now();
            let start = end - chrono::Duration::minutes(LAG_WINDOW_MINUTES);

            let mut series = mgr
                .monitoring
                .list_time_series(&project.id, &filter, start, end, ALIGNMENT_SECS)
                .await
                .map_err(|e| retryable(LagError::from(e)))?;

            let Some(first) = series.drain(..).next() else {
                info!(instance = %target.name, "no replication lag data yet");
                return Err(retryable(LagError::NoData(target.name.clone())));
            };

            let points = first
                .points
                .iter()
                .map(|p| p.value.as_i64())
                .collect::<std::result::Result<Vec<i64>, GcpError>>()
                .map_err(|e| terminal(LagError::from(e)))?;

            if predicate.evaluate(&points) {
                info!(instance = %target.name, newest = ?points.first(), "replication lag predicate satisfied");
                Ok(())
            } else {
                info!(instance = %target.name, newest = ?points.first(), "waiting for replication lag to drain");
                Err(retryable(LagError::NotSatisfied(target.name.clone())))
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptably_low_needs_at_least_one_point() {
        assert!(!LagPredicate::AcceptablyLow.evaluate(&[]));
    }

    #[test]
    fn acceptably_low_checks_only_the_newest_point() {
        assert!(LagPredicate::AcceptablyLow.evaluate(&[0]));
        assert!(LagPredicate::AcceptablyLow.evaluate(&[16 * 1024 * 1024]));
        assert!(LagPredicate::AcceptablyLow.evaluate(&[1024, i64::MAX]));
        assert!(!LagPredicate::AcceptablyLow.evaluate(&[16 * 1024 * 1024 + 1]));
        assert!(!LagPredicate::AcceptablyLow.evaluate(&[20_000_000]));
    }

    #[test]
    fn reached_zero_needs_three_points() {
        assert!(!LagPredicate::ReachedZero.evaluate(&[]));
        assert!(!LagPredicate::ReachedZero.evaluate(&[0]));
        assert!(!LagPredicate::ReachedZero.evaluate(&[0, 0]));
        assert!(LagPredicate::ReachedZero.evaluate(&[0, 0, 0]));
    }

    #[test]
    fn reached_zero_requires_all_three_newest_zero() {
        assert!(!LagPredicate::ReachedZero.evaluate(&[0, 0, 1]));
        assert!(!LagPredicate::ReachedZero.evaluate(&[1, 0, 0]));
        // A transient zero behind nonzero history still counts once the
        // three newest are all zero
        assert!(LagPredicate::ReachedZero.evaluate(&[0, 0, 0, 500]));
    }
}
