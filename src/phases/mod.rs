//! The four phase procedures
//!
//! Each phase is a deterministic, numbered, idempotent sequence of steps.
//! The step count is announced up front so external tooling can render
//! progress from the `migrationStep`/`migrationStepsTotal` fields, and a
//! failed step maps to a stable exit code.

pub mod finalize;
pub mod promote;
pub mod rollback;
pub mod setup;

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::info;

/// Wall-clock budget for one phase invocation
pub const PHASE_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Exit codes 1 and 2 are reserved for configuration and bootstrap
/// failures; step N fails with N + 2.
const STEP_EXIT_CODE_BASE: u32 = 2;

/// A phase failure pinned to the step that produced it
#[derive(Debug)]
pub struct PhaseError {
    pub step: u32,
    source: Box<dyn Error + Send + Sync>,
}

impl PhaseError {
    pub fn at<E>(step: u32, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self {
            step,
            source: source.into(),
        }
    }

    /// Stable per-step exit code
    pub fn exit_code(&self) -> i32 {
        (self.step + STEP_EXIT_CODE_BASE) as i32
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} failed: {}", self.step, self.source)
    }
}

impl Error for PhaseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

pub type PhaseResult<T = ()> = Result<T, PhaseError>;

/// Step numbering and logging for one phase
pub(crate) struct Steps {
    phase: &'static str,
    total: u32,
}

impl Steps {
    pub(crate) fn new(phase: &'static str, total: u32) -> Self {
        info!(migrationStepsTotal = total, "{phase} started");
        Self { phase, total }
    }

    /// Run one numbered step, logging it and pinning any failure to its
    /// number.
    pub(crate) async fn run<T, E, Fut>(
        &self,
        step: u32,
        description: &str,
        fut: Fut,
    ) -> PhaseResult<T>
    where
        E: Into<Box<dyn Error + Send + Sync>>,
        Fut: Future<Output = Result<T, E>>,
    {
        info!(
            migrationStep = step,
            migrationStepsTotal = self.total,
            "{description}"
        );
        fut.await.map_err(|e| PhaseError::at(step, e))
    }

    /// Log a step that needs no work in this run.
    pub(crate) fn skip(&self, step: u32, description: &str) {
        info!(
            migrationStep = step,
            migrationStepsTotal = self.total,
            "{description}"
        );
    }

    pub(crate) fn complete(&self) {
        info!(migrationStepsTotal = self.total, "{} completed", self.phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_leave_room_for_bootstrap_failures() {
        let err = PhaseError::at(1, "boom");
        assert_eq!(err.exit_code(), 3);

        let err = PhaseError::at(4, "source and target instance cannot be the same");
        assert_eq!(err.exit_code(), 6);

        let err = PhaseError::at(7, "lag never drained");
        assert_eq!(err.exit_code(), 9);
    }

    #[test]
    fn phase_error_preserves_the_failing_step() {
        let err = PhaseError::at(12, std::io::Error::other("io"));
        assert_eq!(err.step, 12);
        assert!(err.to_string().contains("step 12"));
    }
}
