//! Bounded-duration constant-interval retry
//!
//! Every polling loop in the migration goes through this harness. The
//! interval is constant rather than exponential: the upstream operators
//! have slow, bounded reconciliation loops, and exponential back-off would
//! overshoot their steady-state latencies.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Marker distinguishing errors worth retrying from terminal ones.
///
/// An operation passed to [`retry`] wraps transient failures in
/// `Retryable`; anything `Terminal` aborts the loop immediately.
#[derive(Debug)]
pub enum RetryError<E> {
    Retryable(E),
    Terminal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Retryable(e) | RetryError::Terminal(e) => e,
        }
    }
}

/// Wrap an error as retryable.
pub fn retryable<E>(err: E) -> RetryError<E> {
    RetryError::Retryable(err)
}

/// Wrap an error as terminal.
pub fn terminal<E>(err: E) -> RetryError<E> {
    RetryError::Terminal(err)
}

/// Re-invoke `op` every `interval` until it succeeds, fails terminally, or
/// `max_duration` of wall clock has elapsed.
///
/// Returns within `max_duration + interval`: the deadline is checked before
/// each sleep, and an attempt already past the deadline is the last one.
/// On exhaustion the most recent error is returned.
pub async fn retry<T, E, F, Fut>(max_duration: Duration, interval: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
{
    let deadline = Instant::now() + max_duration;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(RetryError::Terminal(err)) => return Err(err),
            Err(RetryError::Retryable(err)) => {
                if Instant::now() >= deadline {
                    return Err(err);
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    struct TestError(&'static str);

    #[tokio::test]
    async fn returns_first_success() {
        let result: Result<i32, TestError> = retry(
            Duration::from_secs(10),
            Duration::from_millis(10),
            || async { Ok(42) },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn terminal_error_aborts_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), TestError> = retry(
            Duration::from_secs(10),
            Duration::from_millis(10),
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(terminal(TestError("boom")))
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), TestError("boom"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry(
            Duration::from_secs(60),
            Duration::from_secs(1),
            || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(retryable(TestError("not yet")))
                } else {
                    Ok(n)
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let start = Instant::now();
        let result: Result<(), TestError> = retry(
            Duration::from_secs(5),
            Duration::from_secs(1),
            || async { Err(retryable(TestError("still failing"))) },
        )
        .await;
        assert_eq!(result.unwrap_err(), TestError("still failing"));
        // Bounded by max_duration + interval
        assert!(start.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_checked_before_sleep() {
        let attempts = AtomicU32::new(0);
        let _: Result<(), TestError> = retry(
            Duration::from_millis(0),
            Duration::from_secs(3600),
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(retryable(TestError("late")))
            },
        )
        .await;
        // Zero budget means exactly one attempt and no hour-long sleep
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
