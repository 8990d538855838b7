//! Consolidated retry/backoff helper.
//!
//! Per Design Notes, the original system duplicated ad-hoc retry loops
//! across the model client, the gateway client, and the image downloader.
//! This module is the single helper all three now share, parameterized by
//! `{max_attempts, base_delay, abort_predicate}`, modeled on the retry loop
//! in the teacher's `domain::overpass_enrichment_worker::process_job`.

use std::time::Duration;

use async_trait::async_trait;

/// Async, clock-independent sleeping abstraction so retry delays are
/// mockable in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Parameters for [`retry_with_backoff`].
pub struct RetryPolicy<'a, E> {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay multiplied by the attempt number (spec §4.3: "linear
    /// backoff `attempt x 2s`").
    pub base_delay: Duration,
    /// Returns `true` when `error` must abort retries immediately rather
    /// than being retried (e.g. a 400-class model error).
    pub abort_predicate: &'a dyn Fn(&E) -> bool,
}

/// Outcome of a retry loop, including how many attempts were actually
/// made — needed by callers (spec scenario F) that must distinguish "failed
/// after exhausting all attempts" from "aborted early on attempt 1".
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Run `operation` up to `policy.max_attempts` times with linear backoff,
/// aborting immediately (without sleeping or retrying further) when
/// `policy.abort_predicate` returns `true` for the latest error.
///
/// ```
/// # use intel_pipeline::domain::backoff::{retry_with_backoff, RetryPolicy, TokioSleeper};
/// # use std::time::Duration;
/// # use std::sync::atomic::{AtomicU32, Ordering};
/// let runtime = tokio::runtime::Runtime::new().expect("runtime");
/// runtime.block_on(async {
///     let attempts = AtomicU32::new(0);
///     let sleeper = TokioSleeper;
///     let outcome = retry_with_backoff(
///         RetryPolicy::<()> {
///             max_attempts: 3,
///             base_delay: Duration::from_millis(1),
///             abort_predicate: &|_| false,
///         },
///         &sleeper,
///         || {
///             let n = attempts.fetch_add(1, Ordering::SeqCst);
///             async move { if n < 2 { Err(()) } else { Ok(42) } }
///         },
///     )
///     .await;
///     assert_eq!(outcome.result, Ok(42));
///     assert_eq!(outcome.attempts, 3);
/// });
/// ```
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy<'_, E>,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(error) => {
                let aborts = (policy.abort_predicate)(&error);
                if aborts || attempt >= max_attempts {
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                    };
                }
                let delay = policy.base_delay.saturating_mul(attempt);
                sleeper.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays
                .lock()
                .expect("delays mutex poisoned")
                .push(duration);
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_attempt() {
        let sleeper = RecordingSleeper::default();
        let outcome: RetryOutcome<i32, ()> = retry_with_backoff(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                abort_predicate: &|_| false,
            },
            &sleeper,
            || async { Ok(7) },
        )
        .await;

        assert_eq!(outcome.result, Ok(7));
        assert_eq!(outcome.attempts, 1);
        assert!(sleeper.delays.lock().expect("poisoned").is_empty());
    }

    #[tokio::test]
    async fn retries_with_linear_backoff_until_success() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<i32, ()> = retry_with_backoff(
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(10),
                abort_predicate: &|_| false,
            },
            &sleeper,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(())
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await;

        assert_eq!(outcome.result, Ok(99));
        assert_eq!(outcome.attempts, 3);
        let delays = sleeper.delays.lock().expect("poisoned").clone();
        assert_eq!(
            delays,
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[tokio::test]
    async fn abort_predicate_stops_retries_immediately() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<i32, &'static str> = retry_with_backoff(
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(10),
                abort_predicate: &|error: &&str| *error == "bad image format",
            },
            &sleeper,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("bad image format") }
            },
        )
        .await;

        assert_eq!(outcome.result, Err("bad image format"));
        assert_eq!(outcome.attempts, 1);
        assert!(sleeper.delays.lock().expect("poisoned").is_empty());
    }

    #[tokio::test]
    async fn exhausts_all_attempts_when_never_aborting() {
        let sleeper = RecordingSleeper::default();

        let outcome: RetryOutcome<i32, &'static str> = retry_with_backoff(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
                abort_predicate: &|_| false,
            },
            &sleeper,
            || async { Err("still failing") },
        )
        .await;

        assert_eq!(outcome.result, Err("still failing"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(sleeper.delays.lock().expect("poisoned").len(), 2);
    }
}
