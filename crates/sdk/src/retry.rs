//! Retry logic with exponential backoff.
//!
//! Two styles are provided:
//! - [`with_retry`] wraps a unary call using the `backon` crate.
//! - [`classify`] and [`backoff_delay`] support explicit bounded loops, used
//!   where a retry must first rewrite the request (stream resumption, batch
//!   resubmission).

use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{
    config::RetryPolicy,
    error::{Result, SdkError},
    metrics::SdkMetrics,
};

/// What to do after an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Issue another attempt.
    Retry,
    /// Surface the error to the caller.
    Fail,
    /// The operation has nothing left to do; finish successfully.
    Done,
}

/// Classifies a failed attempt.
///
/// - Non-retryable errors fail immediately.
/// - Retryable errors finish successfully when `work_remains` reports there is
///   nothing left to fetch, even if the budget is spent.
/// - Otherwise the attempt is retried while `attempt < policy.max_attempts`.
pub fn classify(
    error: &SdkError,
    attempt: u32,
    policy: &RetryPolicy,
    work_remains: impl FnOnce() -> bool,
) -> RetryDecision {
    if !error.is_retryable() {
        return RetryDecision::Fail;
    }
    if !work_remains() {
        return RetryDecision::Done;
    }
    if attempt >= policy.max_attempts {
        return RetryDecision::Fail;
    }
    RetryDecision::Retry
}

/// Wraps the final error of an operation, marking budget exhaustion.
///
/// Retryable errors reaching this point have used every attempt and are
/// reported as [`SdkError::RetryExhausted`]; other errors pass through.
pub fn finalize_error(
    error: SdkError,
    attempts: u32,
    attempt_history: Vec<(u32, String)>,
) -> SdkError {
    if error.is_retryable() {
        SdkError::RetryExhausted { attempts, last_error: error.to_string(), attempt_history }
    } else {
        error
    }
}

/// Returns the backoff before retry number `retry` (1 = first retry).
///
/// `initial_backoff * multiplier^(retry-1)`, capped at `max_backoff`, with
/// ±`jitter` randomness applied.
pub fn backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1) as f64;
    let delay_secs = policy.initial_backoff.as_secs_f64() * policy.multiplier.powf(exponent);
    let capped = if delay_secs.is_finite() {
        Duration::from_secs_f64(delay_secs.min(policy.max_backoff.as_secs_f64()))
    } else {
        policy.max_backoff
    };
    apply_jitter(capped, policy.jitter)
}

/// Sleeps for `duration`, returning early with [`SdkError::Cancelled`] if the
/// token fires first.
pub async fn sleep_cancellable(duration: Duration, token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(token) => {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(SdkError::Cancelled),
                () = tokio::time::sleep(duration) => Ok(()),
            }
        },
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        },
    }
}

/// Execute an async operation with retry using exponential backoff.
///
/// The operation will be retried according to the provided [`RetryPolicy`] if
/// it fails with a retryable error (as determined by [`SdkError::is_retryable`]).
///
/// # Retry Strategy
///
/// - **Exponential backoff**: `initial_backoff * multiplier^(attempt-1)`
/// - **Jitter**: randomized delay when `jitter > 0`
/// - **Cap**: Backoff capped at `max_backoff`
/// - **Termination**: After `max_attempts` failed attempts
///
/// # Non-Retryable Errors
///
/// If the operation fails with a non-retryable error (e.g., `INVALID_ARGUMENT`,
/// `PERMISSION_DENIED`), the error is returned immediately without retry.
///
/// # Example
///
/// ```ignore
/// use bigtable_sdk::{with_retry, NoopSdkMetrics, RetryPolicy, SdkError};
///
/// let policy = RetryPolicy::default();
/// let result = with_retry(&policy, "sample_row_keys", &NoopSdkMetrics, || async {
///     Ok::<_, SdkError>("success")
/// }).await;
/// ```
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    method: &str,
    metrics: &dyn SdkMetrics,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // backon's max_times counts retries, not total attempts.
    let max_retries = policy.max_attempts.saturating_sub(1) as usize;

    let mut backoff = ExponentialBuilder::new()
        .with_min_delay(policy.initial_backoff)
        .with_max_delay(policy.max_backoff)
        .with_factor(policy.multiplier as f32)
        .with_max_times(max_retries);
    if policy.jitter > 0.0 {
        backoff = backoff.with_jitter();
    }

    let history: Mutex<Vec<(u32, String)>> = Mutex::new(Vec::new());

    let result = operation
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(|e: &SdkError| e.is_retryable())
        .notify(|err: &SdkError, dur: Duration| {
            let mut history = history.lock();
            let attempt = history.len() as u32 + 1;
            history.push((attempt, err.to_string()));
            metrics.record_retry(method, attempt, err.error_type());

            tracing::debug!(
                method,
                attempt,
                backoff_ms = dur.as_millis() as u64,
                error = %err,
                "retrying after backoff"
            );
        })
        .await;

    result.map_err(|e| {
        let mut history = history.into_inner();
        let attempts = history.len() as u32 + 1;
        history.push((attempts, e.to_string()));
        finalize_error(e, attempts, history)
    })
}

/// Apply jitter to a duration.
///
/// Jitter adds randomness in the range `[dur * (1 - factor), dur * (1 + factor)]`
/// to prevent thundering herd when multiple clients retry simultaneously.
fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();

    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rng.random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use tonic::Code;

    use super::*;
    use crate::metrics::NoopSdkMetrics;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0, // No jitter for deterministic tests
        }
    }

    fn unavailable() -> SdkError {
        SdkError::Rpc { code: Code::Unavailable, message: "unavailable".to_owned() }
    }

    #[test]
    fn test_classify_non_retryable_fails() {
        let err = SdkError::Rpc { code: Code::PermissionDenied, message: "denied".to_owned() };
        assert_eq!(classify(&err, 1, &test_policy(), || true), RetryDecision::Fail);
    }

    #[test]
    fn test_classify_retryable_with_budget_retries() {
        assert_eq!(classify(&unavailable(), 1, &test_policy(), || true), RetryDecision::Retry);
        assert_eq!(classify(&unavailable(), 2, &test_policy(), || true), RetryDecision::Retry);
    }

    #[test]
    fn test_classify_retryable_without_budget_fails() {
        assert_eq!(classify(&unavailable(), 3, &test_policy(), || true), RetryDecision::Fail);
    }

    #[test]
    fn test_classify_nothing_left_is_done() {
        assert_eq!(classify(&unavailable(), 1, &test_policy(), || false), RetryDecision::Done);
        assert_eq!(classify(&unavailable(), 3, &test_policy(), || false), RetryDecision::Done);
    }

    #[test]
    fn test_classify_protocol_error_fails_without_consulting_progress() {
        let err = SdkError::Protocol { chunk_index: 1, reason: "bad".to_owned() };
        let decision = classify(&err, 1, &test_policy(), || panic!("must not be consulted"));
        assert_eq!(decision, RetryDecision::Fail);
    }

    #[test]
    fn test_finalize_error_wraps_only_retryable() {
        let wrapped = finalize_error(unavailable(), 3, vec![(1, "a".to_owned())]);
        assert!(matches!(wrapped, SdkError::RetryExhausted { attempts: 3, .. }));

        let passthrough = finalize_error(SdkError::Cancelled, 1, Vec::new());
        assert!(matches!(passthrough, SdkError::Cancelled));
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let policy = test_policy();
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_millis(40));
        assert_eq!(backoff_delay(&policy, 10), Duration::from_millis(100));
    }

    #[test]
    fn test_apply_jitter_zero_factor() {
        let dur = Duration::from_millis(100);
        assert_eq!(apply_jitter(dur, 0.0), dur);
    }

    #[test]
    fn test_apply_jitter_within_bounds() {
        let dur = Duration::from_millis(100);
        for _ in 0..100 {
            let millis = apply_jitter(dur, 0.25).as_millis();
            assert!((75..=125).contains(&millis), "jittered value {millis} out of bounds");
        }
    }

    #[tokio::test]
    async fn test_sleep_cancellable_returns_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let result = sleep_cancellable(Duration::from_secs(60), Some(&token)).await;
        assert!(matches!(result, Err(SdkError::Cancelled)));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&call_count);

        let result = with_retry(&test_policy(), "test", &NoopSdkMetrics, || {
            let count = Arc::clone(&counter);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SdkError>("success")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&call_count);

        let result = with_retry(&test_policy(), "test", &NoopSdkMetrics, || {
            let count = Arc::clone(&counter);
            async move {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(unavailable());
                }
                Ok("success")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_attempt() {
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&call_count);

        let result: Result<()> = with_retry(&test_policy(), "test", &NoopSdkMetrics, || {
            let count = Arc::clone(&counter);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            }
        })
        .await;

        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        match result {
            Err(SdkError::RetryExhausted { attempts, attempt_history, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(attempt_history.len(), 3);
                assert_eq!(attempt_history[2].0, 3);
            },
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&call_count);

        let result: Result<()> = with_retry(&test_policy(), "test", &NoopSdkMetrics, || {
            let count = Arc::clone(&counter);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(SdkError::Rpc { code: Code::InvalidArgument, message: "bad".to_owned() })
            }
        })
        .await;

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(SdkError::Rpc { code: Code::InvalidArgument, .. })));
    }
}
