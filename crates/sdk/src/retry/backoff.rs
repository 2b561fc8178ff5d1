//! Backoff helpers shared by the retry policies and the metadata caches.
//!
//! Metadata calls (topology and routing fetches) use [`with_retry`], a plain
//! exponential backoff driven by `backon`. Data-plane requests go through
//! the policy chain instead and only borrow [`apply_jitter`] and
//! [`sleep_or_cancel`] from here.

use std::{
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use backon::{ExponentialBuilder, Retryable};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{
    config::BackoffPolicy,
    error::{Result, SdkError},
};

/// Executes an async metadata call with exponential backoff.
///
/// Retries while the error is [retryable](SdkError::is_retryable). Once the
/// attempts run out the last error is wrapped in
/// [`SdkError::RetryExhausted`]; a non-retryable error is returned as is.
///
/// # Example
///
/// ```ignore
/// let policy = BackoffPolicy::default();
/// let account = with_retry(&policy, || fetcher.fetch_regions()).await?;
/// ```
pub async fn with_retry<F, Fut, T>(policy: &BackoffPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // backon counts retries, not attempts.
    let max_retries = policy.max_attempts.saturating_sub(1) as usize;

    let mut backoff = ExponentialBuilder::new()
        .with_min_delay(policy.initial_backoff)
        .with_max_delay(policy.max_backoff)
        .with_factor(policy.multiplier as f32)
        .with_max_times(max_retries);
    if policy.jitter > 0.0 {
        backoff = backoff.with_jitter();
    }

    let retries = AtomicU32::new(0);

    operation
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(SdkError::is_retryable)
        .notify(|err: &SdkError, dur: Duration| {
            let attempt = retries.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(
                attempt,
                backoff_ms = dur.as_millis() as u64,
                error = %err,
                "Retrying metadata call after backoff"
            );
        })
        .await
        .map_err(|err| {
            if err.is_retryable() {
                SdkError::RetryExhausted {
                    attempts: retries.load(Ordering::SeqCst) + 1,
                    endpoints_tried: Vec::new(),
                    source: Box::new(err),
                }
            } else {
                err
            }
        })
}

/// Sleeps for `duration` unless `token` is cancelled first.
///
/// # Errors
///
/// Returns [`SdkError::Cancelled`] if the token fires before the timer.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> Result<()> {
    if duration.is_zero() {
        return if token.is_cancelled() { Err(SdkError::Cancelled) } else { Ok(()) };
    }
    tokio::select! {
        biased;
        () = token.cancelled() => Err(SdkError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Applies jitter to a duration.
///
/// The result lies in `[dur * (1 - factor), dur * (1 + factor)]`. The factor
/// is clamped to `0.0..=1.0`.
#[must_use]
pub fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || dur.is_zero() {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rand::rng().random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}
