//! Server-directed backoff for throttled requests.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{RetryDecision, RetryPolicy, ShouldRetry, apply_jitter};
use crate::{
    config::ThrottleRetryOptions,
    error::{ErrorClass, SdkError},
    request::RequestContext,
};

/// Retries HTTP 429 after the service's retry-after.
///
/// Bounded by a retry count and a cumulative wait. Without a retry-after the
/// fallback exponential backoff (with jitter) is used. Innermost link of the
/// chain: every other error ends here with [`ShouldRetry::NoRetry`].
#[derive(Debug)]
pub struct ThrottlingPolicy {
    options: ThrottleRetryOptions,
    retries: u32,
    waited: Duration,
}

impl ThrottlingPolicy {
    /// Creates a policy with fresh counters.
    #[must_use]
    pub fn new(options: ThrottleRetryOptions) -> Self {
        Self { options, retries: 0, waited: Duration::ZERO }
    }

    fn delay(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| {
            let fallback = &self.options.fallback_backoff;
            apply_jitter(fallback.delay_for_retry(self.retries + 1), fallback.jitter)
        })
    }
}

#[async_trait]
impl RetryPolicy for ThrottlingPolicy {
    fn on_before_send(&mut self, _ctx: &mut RequestContext) {}

    async fn should_retry(&mut self, error: &SdkError, _ctx: &mut RequestContext) -> ShouldRetry {
        let ErrorClass::Throttled { retry_after } = error.class() else {
            return ShouldRetry::NoRetry;
        };

        let delay = self.delay(retry_after);
        let over_budget =
            self.waited.checked_add(delay).is_none_or(|total| total > self.options.max_wait_time);
        if self.retries >= self.options.max_retry_attempts || over_budget {
            warn!(
                retries = self.retries,
                waited_ms = self.waited.as_millis() as u64,
                "Throttling retry budget exhausted"
            );
            return ShouldRetry::NoRetry;
        }

        self.retries += 1;
        self.waited = self.waited.saturating_add(delay);
        debug!(retry = self.retries, delay_ms = delay.as_millis() as u64, "Throttled, backing off");
        ShouldRetry::Retry(RetryDecision::after(delay))
    }
}
