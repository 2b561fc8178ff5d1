//! Regional failover on network failures and write-forbidden responses.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{RetryDecision, RetryPolicy, ShouldRetry};
use crate::{
    endpoint::EndpointManager,
    error::{ErrorClass, SdkError},
    request::{OperationKind, RequestContext},
};

/// Picks the endpoint for each send and fails over between regions.
///
/// - Transient network failure or 503 on a read: the endpoint is marked
///   unavailable for reads and the read is retried on the next region.
/// - The same on a write: the endpoint is marked unavailable for writes and
///   the error surfaces; a write may have been applied.
/// - 403 with the write-forbidden sub-status: the endpoint is marked
///   unavailable for writes, topology is refetched and the write retried on
///   the new write region.
///
/// Failover retries are bounded per operation. Every mark also requests a
/// background topology refresh.
#[derive(Debug)]
pub struct EndpointFailoverPolicy<P> {
    endpoints: EndpointManager,
    max_failover_retries: u32,
    failover_retries: u32,
    inner: P,
}

impl<P> EndpointFailoverPolicy<P> {
    /// Wraps `inner`.
    pub fn new(endpoints: EndpointManager, max_failover_retries: u32, inner: P) -> Self {
        Self { endpoints, max_failover_retries, failover_retries: 0, inner }
    }

    fn fail_over(&mut self, ctx: &RequestContext) -> ShouldRetry {
        if self.failover_retries >= self.max_failover_retries {
            warn!(
                retries = self.failover_retries,
                kind = ?ctx.kind(),
                "Endpoint failover budget exhausted"
            );
            return ShouldRetry::NoRetry;
        }
        self.failover_retries += 1;
        ShouldRetry::Retry(RetryDecision::now().on_alternate_target())
    }
}

#[async_trait]
impl<P: RetryPolicy> RetryPolicy for EndpointFailoverPolicy<P> {
    fn on_before_send(&mut self, ctx: &mut RequestContext) {
        ctx.endpoint = Some(self.endpoints.resolve_endpoint(ctx.kind()));
        self.inner.on_before_send(ctx);
    }

    async fn should_retry(&mut self, error: &SdkError, ctx: &mut RequestContext) -> ShouldRetry {
        match error.class() {
            ErrorClass::TransientNetwork(_) | ErrorClass::ServiceUnavailable => {
                let Some(endpoint) = ctx.endpoint.clone() else {
                    return ShouldRetry::NoRetry;
                };
                self.endpoints.mark_unavailable_for(&endpoint, ctx.kind());
                self.endpoints.request_refresh();

                match ctx.kind() {
                    OperationKind::Read => self.fail_over(ctx),
                    OperationKind::Write => {
                        debug!(endpoint = %endpoint, error = %error, "Write failed in transit, not retrying");
                        ShouldRetry::NoRetry
                    },
                }
            },
            ErrorClass::WriteForbidden => {
                let Some(endpoint) = ctx.endpoint.clone() else {
                    return ShouldRetry::NoRetry;
                };
                self.endpoints.mark_unavailable_for(&endpoint, OperationKind::Write);
                if let Err(e) = self.endpoints.refresh_topology().await {
                    warn!(error = %e, "Topology refresh after write-forbidden failed");
                }
                self.fail_over(ctx)
            },
            _ => self.inner.should_retry(error, ctx).await,
        }
    }
}
