//! Retry policy chain.
//!
//! Every policy implements [`RetryPolicy`]: a hook run before each send and
//! a decision taken after each failure. Policies wrap an inner policy, act on
//! the [`ErrorClass`](crate::ErrorClass) they own and delegate everything
//! else, so a chain is built by nesting:
//!
//! ```text
//! RenameAwarePolicy            404/1002 by name: re-resolve, uncharged retry
//!   └─ GoneRetryPolicy         410: routing refresh / address refresh
//!        └─ EndpointFailoverPolicy   network, 503, 403/3: mark and fail over
//!             └─ ThrottlingPolicy    429: server-directed backoff
//! ```
//!
//! A policy either schedules a retry (and swallows the error) or passes the
//! error through untouched. Terminal wrapping is left to the pipeline.
//!
//! Policies are created per operation by [`RetryPolicyFactory`] and keep
//! their own counters; shared caches are reached through `Arc` handles.

mod backoff;
mod endpoint;
mod gone;
mod rename;
mod throttle;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

pub use self::{
    backoff::{apply_jitter, sleep_or_cancel, with_retry},
    endpoint::EndpointFailoverPolicy,
    gone::GoneRetryPolicy,
    rename::RenameAwarePolicy,
    throttle::ThrottlingPolicy,
};
use crate::{
    config::ClientConfig,
    endpoint::EndpointManager,
    error::SdkError,
    request::RequestContext,
    routing::{CollectionCache, PartitionRoutingCache},
    session::SessionTokenStore,
};

/// How to retry a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Delay before the next send.
    pub after: Duration,
    /// The next send goes to a different endpoint or partition.
    pub alternate_target: bool,
    /// Whether the retry consumes the caller's retry budget.
    pub counts_against_budget: bool,
}

impl RetryDecision {
    /// Retry immediately on the same target, charged.
    #[must_use]
    pub fn now() -> Self {
        Self { after: Duration::ZERO, alternate_target: false, counts_against_budget: true }
    }

    /// Retry after `delay`, charged.
    #[must_use]
    pub fn after(delay: Duration) -> Self {
        Self { after: delay, ..Self::now() }
    }

    /// Marks the retry as going to a different target.
    #[must_use]
    pub fn on_alternate_target(mut self) -> Self {
        self.alternate_target = true;
        self
    }

    /// Marks the retry as not consuming the caller's budget.
    #[must_use]
    pub fn uncharged(mut self) -> Self {
        self.counts_against_budget = false;
        self
    }
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShouldRetry {
    /// Send again as described.
    Retry(RetryDecision),
    /// Surface the error.
    NoRetry,
}

/// A link in the retry chain.
#[async_trait]
pub trait RetryPolicy: Send {
    /// Prepares the context for the next send.
    fn on_before_send(&mut self, ctx: &mut RequestContext);

    /// Decides whether and how to retry after `error`.
    ///
    /// May mutate shared caches (marks, routing maps, session aliases) and
    /// the context's resolved state. Must not alter `error`.
    async fn should_retry(&mut self, error: &SdkError, ctx: &mut RequestContext) -> ShouldRetry;
}

/// The chain every operation runs with.
pub type DefaultRetryPolicy =
    RenameAwarePolicy<GoneRetryPolicy<EndpointFailoverPolicy<ThrottlingPolicy>>>;

/// Builds a fresh policy chain per operation.
#[derive(Debug, Clone)]
pub struct RetryPolicyFactory {
    config: ClientConfig,
    endpoints: EndpointManager,
    routing: Arc<PartitionRoutingCache>,
    collections: Arc<CollectionCache>,
    session: Arc<SessionTokenStore>,
}

impl RetryPolicyFactory {
    /// Creates a factory over the shared caches.
    pub fn new(
        config: ClientConfig,
        endpoints: EndpointManager,
        routing: Arc<PartitionRoutingCache>,
        collections: Arc<CollectionCache>,
        session: Arc<SessionTokenStore>,
    ) -> Self {
        Self { config, endpoints, routing, collections, session }
    }

    /// Creates the chain for one operation.
    #[must_use]
    pub fn create(&self) -> DefaultRetryPolicy {
        let throttle = ThrottlingPolicy::new(self.config.throttle_retry().clone());
        let failover = EndpointFailoverPolicy::new(
            self.endpoints.clone(),
            self.config.max_endpoint_failover_retries(),
            throttle,
        );
        let gone = GoneRetryPolicy::new(
            Arc::clone(&self.routing),
            Arc::clone(&self.collections),
            self.config.gone_retry().clone(),
            failover,
        );
        RenameAwarePolicy::new(Arc::clone(&self.collections), Arc::clone(&self.session), gone)
    }
}
