//! Recovery from stale routing (HTTP 410).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{RetryDecision, RetryPolicy, ShouldRetry};
use crate::{
    config::GoneRetryOptions,
    error::{ErrorClass, GoneCause, SdkError},
    request::RequestContext,
    routing::{CollectionCache, PartitionRoutingCache},
};

/// Refreshes routing state when the service reports it stale.
///
/// Recovery escalates from cheap to expensive:
///
/// - **Split or migration**: the routing map the request used is refreshed
///   (once, however many requests saw it fail) and the request is routed
///   again.
/// - **Replica gone**: retried with the force-address-refresh header. If the
///   first such retry fails too, and no forced routing refresh happened for the
///   collection within `min_routing_refresh_interval`, the whole map is
///   refetched and the force-routing-map-refresh header is sent.
/// - **Name cache stale**: the collection's name resolution is refreshed.
#[derive(Debug)]
pub struct GoneRetryPolicy<P> {
    routing: Arc<PartitionRoutingCache>,
    collections: Arc<CollectionCache>,
    options: GoneRetryOptions,
    retries: u32,
    address_refreshed: bool,
    inner: P,
}

impl<P> GoneRetryPolicy<P> {
    /// Wraps `inner`.
    pub fn new(
        routing: Arc<PartitionRoutingCache>,
        collections: Arc<CollectionCache>,
        options: GoneRetryOptions,
        inner: P,
    ) -> Self {
        Self { routing, collections, options, retries: 0, address_refreshed: false, inner }
    }

    async fn refresh_routing(&self, ctx: &mut RequestContext) {
        ctx.clear_target();
        let Some(collection_id) = ctx.collection_id.clone() else {
            return;
        };
        let previous = ctx.stale_routing_map.clone();
        match self.routing.try_lookup(&collection_id, previous.as_ref()).await {
            Ok(map) => debug!(collection_id, ranges = map.ranges().len(), "Routing map refreshed"),
            Err(e) => warn!(collection_id, error = %e, "Routing map refresh failed"),
        }
    }

    async fn escalate_replica_gone(&mut self, ctx: &mut RequestContext) -> ShouldRetry {
        ctx.force_address_refresh = true;
        if !self.address_refreshed {
            self.address_refreshed = true;
            return ShouldRetry::Retry(RetryDecision::now());
        }

        let Some(collection_id) = ctx.collection_id.clone() else {
            return ShouldRetry::Retry(RetryDecision::now());
        };
        if !self
            .routing
            .try_begin_forced_refresh(&collection_id, self.options.min_routing_refresh_interval)
        {
            return ShouldRetry::Retry(RetryDecision::now());
        }

        ctx.clear_target();
        ctx.force_routing_map_refresh = true;
        match self.routing.force_refresh(&collection_id).await {
            Ok(map) => info!(collection_id, ranges = map.ranges().len(), "Escalated to full routing refresh"),
            Err(e) => warn!(collection_id, error = %e, "Forced routing refresh failed"),
        }
        ShouldRetry::Retry(RetryDecision::now().on_alternate_target())
    }
}

#[async_trait]
impl<P: RetryPolicy + Sync> RetryPolicy for GoneRetryPolicy<P> {
    fn on_before_send(&mut self, ctx: &mut RequestContext) {
        self.inner.on_before_send(ctx);
    }

    async fn should_retry(&mut self, error: &SdkError, ctx: &mut RequestContext) -> ShouldRetry {
        let ErrorClass::StaleRouting(cause) = error.class() else {
            return self.inner.should_retry(error, ctx).await;
        };

        if self.retries >= self.options.max_retries {
            warn!(retries = self.retries, ?cause, "Stale routing retry budget exhausted");
            return ShouldRetry::NoRetry;
        }
        self.retries += 1;
        debug!(retry = self.retries, ?cause, "Stale routing");

        match cause {
            GoneCause::PartitionSplit | GoneCause::PartitionMigrating => {
                self.refresh_routing(ctx).await;
                ShouldRetry::Retry(RetryDecision::now().on_alternate_target())
            },
            GoneCause::ReplicaGone => self.escalate_replica_gone(ctx).await,
            GoneCause::NameCacheStale => {
                if let Some(name) = ctx.collection_name() {
                    self.collections.invalidate(name);
                }
                ctx.force_name_refresh = true;
                ctx.clear_resolved();
                ShouldRetry::Retry(RetryDecision::now().on_alternate_target())
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use meridian_types::headers::sub_status;

    use super::*;
    use crate::{
        config::ThrottleRetryOptions,
        mock::MockDatabaseService,
        request::CollectionRef,
        retry::{
            ThrottlingPolicy,
            test_support::{caches, read_context, resolve, service_error, single_range},
        },
    };

    const NAME: &str = "dbs/app/colls/orders";

    struct Fixture {
        service: Arc<MockDatabaseService>,
        routing: Arc<PartitionRoutingCache>,
        policy: GoneRetryPolicy<ThrottlingPolicy>,
    }

    fn fixture(options: GoneRetryOptions) -> Fixture {
        let service = MockDatabaseService::new();
        service.create_collection(NAME, "coll-1", single_range());
        let (routing, collections) = caches(&service);
        let policy = GoneRetryPolicy::new(
            Arc::clone(&routing),
            collections,
            options,
            ThrottlingPolicy::new(ThrottleRetryOptions::default()),
        );
        Fixture { service, routing, policy }
    }

    #[tokio::test]
    async fn test_split_refreshes_routing_once() {
        let mut f = fixture(GoneRetryOptions::default());
        let map = f.routing.try_lookup("coll-1", None).await.unwrap();
        f.service.split_partition("coll-1", "0", "80");

        let mut ctx = read_context(CollectionRef::Id("coll-1".to_owned()));
        resolve(&mut ctx, &map);
        let decision = f
            .policy
            .should_retry(&service_error(StatusCode::GONE, sub_status::PARTITION_KEY_RANGE_GONE), &mut ctx)
            .await;

        assert_eq!(decision, ShouldRetry::Retry(RetryDecision::now().on_alternate_target()));
        assert!(ctx.target_range().is_none());
        let refreshed = f.routing.get("coll-1").unwrap();
        assert_eq!(refreshed.ranges().len(), 2);

        // A second request that routed with the old map reuses the refresh.
        let mut other = read_context(CollectionRef::Id("coll-1".to_owned()));
        resolve(&mut other, &map);
        let mut second = fixture_policy(&f);
        second
            .should_retry(&service_error(StatusCode::GONE, sub_status::COMPLETING_SPLIT), &mut other)
            .await;
        assert!(Arc::ptr_eq(&refreshed, &f.routing.get("coll-1").unwrap()));
        assert_eq!(f.service.range_fetch_count(), 2);
    }

    fn fixture_policy(f: &Fixture) -> GoneRetryPolicy<ThrottlingPolicy> {
        GoneRetryPolicy::new(
            Arc::clone(&f.routing),
            caches(&f.service).1,
            GoneRetryOptions::default(),
            ThrottlingPolicy::new(ThrottleRetryOptions::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_replica_gone_escalates_after_address_refresh() {
        let options = GoneRetryOptions::builder()
            .max_retries(5)
            .min_routing_refresh_interval(Duration::from_secs(1))
            .build();
        let mut f = fixture(options);
        let map = f.routing.try_lookup("coll-1", None).await.unwrap();
        let mut ctx = read_context(CollectionRef::Id("coll-1".to_owned()));
        resolve(&mut ctx, &map);
        let gone = service_error(StatusCode::GONE, 0);

        // First: address refresh only.
        let first = f.policy.should_retry(&gone, &mut ctx).await;
        assert_eq!(first, ShouldRetry::Retry(RetryDecision::now()));
        assert!(ctx.force_address_refresh);
        assert!(!ctx.force_routing_map_refresh);
        assert!(ctx.target_range().is_some());

        // Second: gate open, full routing refresh.
        ctx.force_address_refresh = false;
        let second = f.policy.should_retry(&gone, &mut ctx).await;
        assert_eq!(second, ShouldRetry::Retry(RetryDecision::now().on_alternate_target()));
        assert!(ctx.force_routing_map_refresh);
        assert!(ctx.force_address_refresh);
        assert_eq!(f.service.range_fetch_count(), 2);

        // Third, inside the interval: gate closed, no refetch.
        ctx.force_routing_map_refresh = false;
        let third = f.policy.should_retry(&gone, &mut ctx).await;
        assert_eq!(third, ShouldRetry::Retry(RetryDecision::now()));
        assert!(!ctx.force_routing_map_refresh);
        assert_eq!(f.service.range_fetch_count(), 2);

        // After the interval the gate opens again.
        tokio::time::advance(Duration::from_secs(1)).await;
        f.policy.should_retry(&gone, &mut ctx).await;
        assert!(ctx.force_routing_map_refresh);
        assert_eq!(f.service.range_fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_gone_retries_are_bounded() {
        let mut f = fixture(GoneRetryOptions::default());
        let map = f.routing.try_lookup("coll-1", None).await.unwrap();
        let mut ctx = read_context(CollectionRef::Id("coll-1".to_owned()));
        resolve(&mut ctx, &map);
        let gone = service_error(StatusCode::GONE, sub_status::COMPLETING_PARTITION_MIGRATION);

        for _ in 0..3 {
            assert!(matches!(f.policy.should_retry(&gone, &mut ctx).await, ShouldRetry::Retry(_)));
        }
        assert_eq!(f.policy.should_retry(&gone, &mut ctx).await, ShouldRetry::NoRetry);
    }

    #[tokio::test]
    async fn test_name_cache_stale_forces_name_resolution() {
        let mut f = fixture(GoneRetryOptions::default());
        let map = f.routing.try_lookup("coll-1", None).await.unwrap();
        let mut ctx = read_context(CollectionRef::Name(NAME.to_owned()));
        resolve(&mut ctx, &map);

        let decision = f
            .policy
            .should_retry(&service_error(StatusCode::GONE, sub_status::NAME_CACHE_IS_STALE), &mut ctx)
            .await;

        assert!(matches!(decision, ShouldRetry::Retry(_)));
        assert!(ctx.force_name_refresh);
        assert!(ctx.collection_id().is_none());
    }

    #[tokio::test]
    async fn test_non_gone_errors_delegate() {
        let mut f = fixture(GoneRetryOptions::default());
        let mut ctx = read_context(CollectionRef::Id("coll-1".to_owned()));
        let decision = f.policy.should_retry(&service_error(StatusCode::CONFLICT, 0), &mut ctx).await;
        assert_eq!(decision, ShouldRetry::NoRetry);
    }
}
