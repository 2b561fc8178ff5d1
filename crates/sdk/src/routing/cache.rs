//! Per-collection cache of routing maps.
//!
//! Each collection has one [`ArcSwap`] slot holding its current
//! [`CollectionRoutingMap`]. Readers load a snapshot and keep it for the
//! whole lookup; refreshes build a new map and swap it in. Refreshes for the
//! same collection are serialized by a per-collection async mutex, and a
//! refresh requested with a map that is no longer current returns the
//! newer map without fetching.

use std::{fmt, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use meridian_types::PartitionKeyRange;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    config::BackoffPolicy,
    error::{Result, ResolutionSnafu},
    metrics::{RoutingRefreshKind, SdkMetrics, default_metrics},
    retry::with_retry,
    routing::CollectionRoutingMap,
};

/// Ranges returned by a routing fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeFeed {
    /// Full range list, or only the ranges changed since the requested etag.
    pub ranges: Vec<PartitionKeyRange>,
    /// Change feed position of this response.
    pub etag: Option<String>,
}

/// Fetches partition key ranges from the service.
#[async_trait]
pub trait RangeFetcher: Send + Sync + fmt::Debug {
    /// Returns the ranges of a collection.
    ///
    /// With `if_none_match` set, only ranges changed since that etag are
    /// returned (an empty list when nothing changed).
    async fn fetch_ranges(
        &self,
        collection_id: &str,
        if_none_match: Option<&str>,
    ) -> Result<RangeFeed>;
}

/// Cache of routing maps keyed by collection id.
#[derive(Debug)]
pub struct PartitionRoutingCache {
    fetcher: Arc<dyn RangeFetcher>,
    maps: DashMap<String, Arc<ArcSwap<CollectionRoutingMap>>>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    last_forced_refresh: DashMap<String, Instant>,
    retry_policy: BackoffPolicy,
    metrics: Arc<dyn SdkMetrics>,
}

impl PartitionRoutingCache {
    /// Creates an empty cache.
    pub fn new(fetcher: Arc<dyn RangeFetcher>, retry_policy: BackoffPolicy) -> Self {
        Self {
            fetcher,
            maps: DashMap::new(),
            refresh_locks: DashMap::new(),
            last_forced_refresh: DashMap::new(),
            retry_policy,
            metrics: default_metrics(),
        }
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn SdkMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the cached map without fetching.
    #[must_use]
    pub fn get(&self, collection_id: &str) -> Option<Arc<CollectionRoutingMap>> {
        self.maps.get(collection_id).map(|slot| slot.load_full())
    }

    /// Returns the map for a collection, fetching it if needed.
    ///
    /// With `previous` set the caller found that map stale. If it is still
    /// the cached map, the cache fetches the changes since its etag and
    /// combines them, falling back to a full fetch when the delta leaves a
    /// gap. If another task already replaced it, the newer map is returned
    /// as is.
    ///
    /// # Errors
    ///
    /// Returns the fetch error after metadata retries, or a resolution error
    /// if the service returns ranges that do not cover the key space.
    pub async fn try_lookup(
        &self,
        collection_id: &str,
        previous: Option<&Arc<CollectionRoutingMap>>,
    ) -> Result<Arc<CollectionRoutingMap>> {
        if let Some(current) = self.get(collection_id)
            && !is_stale(&current, previous)
        {
            return Ok(current);
        }

        let lock = self.refresh_lock(collection_id);
        let _guard = lock.lock().await;

        // Someone may have refreshed while we waited.
        let current = self.get(collection_id);
        if let Some(current) = &current
            && !is_stale(current, previous)
        {
            return Ok(Arc::clone(current));
        }

        let refreshed = match current {
            Some(current) => self.fetch_incremental(&current).await?,
            None => {
                let map = self.fetch_full(collection_id).await?;
                self.metrics.record_routing_refresh(RoutingRefreshKind::Initial);
                map
            },
        };
        Ok(self.store(collection_id, refreshed))
    }

    /// Discards the cached map and fetches a complete one.
    ///
    /// # Errors
    ///
    /// See [`try_lookup`](Self::try_lookup).
    pub async fn force_refresh(&self, collection_id: &str) -> Result<Arc<CollectionRoutingMap>> {
        let lock = self.refresh_lock(collection_id);
        let _guard = lock.lock().await;

        let map = self.fetch_full(collection_id).await?;
        self.metrics.record_routing_refresh(RoutingRefreshKind::Full);
        info!(collection_id, ranges = map.ranges().len(), "Forced routing map refresh");
        Ok(self.store(collection_id, map))
    }

    /// Installs a map, replacing the cached one atomically.
    pub fn refresh(&self, collection_id: &str, map: CollectionRoutingMap) {
        self.store(collection_id, map);
    }

    /// Drops the cached map; the next lookup fetches a fresh one.
    pub fn invalidate(&self, collection_id: &str) {
        self.maps.remove(collection_id);
    }

    /// Claims the right to escalate to a forced full refresh.
    ///
    /// Returns true, and records the claim, if no forced refresh happened
    /// for the collection within `min_interval`. Concurrent callers race on
    /// the entry lock; at most one wins per interval.
    pub fn try_begin_forced_refresh(&self, collection_id: &str, min_interval: Duration) -> bool {
        let now = Instant::now();
        let mut claimed = false;
        self.last_forced_refresh
            .entry(collection_id.to_owned())
            .and_modify(|last| {
                if now.saturating_duration_since(*last) >= min_interval {
                    *last = now;
                    claimed = true;
                }
            })
            .or_insert_with(|| {
                claimed = true;
                now
            });
        if !claimed {
            debug!(collection_id, "Forced routing refresh suppressed by minimum interval");
        }
        claimed
    }

    async fn fetch_incremental(
        &self,
        current: &CollectionRoutingMap,
    ) -> Result<CollectionRoutingMap> {
        let collection_id = current.collection_id();
        let Some(etag) = current.etag() else {
            self.metrics.record_routing_refresh(RoutingRefreshKind::Full);
            return self.fetch_full(collection_id).await;
        };

        let feed = with_retry(&self.retry_policy, || {
            self.fetcher.fetch_ranges(collection_id, Some(etag))
        })
        .await?;
        let changed = feed.ranges.len();

        match current.try_combine(feed.ranges, feed.etag.or_else(|| Some(etag.to_owned()))) {
            Some(combined) => {
                self.metrics.record_routing_refresh(RoutingRefreshKind::Incremental);
                info!(collection_id, changed, "Applied routing map delta");
                Ok(combined)
            },
            None => {
                warn!(collection_id, changed, "Routing map delta left a gap, refetching");
                self.metrics.record_routing_refresh(RoutingRefreshKind::Full);
                self.fetch_full(collection_id).await
            },
        }
    }

    async fn fetch_full(&self, collection_id: &str) -> Result<CollectionRoutingMap> {
        let feed =
            with_retry(&self.retry_policy, || self.fetcher.fetch_ranges(collection_id, None))
                .await?;
        let count = feed.ranges.len();

        CollectionRoutingMap::try_create(collection_id, feed.ranges, feed.etag).ok_or_else(|| {
            ResolutionSnafu {
                message: format!(
                    "{count} ranges returned for collection {collection_id} do not cover the key space"
                ),
            }
            .build()
        })
    }

    fn store(&self, collection_id: &str, map: CollectionRoutingMap) -> Arc<CollectionRoutingMap> {
        let map = Arc::new(map);
        match self.maps.get(collection_id) {
            Some(slot) => slot.store(Arc::clone(&map)),
            None => {
                self.maps
                    .entry(collection_id.to_owned())
                    .and_modify(|slot| slot.store(Arc::clone(&map)))
                    .or_insert_with(|| Arc::new(ArcSwap::new(Arc::clone(&map))));
            },
        }
        map
    }

    fn refresh_lock(&self, collection_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.refresh_locks.entry(collection_id.to_owned()).or_default().value())
    }
}

/// A cached map is stale for the caller only if the caller saw it fail.
fn is_stale(current: &Arc<CollectionRoutingMap>, previous: Option<&Arc<CollectionRoutingMap>>) -> bool {
    previous.is_some_and(|previous| Arc::ptr_eq(current, previous))
}
