//! Regional endpoint selection with per-axis unavailability marks.
//!
//! The [`EndpointManager`] keeps two ordered endpoint lists (read and write)
//! derived from the account topology and the client's preferred regions.
//! Failures mark an endpoint unavailable for reads, writes, or both until a
//! TTL elapses; resolution skips marked endpoints and fails open when every
//! endpoint is marked.
//!
//! # Background Refresh
//!
//! [`start_background_refresh`](EndpointManager::start_background_refresh)
//! spawns a task refetching the topology every
//! `topology_refresh_interval`. [`request_refresh`](EndpointManager::request_refresh)
//! wakes it early; [`shutdown`](EndpointManager::shutdown) stops it.

mod topology;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::{
    sync::Notify,
    time::{Instant, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub(crate) use self::topology::LocationSnapshot;
pub use self::topology::{DatabaseAccount, RegionEndpoint, TopologyFetcher};
use crate::{
    config::{BackoffPolicy, ClientConfig},
    error::Result,
    metrics::{MarkAxis, SdkMetrics, default_metrics},
    request::OperationKind,
    retry::with_retry,
};

/// Expiry used when `now + ttl` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// One axis of an unavailability mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisMark {
    marked_at: Instant,
    until: Instant,
}

impl AxisMark {
    fn is_active(&self, now: Instant) -> bool {
        now < self.until
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UnavailabilityMark {
    read: Option<AxisMark>,
    write: Option<AxisMark>,
}

impl UnavailabilityMark {
    fn axis(&self, kind: OperationKind) -> Option<AxisMark> {
        match kind {
            OperationKind::Read => self.read,
            OperationKind::Write => self.write,
        }
    }
}

/// Active unavailability of one endpoint, as reported by [`EndpointDiagnostics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointMarkSnapshot {
    /// Marked endpoint.
    pub endpoint: Url,
    /// Reads avoid the endpoint until this instant.
    pub read_until: Option<Instant>,
    /// Writes avoid the endpoint until this instant.
    pub write_until: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    default_endpoint: Url,
    preferred_regions: Vec<String>,
    use_multiple_write_locations: bool,
    unavailability_ttl: Duration,
    refresh_interval: Duration,
    retry_policy: BackoffPolicy,
    fetcher: Arc<dyn TopologyFetcher>,
    locations: ArcSwap<LocationSnapshot>,
    marks: DashMap<Url, UnavailabilityMark>,
    metrics: Arc<dyn SdkMetrics>,
    running: AtomicBool,
    refresh_in_flight: AtomicBool,
    refresh_notify: Notify,
    shutdown: CancellationToken,
}

/// Ordered regional endpoints with unavailability tracking.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct EndpointManager {
    inner: Arc<Inner>,
}

impl EndpointManager {
    /// Creates a manager that routes everything to the default endpoint
    /// until the first topology refresh.
    pub fn new(config: &ClientConfig, fetcher: Arc<dyn TopologyFetcher>) -> Self {
        Self::with_metrics(config, fetcher, default_metrics())
    }

    /// Creates a manager reporting to `metrics`.
    pub fn with_metrics(
        config: &ClientConfig,
        fetcher: Arc<dyn TopologyFetcher>,
        metrics: Arc<dyn SdkMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                default_endpoint: config.default_endpoint().clone(),
                preferred_regions: config.preferred_regions().to_vec(),
                use_multiple_write_locations: config.use_multiple_write_locations(),
                unavailability_ttl: config.endpoint_unavailability_ttl(),
                refresh_interval: config.topology_refresh_interval(),
                retry_policy: config.metadata_retry().clone(),
                fetcher,
                locations: ArcSwap::from_pointee(LocationSnapshot::fallback(
                    config.default_endpoint(),
                )),
                marks: DashMap::new(),
                metrics,
                running: AtomicBool::new(false),
                refresh_in_flight: AtomicBool::new(false),
                refresh_notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Returns the endpoint the next request of `kind` should use.
    ///
    /// The first endpoint in preference order that is not marked for `kind`
    /// wins. When every endpoint is marked, the one marked most recently is
    /// returned: it was the last one known to work.
    #[must_use]
    pub fn resolve_endpoint(&self, kind: OperationKind) -> Url {
        let locations = self.inner.locations.load();
        let candidates = match kind {
            OperationKind::Read => &locations.read,
            OperationKind::Write => &locations.write,
        };
        let now = Instant::now();

        if let Some(available) =
            candidates.iter().find(|region| !self.is_marked(&region.endpoint, kind, now))
        {
            return available.endpoint.clone();
        }

        let fallback = candidates
            .iter()
            .max_by_key(|region| self.mark_for(&region.endpoint, kind).map(|mark| mark.marked_at))
            .map_or_else(|| self.inner.default_endpoint.clone(), |region| region.endpoint.clone());
        debug!(endpoint = %fallback, ?kind, "Every endpoint is marked unavailable, failing open");
        fallback
    }

    /// Marks an endpoint unavailable for reads and/or writes for `ttl`.
    ///
    /// Marks on the other axis are left untouched. Expired marks are ignored
    /// by lookups and overwritten by the next mark; nothing sweeps them.
    pub fn mark_unavailable(&self, endpoint: &Url, for_read: bool, for_write: bool, ttl: Duration) {
        if !for_read && !for_write {
            return;
        }
        let now = Instant::now();
        let until = now.checked_add(ttl).or_else(|| now.checked_add(FAR_FUTURE)).unwrap_or(now);
        let axis = AxisMark { marked_at: now, until };

        let mut entry = self.inner.marks.entry(endpoint.clone()).or_default();
        if for_read {
            entry.read = Some(axis);
            self.inner.metrics.record_endpoint_mark(endpoint.as_str(), MarkAxis::Read);
        }
        if for_write {
            entry.write = Some(axis);
            self.inner.metrics.record_endpoint_mark(endpoint.as_str(), MarkAxis::Write);
        }
        drop(entry);

        warn!(
            endpoint = %endpoint,
            for_read,
            for_write,
            ttl_secs = ttl.as_secs(),
            "Marked endpoint unavailable"
        );
    }

    /// Marks an endpoint unavailable for one kind of operation using the
    /// configured TTL.
    pub fn mark_unavailable_for(&self, endpoint: &Url, kind: OperationKind) {
        let ttl = self.inner.unavailability_ttl;
        match kind {
            OperationKind::Read => self.mark_unavailable(endpoint, true, false, ttl),
            OperationKind::Write => self.mark_unavailable(endpoint, false, true, ttl),
        }
    }

    /// Returns true if `endpoint` is currently marked for `kind`.
    #[must_use]
    pub fn is_unavailable(&self, endpoint: &Url, kind: OperationKind) -> bool {
        self.is_marked(endpoint, kind, Instant::now())
    }

    /// Refetches the topology and reorders the endpoint lists.
    ///
    /// Transient failures are retried with the metadata backoff. Marks are
    /// kept across refreshes.
    ///
    /// # Errors
    ///
    /// Returns the fetch error once retries are exhausted; the previous
    /// lists stay in place.
    pub async fn refresh_topology(&self) -> Result<()> {
        let fetcher = &self.inner.fetcher;
        let result = with_retry(&self.inner.retry_policy, || fetcher.fetch_regions()).await;
        self.inner.metrics.record_topology_refresh(result.is_ok());

        let account = result?;
        self.update_topology(&account);
        Ok(())
    }

    /// Reorders the endpoint lists from an account topology.
    pub fn update_topology(&self, account: &DatabaseAccount) {
        let snapshot = LocationSnapshot::from_account(
            account,
            &self.inner.preferred_regions,
            self.inner.use_multiple_write_locations,
            &self.inner.default_endpoint,
        );
        info!(
            read_regions = snapshot.read.len(),
            write_regions = snapshot.write.len(),
            first_write = snapshot.write.first().map_or("", |region| region.endpoint.as_str()),
            "Updated account topology"
        );
        self.inner.locations.store(Arc::new(snapshot));
    }

    /// Returns the read endpoints in preference order.
    #[must_use]
    pub fn read_endpoints(&self) -> Vec<Url> {
        self.inner.locations.load().read.iter().map(|region| region.endpoint.clone()).collect()
    }

    /// Returns the write endpoints in preference order.
    #[must_use]
    pub fn write_endpoints(&self) -> Vec<Url> {
        self.inner.locations.load().write.iter().map(|region| region.endpoint.clone()).collect()
    }

    /// Returns whether the background refresh task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Starts the periodic topology refresh. Idempotent.
    pub fn start_background_refresh(&self) {
        if self.inner.shutdown.is_cancelled() {
            debug!("Endpoint manager is shut down, not starting background refresh");
            return;
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Topology background refresh already running");
            return;
        }

        let manager = self.clone();
        let refresh_interval = self.inner.refresh_interval;

        tokio::spawn(async move {
            info!(interval_secs = refresh_interval.as_secs(), "Starting topology background refresh");

            let mut ticker = interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = manager.inner.shutdown.cancelled() => {
                        info!("Stopping topology background refresh");
                        manager.inner.running.store(false, Ordering::SeqCst);
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.refresh_topology().await {
                            warn!(error = %e, "Background topology refresh failed");
                        }
                    }
                    () = manager.inner.refresh_notify.notified() => {
                        debug!("Immediate topology refresh triggered");
                        if let Err(e) = manager.refresh_topology().await {
                            warn!(error = %e, "Triggered topology refresh failed");
                        }
                    }
                }
            }
        });
    }

    /// Asks for a topology refresh without waiting for it.
    ///
    /// Wakes the background task when running; otherwise spawns a one-off
    /// refresh unless one is already in flight.
    pub fn request_refresh(&self) {
        if self.is_running() {
            self.inner.refresh_notify.notify_one();
            return;
        }
        if self.inner.shutdown.is_cancelled()
            || self.inner.refresh_in_flight.swap(true, Ordering::SeqCst)
        {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.refresh_topology().await {
                warn!(error = %e, "Requested topology refresh failed");
            }
            manager.inner.refresh_in_flight.store(false, Ordering::SeqCst);
        });
    }

    /// Stops background refresh. Resolution keeps working on the last
    /// known topology.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn mark_for(&self, endpoint: &Url, kind: OperationKind) -> Option<AxisMark> {
        self.inner.marks.get(endpoint).and_then(|mark| mark.axis(kind))
    }

    fn is_marked(&self, endpoint: &Url, kind: OperationKind, now: Instant) -> bool {
        self.mark_for(endpoint, kind).is_some_and(|mark| mark.is_active(now))
    }
}

/// Read-only introspection of an [`EndpointManager`].
pub trait EndpointDiagnostics {
    /// Endpoints with at least one active mark.
    fn active_marks(&self) -> Vec<EndpointMarkSnapshot>;

    /// Ordered endpoints for one kind of operation.
    fn ordered_endpoints(&self, kind: OperationKind) -> Vec<Url>;
}

impl EndpointDiagnostics for EndpointManager {
    fn active_marks(&self) -> Vec<EndpointMarkSnapshot> {
        let now = Instant::now();
        let mut marks: Vec<EndpointMarkSnapshot> = self
            .inner
            .marks
            .iter()
            .filter_map(|entry| {
                let active = |axis: Option<AxisMark>| {
                    axis.filter(|mark| mark.is_active(now)).map(|mark| mark.until)
                };
                let read_until = active(entry.read);
                let write_until = active(entry.write);
                (read_until.is_some() || write_until.is_some()).then(|| EndpointMarkSnapshot {
                    endpoint: entry.key().clone(),
                    read_until,
                    write_until,
                })
            })
            .collect();
        marks.sort_by(|a, b| a.endpoint.as_str().cmp(b.endpoint.as_str()));
        marks
    }

    fn ordered_endpoints(&self, kind: OperationKind) -> Vec<Url> {
        match kind {
            OperationKind::Read => self.read_endpoints(),
            OperationKind::Write => self.write_endpoints(),
        }
    }
}
