//! In-process mock of the backing document service.
//!
//! [`MockDatabaseService`] implements every collaborator trait the client
//! needs ([`Transport`], [`CollectionResolver`], [`TopologyFetcher`] and
//! [`RangeFetcher`]) against shared in-memory state, so a
//! [`ResilientClient`](crate::ResilientClient) can be exercised end to end
//! without a network.
//!
//! # Features
//!
//! - **Collections**: create, delete and recreate under the same name
//! - **Partitions**: split a range; stale range ids answer 410
//! - **Sessions**: per-partition LSNs, per-region replication lag, 404/1002
//!   for session tokens a replica has not caught up with
//! - **Failure injection**: network errors, 429, 410, 403/3 and 503, once or
//!   pinned to an endpoint; unreachable endpoints
//! - **Request log**: every send with its endpoint, headers and arrival time
//!
//! # Example
//!
//! ```no_run
//! use meridian_sdk::mock::{MockDatabaseService, MockFailure};
//! use meridian_types::PartitionKeyRange;
//!
//! let service = MockDatabaseService::new();
//! service.create_collection(
//!     "dbs/app/colls/orders",
//!     "coll-1",
//!     vec![PartitionKeyRange::new("0", "", "FF", "rs-0")],
//! );
//! service.inject_failure(MockFailure::Unavailable);
//! ```

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode};
use meridian_types::{
    PartitionKeyRange, SessionToken, decode_partition_tokens, encode_partition_tokens, headers,
    headers::sub_status,
};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use url::Url;

use crate::{
    endpoint::{DatabaseAccount, TopologyFetcher},
    error::{NetworkCause, Result, SdkError},
    request::{DocumentRequest, OperationKind, ResourceOperation, StoreResponse},
    routing::{CollectionMetadata, CollectionResolver, RangeFeed, RangeFetcher},
    transport::Transport,
};

/// A failure the mock returns instead of serving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// The request never reaches the service.
    Network(NetworkCause),
    /// HTTP 429. `retry_after` is sent as `x-ms-retry-after-ms`.
    Throttled {
        /// Server-directed delay, `None` to omit the header.
        retry_after: Option<Duration>,
    },
    /// HTTP 410 with the given sub-status.
    Gone(u32),
    /// HTTP 403 with the write-forbidden sub-status.
    WriteForbidden,
    /// HTTP 503.
    Unavailable,
    /// HTTP 404 with the read-session-not-available sub-status.
    SessionNotAvailable,
}

/// One request as received by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Arrival time.
    pub at: Instant,
    /// Endpoint the request was sent to.
    pub endpoint: Url,
    /// Document operation.
    pub operation: ResourceOperation,
    /// Collection id the client resolved.
    pub collection_id: String,
    /// Name path the client addressed, if any.
    pub collection_name: Option<String>,
    /// Partition key range id the client routed to.
    pub partition_key_range_id: String,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RecordedRequest {
    /// Returns a request header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    endpoint: Option<Url>,
    failure: MockFailure,
}

#[derive(Debug)]
struct MockCollection {
    name_path: String,
    ranges: Vec<PartitionKeyRange>,
    /// Ids of ranges that were split away.
    gone: HashSet<String>,
    /// Committed LSN per partition.
    lsn: HashMap<String, u64>,
    documents: HashMap<String, Vec<u8>>,
    etag: u64,
    /// Ranges created at each etag, for incremental feeds.
    changes: Vec<(u64, Vec<String>)>,
    next_range_id: u64,
}

impl MockCollection {
    fn new(name_path: &str, mut ranges: Vec<PartitionKeyRange>) -> Self {
        ranges.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));
        let next_range_id = ranges
            .iter()
            .filter_map(|range| range.id.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1);
        let lsn = ranges.iter().map(|range| (range.id.clone(), 0)).collect();
        Self {
            name_path: name_path.to_owned(),
            ranges,
            gone: HashSet::new(),
            lsn,
            documents: HashMap::new(),
            etag: 1,
            changes: Vec::new(),
            next_range_id,
        }
    }

    fn range(&self, id: &str) -> Option<&PartitionKeyRange> {
        self.ranges.iter().find(|range| range.id == id)
    }
}

/// Shared state for the mock service.
#[derive(Debug, Default)]
struct MockState {
    account: RwLock<DatabaseAccount>,
    collections: RwLock<HashMap<String, MockCollection>>,
    names: RwLock<HashMap<String, String>>,
    /// Number of LSNs each region's replica trails the committed LSN by.
    replication_lag: RwLock<HashMap<Url, u64>>,
    unreachable: RwLock<HashSet<Url>>,
    failures: Mutex<VecDeque<InjectedFailure>>,
    delay: Mutex<Duration>,
    requests: Mutex<Vec<RecordedRequest>>,
    range_fetches: AtomicUsize,
    topology_fetches: AtomicUsize,
    collection_lookups: AtomicUsize,
}

impl MockState {
    /// Pops the first injected failure applying to `endpoint`.
    fn take_failure(&self, endpoint: &Url) -> Option<MockFailure> {
        let mut failures = self.failures.lock();
        let index = failures
            .iter()
            .position(|f| f.endpoint.as_ref().is_none_or(|target| target == endpoint))?;
        failures.remove(index).map(|f| f.failure)
    }

    /// Region id used in the session tokens minted for `endpoint`.
    fn region_id(&self, endpoint: &Url) -> u32 {
        let account = self.account.read();
        account
            .read_regions
            .iter()
            .chain(&account.write_regions)
            .position(|region| &region.endpoint == endpoint)
            .and_then(|index| u32::try_from(index).ok())
            .unwrap_or(0)
    }

    fn accepts_writes(&self, endpoint: &Url) -> bool {
        let account = self.account.read();
        account.write_regions.is_empty()
            || account.write_regions.iter().any(|region| &region.endpoint == endpoint)
    }
}

/// Mock implementation of the document service.
///
/// Construct with [`new`](Self::new) and hand clones of the returned `Arc`
/// to the client as every collaborator.
#[derive(Debug)]
pub struct MockDatabaseService {
    state: MockState,
}

impl MockDatabaseService {
    /// Creates an empty service with no regions and no collections.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: MockState::default() })
    }

    /// Replaces the account topology.
    pub fn set_account(&self, account: DatabaseAccount) {
        *self.state.account.write() = account;
    }

    /// Returns the account topology.
    #[must_use]
    pub fn account(&self) -> DatabaseAccount {
        self.state.account.read().clone()
    }

    /// Creates a collection. Replaces any collection the name pointed at.
    pub fn create_collection(&self, name_path: &str, id: &str, ranges: Vec<PartitionKeyRange>) {
        self.state.collections.write().insert(id.to_owned(), MockCollection::new(name_path, ranges));
        self.state.names.write().insert(name_path.to_owned(), id.to_owned());
    }

    /// Deletes a collection and its name.
    pub fn delete_collection(&self, id: &str) {
        if let Some(collection) = self.state.collections.write().remove(id) {
            let mut names = self.state.names.write();
            if names.get(&collection.name_path).is_some_and(|current| current == id) {
                names.remove(&collection.name_path);
            }
        }
    }

    /// Splits partition `range_id` at `split_key` and returns the child ids.
    ///
    /// Children record the parent lineage and inherit the parent's LSN.
    /// Requests still routed to the parent answer 410/1002.
    ///
    /// # Panics
    ///
    /// Panics if the collection or range does not exist, or `split_key`
    /// lies outside the range.
    #[allow(clippy::panic)]
    pub fn split_partition(
        &self,
        collection_id: &str,
        range_id: &str,
        split_key: &str,
    ) -> (String, String) {
        let mut collections = self.state.collections.write();
        let Some(collection) = collections.get_mut(collection_id) else {
            panic!("unknown collection {collection_id}");
        };
        let Some(index) = collection.ranges.iter().position(|range| range.id == range_id) else {
            panic!("unknown range {range_id}");
        };
        let parent = collection.ranges.remove(index);
        assert!(
            parent.min_inclusive.as_str() < split_key && split_key < parent.max_exclusive.as_str(),
            "split key {split_key} outside range {range_id}"
        );

        let lineage: Vec<String> =
            parent.parents.iter().cloned().chain([parent.id.clone()]).collect();
        let left_id = collection.next_range_id.to_string();
        let right_id = (collection.next_range_id + 1).to_string();
        collection.next_range_id += 2;

        let left = PartitionKeyRange::new(
            &left_id,
            &parent.min_inclusive,
            split_key,
            format!("{}-l", parent.replica_set),
        )
        .with_parents(lineage.clone());
        let right = PartitionKeyRange::new(
            &right_id,
            split_key,
            &parent.max_exclusive,
            format!("{}-r", parent.replica_set),
        )
        .with_parents(lineage);

        let inherited = collection.lsn.get(&parent.id).copied().unwrap_or(0);
        collection.lsn.insert(left_id.clone(), inherited);
        collection.lsn.insert(right_id.clone(), inherited);
        collection.gone.insert(parent.id);

        collection.ranges.insert(index, right);
        collection.ranges.insert(index, left);
        collection.etag += 1;
        collection.changes.push((collection.etag, vec![left_id.clone(), right_id.clone()]));
        (left_id, right_id)
    }

    /// Makes the replica in `endpoint`'s region trail the committed LSN.
    pub fn set_replication_lag(&self, endpoint: &Url, lsns: u64) {
        self.state.replication_lag.write().insert(endpoint.clone(), lsns);
    }

    /// Makes every request to `endpoint` fail to connect.
    pub fn set_unreachable(&self, endpoint: &Url, unreachable: bool) {
        let mut set = self.state.unreachable.write();
        if unreachable {
            set.insert(endpoint.clone());
        } else {
            set.remove(endpoint);
        }
    }

    /// Fails the next request, whatever its endpoint.
    pub fn inject_failure(&self, failure: MockFailure) {
        self.state.failures.lock().push_back(InjectedFailure { endpoint: None, failure });
    }

    /// Fails the next request sent to `endpoint`.
    pub fn inject_failure_at(&self, endpoint: &Url, failure: MockFailure) {
        self.state
            .failures
            .lock()
            .push_back(InjectedFailure { endpoint: Some(endpoint.clone()), failure });
    }

    /// Delays every request by `delay`.
    pub fn inject_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    /// Returns every request received, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Returns the number of requests received.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    /// Returns the number of routing map fetches.
    #[must_use]
    pub fn range_fetch_count(&self) -> usize {
        self.state.range_fetches.load(Ordering::SeqCst)
    }

    /// Returns the number of topology fetches.
    #[must_use]
    pub fn topology_fetch_count(&self) -> usize {
        self.state.topology_fetches.load(Ordering::SeqCst)
    }

    /// Returns the number of collection lookups.
    #[must_use]
    pub fn collection_lookup_count(&self) -> usize {
        self.state.collection_lookups.load(Ordering::SeqCst)
    }

    /// Returns the current ranges of a collection.
    #[must_use]
    pub fn ranges(&self, collection_id: &str) -> Vec<PartitionKeyRange> {
        self.state
            .collections
            .read()
            .get(collection_id)
            .map(|collection| collection.ranges.clone())
            .unwrap_or_default()
    }

    /// Returns the committed LSN of a partition.
    #[must_use]
    pub fn partition_lsn(&self, collection_id: &str, range_id: &str) -> Option<u64> {
        self.state.collections.read().get(collection_id)?.lsn.get(range_id).copied()
    }

    /// Returns a stored document body.
    #[must_use]
    pub fn document(&self, collection_id: &str, document_id: &str) -> Option<Vec<u8>> {
        self.state.collections.read().get(collection_id)?.documents.get(document_id).cloned()
    }

    /// Clears the request log and the fetch counters.
    pub fn reset_counters(&self) {
        self.state.requests.lock().clear();
        self.state.range_fetches.store(0, Ordering::SeqCst);
        self.state.topology_fetches.store(0, Ordering::SeqCst);
        self.state.collection_lookups.store(0, Ordering::SeqCst);
    }

    fn record(&self, request: &DocumentRequest) {
        self.state.requests.lock().push(RecordedRequest {
            at: Instant::now(),
            endpoint: request.endpoint.clone(),
            operation: request.operation,
            collection_id: request.collection_id.clone(),
            collection_name: request.collection_name.clone(),
            partition_key_range_id: request.partition_key_range_id.clone(),
            headers: request.headers.clone(),
        });
    }

    fn serve(&self, request: &DocumentRequest) -> Result<StoreResponse> {
        if self.state.unreachable.read().contains(&request.endpoint) {
            return Err(network_error(&request.endpoint, NetworkCause::ConnectFailed));
        }
        if let Some(failure) = self.state.take_failure(&request.endpoint) {
            return Err(failure_error(&request.endpoint, failure));
        }

        if let Some(name) = &request.collection_name {
            let current = self.state.names.read().get(name).cloned();
            match current {
                Some(id) if id == request.collection_id => {},
                Some(_) => {
                    return Err(service_error(
                        StatusCode::NOT_FOUND,
                        sub_status::READ_SESSION_NOT_AVAILABLE,
                        "collection was recreated",
                    ));
                },
                None => return Err(service_error(StatusCode::NOT_FOUND, 0, "collection not found")),
            }
        }

        let kind = request.operation.kind();
        if kind == OperationKind::Write && !self.state.accepts_writes(&request.endpoint) {
            return Err(service_error(
                StatusCode::FORBIDDEN,
                sub_status::WRITE_FORBIDDEN,
                "region does not accept writes",
            ));
        }

        let region = self.state.region_id(&request.endpoint);
        let lag = self.state.replication_lag.read().get(&request.endpoint).copied().unwrap_or(0);

        let mut collections = self.state.collections.write();
        let Some(collection) = collections.get_mut(&request.collection_id) else {
            return Err(service_error(StatusCode::NOT_FOUND, 0, "collection not found"));
        };

        let pid = request.partition_key_range_id.as_str();
        let serves_key = collection
            .range(pid)
            .is_some_and(|range| range.contains(&request.effective_partition_key));
        if collection.gone.contains(pid) || !serves_key {
            return Err(service_error(
                StatusCode::GONE,
                sub_status::PARTITION_KEY_RANGE_GONE,
                "partition key range is gone",
            ));
        }

        let committed = collection.lsn.get(pid).copied().unwrap_or(0);
        match kind {
            OperationKind::Read => {
                let replica_lsn = committed.saturating_sub(lag);
                if let Some(required) = required_token(request, pid)?
                    && required.global_lsn() > replica_lsn
                {
                    return Err(service_error(
                        StatusCode::NOT_FOUND,
                        sub_status::READ_SESSION_NOT_AVAILABLE,
                        "read session not available",
                    ));
                }
                let token = SessionToken::new(1, replica_lsn, [(region, replica_lsn)]);
                let document_id = request.document_id.as_deref().unwrap_or_default();
                match collection.documents.get(document_id) {
                    Some(body) => Ok(response(StatusCode::OK, pid, &token, body.clone())),
                    None => Err(service_error(StatusCode::NOT_FOUND, 0, "document not found")),
                }
            },
            OperationKind::Write => {
                let document_id = request.document_id.clone().unwrap_or_default();
                let exists = collection.documents.contains_key(&document_id);
                let status = match request.operation {
                    ResourceOperation::Create if exists => {
                        return Err(service_error(StatusCode::CONFLICT, 0, "document exists"));
                    },
                    ResourceOperation::Replace | ResourceOperation::Delete if !exists => {
                        return Err(service_error(StatusCode::NOT_FOUND, 0, "document not found"));
                    },
                    ResourceOperation::Create => StatusCode::CREATED,
                    ResourceOperation::Delete => StatusCode::NO_CONTENT,
                    _ => StatusCode::OK,
                };

                if request.operation == ResourceOperation::Delete {
                    collection.documents.remove(&document_id);
                } else {
                    collection.documents.insert(document_id, request.body.clone());
                }
                let lsn = committed + 1;
                collection.lsn.insert(pid.to_owned(), lsn);
                let token = SessionToken::new(1, lsn, [(region, lsn)]);
                Ok(response(status, pid, &token, Vec::new()))
            },
        }
    }
}

fn required_token(request: &DocumentRequest, pid: &str) -> Result<Option<SessionToken>> {
    let Some(header) =
        request.headers.get(headers::SESSION_TOKEN).and_then(|value| value.to_str().ok())
    else {
        return Ok(None);
    };
    Ok(decode_partition_tokens(header)?
        .into_iter()
        .find(|(partition_id, _)| partition_id == pid)
        .map(|(_, token)| token))
}

fn response(status: StatusCode, pid: &str, token: &SessionToken, body: Vec<u8>) -> StoreResponse {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&encode_partition_tokens([(pid, token)])) {
        headers.insert(headers::SESSION_TOKEN, value);
    }
    StoreResponse { status, headers, body }
}

fn service_error(status: StatusCode, sub: u32, message: &str) -> SdkError {
    let mut map = HeaderMap::new();
    map.insert(headers::SUB_STATUS, HeaderValue::from(sub));
    SdkError::from_response(status, &map, message)
}

fn network_error(endpoint: &Url, cause: NetworkCause) -> SdkError {
    SdkError::Network { cause, endpoint: endpoint.to_string(), message: "injected".to_owned() }
}

fn failure_error(endpoint: &Url, failure: MockFailure) -> SdkError {
    match failure {
        MockFailure::Network(cause) => network_error(endpoint, cause),
        MockFailure::Throttled { retry_after } => {
            let mut map = HeaderMap::new();
            if let Some(delay) = retry_after {
                let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                map.insert(headers::RETRY_AFTER_MS, HeaderValue::from(millis));
            }
            SdkError::from_response(StatusCode::TOO_MANY_REQUESTS, &map, "request rate too large")
        },
        MockFailure::Gone(sub) => service_error(StatusCode::GONE, sub, "gone"),
        MockFailure::WriteForbidden => {
            service_error(StatusCode::FORBIDDEN, sub_status::WRITE_FORBIDDEN, "write forbidden")
        },
        MockFailure::Unavailable => {
            service_error(StatusCode::SERVICE_UNAVAILABLE, 0, "service unavailable")
        },
        MockFailure::SessionNotAvailable => service_error(
            StatusCode::NOT_FOUND,
            sub_status::READ_SESSION_NOT_AVAILABLE,
            "read session not available",
        ),
    }
}

#[async_trait]
impl Transport for MockDatabaseService {
    async fn send(&self, request: &DocumentRequest) -> Result<StoreResponse> {
        let delay = *self.state.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record(request);
        self.serve(request)
    }
}

#[async_trait]
impl CollectionResolver for MockDatabaseService {
    async fn resolve_collection(&self, name_or_id: &str) -> Result<CollectionMetadata> {
        self.state.collection_lookups.fetch_add(1, Ordering::SeqCst);
        let id = if name_or_id.contains('/') {
            self.state.names.read().get(name_or_id).cloned()
        } else {
            Some(name_or_id.to_owned())
        };
        let collections = self.state.collections.read();
        id.and_then(|id| {
            collections
                .get(&id)
                .map(|collection| CollectionMetadata { name_path: collection.name_path.clone(), id })
        })
        .ok_or_else(|| service_error(StatusCode::NOT_FOUND, 0, "collection not found"))
    }
}

#[async_trait]
impl TopologyFetcher for MockDatabaseService {
    async fn fetch_regions(&self) -> Result<DatabaseAccount> {
        self.state.topology_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.account())
    }
}

#[async_trait]
impl RangeFetcher for MockDatabaseService {
    async fn fetch_ranges(
        &self,
        collection_id: &str,
        if_none_match: Option<&str>,
    ) -> Result<RangeFeed> {
        self.state.range_fetches.fetch_add(1, Ordering::SeqCst);
        let collections = self.state.collections.read();
        let collection = collections
            .get(collection_id)
            .ok_or_else(|| service_error(StatusCode::NOT_FOUND, 0, "collection not found"))?;
        let etag = Some(collection.etag.to_string());

        let Some(since) = if_none_match.and_then(|tag| tag.parse::<u64>().ok()) else {
            return Ok(RangeFeed { ranges: collection.ranges.clone(), etag });
        };

        // Only ranges created after `since` that still exist.
        let created: HashSet<&str> = collection
            .changes
            .iter()
            .filter(|(at, _)| *at > since)
            .flat_map(|(_, ids)| ids.iter().map(String::as_str))
            .collect();
        let ranges = collection
            .ranges
            .iter()
            .filter(|range| created.contains(range.id.as_str()))
            .cloned()
            .collect();
        Ok(RangeFeed { ranges, etag })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    fn endpoint() -> Url {
        Url::parse("https://east.example.com/").unwrap()
    }

    fn request(operation: ResourceOperation, pid: &str, key: &str) -> DocumentRequest {
        DocumentRequest {
            operation,
            endpoint: endpoint(),
            collection_id: "c1".to_owned(),
            collection_name: None,
            partition_key_range_id: pid.to_owned(),
            effective_partition_key: key.to_owned(),
            document_id: Some("doc".to_owned()),
            headers: HeaderMap::new(),
            body: b"{}".to_vec(),
        }
    }

    fn service() -> Arc<MockDatabaseService> {
        let service = MockDatabaseService::new();
        service.create_collection(
            "dbs/app/colls/orders",
            "c1",
            vec![PartitionKeyRange::new("0", "", "FF", "rs-0")],
        );
        service
    }

    #[tokio::test]
    async fn test_write_then_read_returns_session_tokens() {
        let service = service();
        let created = service.send(&request(ResourceOperation::Create, "0", "10")).await.unwrap();
        assert_eq!(created.status, StatusCode::CREATED);
        assert_eq!(created.session_token(), Some("0:1#1#0=1"));

        let read = service.send(&request(ResourceOperation::Read, "0", "10")).await.unwrap();
        assert_eq!(read.body, b"{}".to_vec());
        assert_eq!(service.partition_lsn("c1", "0"), Some(1));
    }

    #[tokio::test]
    async fn test_lagging_replica_rejects_newer_session() {
        let service = service();
        service.send(&request(ResourceOperation::Create, "0", "10")).await.unwrap();
        service.set_replication_lag(&endpoint(), 1);

        let mut read = request(ResourceOperation::Read, "0", "10");
        read.headers.insert(headers::SESSION_TOKEN, HeaderValue::from_static("0:1#1"));
        let err = service.send(&read).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::StaleSession);
    }

    #[tokio::test]
    async fn test_split_parent_answers_gone() {
        let service = service();
        let (left, right) = service.split_partition("c1", "0", "80");
        assert_eq!((left.as_str(), right.as_str()), ("1", "2"));

        let err = service.send(&request(ResourceOperation::Create, "0", "10")).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::GONE));
        assert_eq!(err.sub_status(), Some(sub_status::PARTITION_KEY_RANGE_GONE));
        service.send(&request(ResourceOperation::Create, "1", "10")).await.unwrap();

        let delta = service.fetch_ranges("c1", Some("1")).await.unwrap();
        assert_eq!(delta.ranges.len(), 2);
        assert!(delta.ranges.iter().all(|range| range.parents == vec!["0".to_owned()]));
        assert_eq!(delta.etag.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let service = service();
        service.inject_failure(MockFailure::Throttled { retry_after: Some(Duration::from_millis(100)) });
        service.inject_failure(MockFailure::Unavailable);

        let first = service.send(&request(ResourceOperation::Create, "0", "10")).await.unwrap_err();
        assert_eq!(
            first.class(),
            ErrorClass::Throttled { retry_after: Some(Duration::from_millis(100)) }
        );
        let second = service.send(&request(ResourceOperation::Create, "0", "10")).await.unwrap_err();
        assert_eq!(second.class(), ErrorClass::ServiceUnavailable);
        service.send(&request(ResourceOperation::Create, "0", "10")).await.unwrap();
        assert_eq!(service.request_count(), 3);
    }

    #[tokio::test]
    async fn test_recreated_name_rejects_stale_id() {
        let service = service();
        service.delete_collection("c1");
        service.create_collection(
            "dbs/app/colls/orders",
            "c2",
            vec![PartitionKeyRange::new("0", "", "FF", "rs-0")],
        );

        let mut stale = request(ResourceOperation::Read, "0", "10");
        stale.collection_name = Some("dbs/app/colls/orders".to_owned());
        let err = service.send(&stale).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::StaleSession);

        let resolved = service.resolve_collection("dbs/app/colls/orders").await.unwrap();
        assert_eq!(resolved.id, "c2");
    }
}
