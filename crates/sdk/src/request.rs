//! Operation descriptions and per-operation request state.
//!
//! An [`Operation`] is what the caller asks for. The pipeline wraps it in a
//! [`RequestContext`] that accumulates resolved state (collection id, target
//! partition, endpoint, session token) across attempts. Retry bookkeeping
//! lives in the [`RetryContext`] sub-struct, which only the retry chain and
//! the pipeline touch.

use std::{sync::Arc, time::Duration};

use http::{HeaderMap, StatusCode};
use meridian_types::{MAX_EFFECTIVE_PARTITION_KEY, PartitionKeyRange};
use url::Url;

use crate::{config::ConsistencyLevel, error::ErrorClass, routing::CollectionRoutingMap};

/// Whether an operation reads or mutates data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Served by any read region.
    Read,
    /// Served by a write region.
    Write,
}

/// Document operation requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOperation {
    /// Insert a new document.
    Create,
    /// Read one document.
    Read,
    /// Replace an existing document.
    Replace,
    /// Insert or replace a document.
    Upsert,
    /// Delete a document.
    Delete,
}

impl ResourceOperation {
    /// Returns whether the operation reads or writes.
    #[must_use]
    pub fn kind(self) -> OperationKind {
        match self {
            Self::Read => OperationKind::Read,
            Self::Create | Self::Replace | Self::Upsert | Self::Delete => OperationKind::Write,
        }
    }

    /// Returns a short label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Replace => "replace",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

/// How an operation addresses its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionRef {
    /// Name path, `dbs/<db>/colls/<coll>`. Resolved to an id per attempt.
    Name(String),
    /// Immutable resource id.
    Id(String),
}

impl CollectionRef {
    /// Parses a reference: values containing `/` are name paths.
    pub fn parse(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.contains('/') { Self::Name(value) } else { Self::Id(value) }
    }

    /// Returns the name path when addressed by name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Id(_) => None,
        }
    }
}

/// A document operation as issued by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub(crate) resource_operation: ResourceOperation,
    pub(crate) collection: CollectionRef,
    pub(crate) effective_partition_key: String,
    pub(crate) document_id: Option<String>,
    pub(crate) body: Vec<u8>,
    pub(crate) session_token: Option<String>,
}

impl Operation {
    /// Creates an operation.
    ///
    /// `effective_partition_key` is the hashed key (uppercase hex) locating
    /// the document in the collection's key space.
    pub fn new(
        resource_operation: ResourceOperation,
        collection: CollectionRef,
        effective_partition_key: impl Into<String>,
    ) -> Self {
        Self {
            resource_operation,
            collection,
            effective_partition_key: effective_partition_key.into(),
            document_id: None,
            body: Vec::new(),
            session_token: None,
        }
    }

    /// Creates a document insert.
    pub fn create(
        collection: CollectionRef,
        effective_partition_key: impl Into<String>,
        document_id: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(ResourceOperation::Create, collection, effective_partition_key)
            .with_document_id(document_id)
            .with_body(body)
    }

    /// Creates a point read.
    pub fn read(
        collection: CollectionRef,
        effective_partition_key: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        Self::new(ResourceOperation::Read, collection, effective_partition_key)
            .with_document_id(document_id)
    }

    /// Sets the document id.
    #[must_use]
    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Sets the opaque request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sends this session token instead of the one tracked by the client.
    ///
    /// Used to carry a session across clients: a token returned to one
    /// client can be handed to another to read its writes.
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Returns the session token supplied with
    /// [`with_session_token`](Self::with_session_token).
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Returns whether the operation reads or writes.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.resource_operation.kind()
    }

    /// Returns the document operation.
    #[must_use]
    pub fn resource_operation(&self) -> ResourceOperation {
        self.resource_operation
    }

    /// Returns the collection reference.
    #[must_use]
    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    /// Returns the effective partition key.
    #[must_use]
    pub fn effective_partition_key(&self) -> &str {
        &self.effective_partition_key
    }

    /// Returns true if the key lies inside the collection key space.
    pub(crate) fn has_valid_partition_key(&self) -> bool {
        self.effective_partition_key.as_str() < MAX_EFFECTIVE_PARTITION_KEY
    }
}

/// A fully addressed request handed to the [`Transport`](crate::Transport).
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    /// Document operation.
    pub operation: ResourceOperation,
    /// Regional endpoint the request is sent to.
    pub endpoint: Url,
    /// Resolved collection resource id.
    pub collection_id: String,
    /// Name path the caller addressed the collection by, if any.
    pub collection_name: Option<String>,
    /// Partition key range the request targets.
    pub partition_key_range_id: String,
    /// Effective partition key of the document.
    pub effective_partition_key: String,
    /// Document id, when the operation addresses one.
    pub document_id: Option<String>,
    /// Request headers (session token, refresh signals, consistency).
    pub headers: HeaderMap,
    /// Opaque body.
    pub body: Vec<u8>,
}

/// A successful response from the backing service.
#[derive(Debug, Clone)]
pub struct StoreResponse {
    /// HTTP status (2xx).
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Opaque body.
    pub body: Vec<u8>,
}

impl StoreResponse {
    /// Returns the session token header, if the service sent one.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.headers
            .get(meridian_types::headers::SESSION_TOKEN)
            .and_then(|value| value.to_str().ok())
    }
}

/// Retry bookkeeping for one top-level operation.
///
/// Owned by a single request; never shared.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    attempts: u32,
    charged_retries: u32,
    uncharged_retries: u32,
    endpoints_tried: Vec<Url>,
    accumulated_backoff: Duration,
    last_error: Option<ErrorClass>,
}

impl RetryContext {
    /// Number of sends made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retries that consumed the caller's retry budget.
    #[must_use]
    pub fn charged_retries(&self) -> u32 {
        self.charged_retries
    }

    /// Retries granted without charging the budget.
    #[must_use]
    pub fn uncharged_retries(&self) -> u32 {
        self.uncharged_retries
    }

    /// Total retries of either kind.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.charged_retries + self.uncharged_retries
    }

    /// Endpoints sent to, in order, without repeats.
    #[must_use]
    pub fn endpoints_tried(&self) -> &[Url] {
        &self.endpoints_tried
    }

    /// Sum of all retry delays.
    #[must_use]
    pub fn accumulated_backoff(&self) -> Duration {
        self.accumulated_backoff
    }

    /// Classification of the most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorClass> {
        self.last_error
    }

    pub(crate) fn record_attempt(&mut self, endpoint: &Url) {
        self.attempts += 1;
        if !self.endpoints_tried.contains(endpoint) {
            self.endpoints_tried.push(endpoint.clone());
        }
    }

    pub(crate) fn record_failure(&mut self, class: ErrorClass) {
        self.last_error = Some(class);
    }

    pub(crate) fn record_retry(&mut self, after: Duration, charged: bool) {
        if charged {
            self.charged_retries += 1;
        } else {
            self.uncharged_retries += 1;
        }
        self.accumulated_backoff = self.accumulated_backoff.saturating_add(after);
    }
}

/// State threaded through every attempt of one operation.
#[derive(Debug)]
pub struct RequestContext {
    operation: Operation,
    consistency: ConsistencyLevel,

    pub(crate) collection_id: Option<String>,
    pub(crate) routing_map: Option<Arc<CollectionRoutingMap>>,
    pub(crate) target_range: Option<PartitionKeyRange>,
    pub(crate) endpoint: Option<Url>,
    pub(crate) session_token: Option<String>,

    /// Map the last attempt was routed with, kept after the target is dropped
    /// so the routing refresh can tell whether someone else already refreshed.
    pub(crate) stale_routing_map: Option<Arc<CollectionRoutingMap>>,
    pub(crate) force_address_refresh: bool,
    pub(crate) force_routing_map_refresh: bool,
    pub(crate) force_name_refresh: bool,
    /// The caller's session token belongs to a collection that no longer
    /// backs the name.
    pub(crate) caller_token_discarded: bool,

    pub(crate) retry: RetryContext,
}

impl RequestContext {
    /// Creates the context for a new operation.
    #[must_use]
    pub fn new(operation: Operation, consistency: ConsistencyLevel) -> Self {
        Self {
            operation,
            consistency,
            collection_id: None,
            routing_map: None,
            target_range: None,
            endpoint: None,
            session_token: None,
            stale_routing_map: None,
            force_address_refresh: false,
            force_routing_map_refresh: false,
            force_name_refresh: false,
            caller_token_discarded: false,
            retry: RetryContext::default(),
        }
    }

    /// Returns the caller's operation.
    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Returns whether the operation reads or writes.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    /// Returns the consistency level in force.
    #[must_use]
    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    /// Returns the resolved collection id, once known.
    #[must_use]
    pub fn collection_id(&self) -> Option<&str> {
        self.collection_id.as_deref()
    }

    /// Returns the name path when the operation addresses its collection by name.
    #[must_use]
    pub fn collection_name(&self) -> Option<&str> {
        self.operation.collection.name()
    }

    /// Returns the resolved target partition, once known.
    #[must_use]
    pub fn target_range(&self) -> Option<&PartitionKeyRange> {
        self.target_range.as_ref()
    }

    /// Returns the endpoint of the current attempt.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    /// Returns the session token header of the current attempt.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Returns the retry bookkeeping.
    #[must_use]
    pub fn retry(&self) -> &RetryContext {
        &self.retry
    }

    /// Drops the resolved partition so the next attempt routes again.
    ///
    /// The routing map it came from is remembered for coalesced refreshes.
    pub(crate) fn clear_target(&mut self) {
        self.target_range = None;
        if let Some(map) = self.routing_map.take() {
            self.stale_routing_map = Some(map);
        }
    }

    /// Returns the caller-supplied session token still in force.
    #[must_use]
    pub fn caller_session_token(&self) -> Option<&str> {
        if self.caller_token_discarded {
            return None;
        }
        self.operation.session_token()
    }

    /// Stops sending the caller-supplied session token.
    pub(crate) fn discard_caller_session_token(&mut self) {
        self.caller_token_discarded = true;
    }

    /// Drops the resolved collection, partition and endpoint.
    pub(crate) fn clear_resolved(&mut self) {
        self.collection_id = None;
        self.routing_map = None;
        self.stale_routing_map = None;
        self.target_range = None;
        self.endpoint = None;
    }
}
