//! The request pipeline.
//!
//! [`ResilientClient`] wires the caches and the retry chain around an
//! injected [`Transport`] and drives every operation through
//! `INIT -> SENT -> {SUCCESS, RETRY -> SENT, FAILED}`:
//!
//! 1. Resolve the collection (by name through the [`CollectionCache`]).
//! 2. Resolve the target partition from the [`PartitionRoutingCache`].
//! 3. Let the policy chain pick the endpoint.
//! 4. Attach the session token and refresh signals, then send.
//! 5. On success merge the response session token; on failure ask the chain.
//!
//! Terminal errors carry the retry history: [`SdkError::StillThrottled`] for
//! throttling, [`SdkError::RetryExhausted`] whenever at least one retry
//! happened, the raw error otherwise.

use std::{mem, sync::Arc};

use http::{HeaderMap, HeaderValue};
use meridian_types::{
    PartitionKeyRange, decode_partition_tokens, encode_partition_tokens, headers,
};
use snafu::ensure;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::{BackoffPolicy, ClientConfig, ConsistencyLevel},
    endpoint::{EndpointManager, TopologyFetcher},
    error::{ErrorClass, ResolutionSnafu, Result, SdkError},
    metrics::{SdkMetrics, default_metrics},
    request::{
        CollectionRef, DocumentRequest, Operation, OperationKind, RequestContext, StoreResponse,
    },
    retry::{DefaultRetryPolicy, RetryPolicy, RetryPolicyFactory, ShouldRetry, sleep_or_cancel},
    routing::{CollectionCache, CollectionResolver, PartitionRoutingCache, RangeFetcher},
    session::SessionTokenStore,
    transport::Transport,
};

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    endpoints: EndpointManager,
    collections: Arc<CollectionCache>,
    routing: Arc<PartitionRoutingCache>,
    session: Arc<SessionTokenStore>,
    policies: RetryPolicyFactory,
    metrics: Arc<dyn SdkMetrics>,
    cancellation: CancellationToken,
}

/// Client for document operations with session consistency and automatic
/// recovery from regional failures, topology changes and throttling.
///
/// Every collaborator is injected at construction; there is no process-wide
/// state. Cheap to clone; clones share caches and shut down together.
///
/// # Example
///
/// ```no_run
/// # use meridian_sdk::{ClientConfig, CollectionRef, Operation, ResilientClient};
/// # use meridian_sdk::mock::MockDatabaseService;
/// # async fn example() -> meridian_sdk::Result<()> {
/// let service = MockDatabaseService::new();
/// let config = ClientConfig::builder()
///     .with_default_endpoint("https://account.example.com/")
///     .build()?;
/// let client = ResilientClient::from_service(config, service);
/// client.start().await?;
///
/// let orders = CollectionRef::parse("dbs/app/colls/orders");
/// client.execute(Operation::create(orders.clone(), "3A", "order-1", b"{}".to_vec())).await?;
/// let read = client.execute(Operation::read(orders, "3A", "order-1")).await?;
/// assert_eq!(read.body, b"{}".to_vec());
///
/// client.shutdown();
/// # Ok(())
/// # }
/// ```
///
/// # Cancellation
///
/// [`shutdown`](Self::shutdown) cancels every in-flight operation and the
/// background topology refresh. A per-operation [`CancellationToken`] passed
/// to [`execute_cancellable`](Self::execute_cancellable) cancels just that
/// operation. Both return [`SdkError::Cancelled`] and leave the shared caches
/// consistent.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    inner: Arc<ClientInner>,
}

#[bon::bon]
impl ResilientClient {
    /// Creates a client from its collaborators.
    ///
    /// The endpoint manager routes to the configured default endpoint until
    /// [`start`](Self::start) fetches the account topology.
    #[builder]
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn CollectionResolver>,
        topology: Arc<dyn TopologyFetcher>,
        ranges: Arc<dyn RangeFetcher>,
        metrics: Option<Arc<dyn SdkMetrics>>,
    ) -> Self {
        let metrics = metrics.unwrap_or_else(default_metrics);
        let metadata_retry: BackoffPolicy = config.metadata_retry().clone();

        let endpoints = EndpointManager::with_metrics(&config, topology, Arc::clone(&metrics));
        let collections = Arc::new(CollectionCache::new(resolver, metadata_retry.clone()));
        let routing = Arc::new(
            PartitionRoutingCache::new(ranges, metadata_retry).with_metrics(Arc::clone(&metrics)),
        );
        let session = Arc::new(SessionTokenStore::new());
        let policies = RetryPolicyFactory::new(
            config.clone(),
            endpoints.clone(),
            Arc::clone(&routing),
            Arc::clone(&collections),
            Arc::clone(&session),
        );

        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                endpoints,
                collections,
                routing,
                session,
                policies,
                metrics,
                cancellation: CancellationToken::new(),
            }),
        }
    }
}

impl ResilientClient {
    /// Creates a client whose collaborators are all served by one service.
    pub fn from_service<S>(config: ClientConfig, service: Arc<S>) -> Self
    where
        S: Transport + CollectionResolver + TopologyFetcher + RangeFetcher + 'static,
    {
        Self::builder()
            .config(config)
            .transport(service.clone())
            .resolver(service.clone())
            .topology(service.clone())
            .ranges(service)
            .build()
    }

    /// Fetches the account topology and starts the background refresh.
    ///
    /// The refresh task starts even if the first fetch fails; until a fetch
    /// succeeds every request goes to the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns the topology fetch error.
    pub async fn start(&self) -> Result<()> {
        let refreshed = self.inner.endpoints.refresh_topology().await;
        self.inner.endpoints.start_background_refresh();
        refreshed
    }

    /// Cancels in-flight operations and stops background work.
    pub fn shutdown(&self) {
        self.inner.cancellation.cancel();
        self.inner.endpoints.shutdown();
        debug!("Client shutdown initiated");
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the endpoint manager.
    #[must_use]
    pub fn endpoints(&self) -> &EndpointManager {
        &self.inner.endpoints
    }

    /// Returns the routing map cache.
    #[must_use]
    pub fn routing_cache(&self) -> &Arc<PartitionRoutingCache> {
        &self.inner.routing
    }

    /// Returns the collection name cache.
    #[must_use]
    pub fn collection_cache(&self) -> &Arc<CollectionCache> {
        &self.inner.collections
    }

    /// Returns the session token store.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionTokenStore> {
        &self.inner.session
    }

    /// Returns the session token list of a collection, by name path or id.
    ///
    /// Hand the result to another client with
    /// [`Operation::with_session_token`] to read this client's writes there.
    #[must_use]
    pub fn session_token(&self, path_or_id: &str) -> String {
        self.inner.session.get_token(path_or_id)
    }

    /// Creates the context for `operation` at the configured consistency.
    #[must_use]
    pub fn new_context(&self, operation: Operation) -> RequestContext {
        RequestContext::new(operation, self.inner.config.consistency())
    }

    /// Runs an operation to completion.
    ///
    /// # Errors
    ///
    /// Returns the classified error once the retry chain gives up, or
    /// [`SdkError::Cancelled`] after shutdown.
    pub async fn execute(&self, operation: Operation) -> Result<StoreResponse> {
        self.execute_cancellable(operation, &CancellationToken::new()).await
    }

    /// Runs an operation that also stops when `token` is cancelled.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn execute_cancellable(
        &self,
        operation: Operation,
        token: &CancellationToken,
    ) -> Result<StoreResponse> {
        let mut ctx = self.new_context(operation);
        self.execute_with_context(&mut ctx, token).await
    }

    /// Runs an operation with a caller-owned context.
    ///
    /// The context keeps the resolved state and retry history after the call
    /// returns.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn execute_with_context(
        &self,
        ctx: &mut RequestContext,
        token: &CancellationToken,
    ) -> Result<StoreResponse> {
        let started = Instant::now();
        let operation = ctx.operation().resource_operation().as_str();

        let result = tokio::select! {
            biased;
            () = token.cancelled() => Err(SdkError::Cancelled),
            result = self.run(ctx) => result,
        };

        self.inner.metrics.record_operation(operation, started.elapsed(), result.is_ok());
        result
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<StoreResponse> {
        let shutdown = &self.inner.cancellation;
        if shutdown.is_cancelled() {
            return Err(SdkError::Cancelled);
        }
        ensure!(
            ctx.operation().has_valid_partition_key(),
            ResolutionSnafu {
                message: format!(
                    "effective partition key {:?} is outside the key space",
                    ctx.operation().effective_partition_key()
                ),
            }
        );
        if let Some(token) = ctx.operation().session_token() {
            decode_partition_tokens(token)?;
        }

        let operation = ctx.operation().resource_operation().as_str();
        let max_attempts = self.inner.config.max_operation_attempts();
        let mut policy = self.inner.policies.create();

        loop {
            let request = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Err(SdkError::Cancelled),
                request = self.prepare(ctx, &mut policy) => request?,
            };
            ctx.retry.record_attempt(&request.endpoint);

            let outcome = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Err(SdkError::Cancelled),
                outcome = self.inner.transport.send(&request) => outcome,
            };
            ctx.force_address_refresh = false;
            ctx.force_routing_map_refresh = false;

            let error = match outcome {
                Ok(response) => {
                    self.record_session(ctx, &response);
                    return Ok(response);
                },
                Err(SdkError::Cancelled) => return Err(SdkError::Cancelled),
                Err(error) => error,
            };
            ctx.retry.record_failure(error.class());

            let decision = match policy.should_retry(&error, ctx).await {
                ShouldRetry::Retry(decision) => decision,
                ShouldRetry::NoRetry => return Err(finalize(error, ctx)),
            };
            if decision.counts_against_budget && ctx.retry().charged_retries() + 1 >= max_attempts {
                warn!(
                    attempts = ctx.retry().attempts(),
                    error = %error,
                    "Operation attempt ceiling reached"
                );
                return Err(finalize(error, ctx));
            }

            ctx.retry.record_retry(decision.after, decision.counts_against_budget);
            self.inner.metrics.record_retry(operation, error.error_type());
            debug!(
                attempt = ctx.retry().attempts(),
                backoff_ms = decision.after.as_millis() as u64,
                alternate_target = decision.alternate_target,
                charged = decision.counts_against_budget,
                error = %error,
                "Retrying operation"
            );
            sleep_or_cancel(decision.after, shutdown).await?;
        }
    }

    /// Resolves whatever the previous attempt left unresolved and builds the
    /// request for the next send.
    async fn prepare(
        &self,
        ctx: &mut RequestContext,
        policy: &mut DefaultRetryPolicy,
    ) -> Result<DocumentRequest> {
        let collection_id = match ctx.collection_id.clone() {
            Some(id) => id,
            None => {
                let id = match ctx.operation().collection().clone() {
                    CollectionRef::Id(id) => id,
                    CollectionRef::Name(name) => {
                        let force = mem::take(&mut ctx.force_name_refresh);
                        self.inner.collections.resolve(&name, force).await?.id
                    },
                };
                ctx.collection_id = Some(id.clone());
                id
            },
        };

        let range = match ctx.target_range.clone() {
            Some(range) => range,
            None => {
                let previous = ctx.stale_routing_map.take();
                let map = self.inner.routing.try_lookup(&collection_id, previous.as_ref()).await?;
                let range = map.lookup(ctx.operation().effective_partition_key()).clone();
                ctx.target_range = Some(range.clone());
                ctx.routing_map = Some(map);
                range
            },
        };

        policy.on_before_send(ctx);
        let Some(endpoint) = ctx.endpoint.clone() else {
            return ResolutionSnafu { message: "no endpoint selected" }.fail();
        };

        ctx.session_token = self.session_header(ctx, &collection_id, &range);

        let mut request_headers = HeaderMap::new();
        request_headers.insert(
            headers::CONSISTENCY_LEVEL,
            HeaderValue::from_static(ctx.consistency().as_str()),
        );
        if let Some(token) = &ctx.session_token {
            match HeaderValue::from_str(token) {
                Ok(value) => {
                    request_headers.insert(headers::SESSION_TOKEN, value);
                },
                Err(e) => warn!(error = %e, "Session token is not a valid header value, omitted"),
            }
        }
        if ctx.force_address_refresh {
            request_headers.insert(headers::FORCE_REFRESH, HeaderValue::from_static(headers::HEADER_TRUE));
        }
        if ctx.force_routing_map_refresh {
            request_headers.insert(
                headers::FORCE_COLLECTION_ROUTING_MAP_REFRESH,
                HeaderValue::from_static(headers::HEADER_TRUE),
            );
        }

        let operation = ctx.operation();
        Ok(DocumentRequest {
            operation: operation.resource_operation(),
            endpoint,
            collection_id,
            collection_name: ctx.collection_name().map(str::to_owned),
            partition_key_range_id: range.id.clone(),
            effective_partition_key: operation.effective_partition_key().to_owned(),
            document_id: operation.document_id.clone(),
            headers: request_headers,
            body: operation.body.clone(),
        })
    }

    /// Token for the outgoing request.
    ///
    /// A caller-supplied token wins until a rename invalidates it. Otherwise
    /// only session reads carry one: the stored token of the target partition
    /// (or of its parents after a split).
    fn session_header(
        &self,
        ctx: &RequestContext,
        collection_id: &str,
        range: &PartitionKeyRange,
    ) -> Option<String> {
        if let Some(token) = ctx.caller_session_token() {
            return Some(token.to_owned());
        }
        if ctx.kind() != OperationKind::Read || ctx.consistency() != ConsistencyLevel::Session {
            return None;
        }
        self.inner
            .session
            .partition_token(collection_id, range)
            .map(|token| encode_partition_tokens([(range.id.as_str(), &token)]))
    }

    fn record_session(&self, ctx: &RequestContext, response: &StoreResponse) {
        let (Some(header), Some(collection_id)) = (response.session_token(), ctx.collection_id())
        else {
            return;
        };
        if let Err(e) = self.inner.session.record_response(collection_id, ctx.collection_name(), header)
        {
            warn!(collection_id, error = %e, "Ignoring malformed response session token");
        }
    }
}

/// Attaches the retry history to the error that ended an operation.
fn finalize(error: SdkError, ctx: &RequestContext) -> SdkError {
    let retry = ctx.retry();
    if let ErrorClass::Throttled { retry_after } = error.class() {
        warn!(attempts = retry.attempts(), ?retry_after, "Still throttled");
        return SdkError::StillThrottled {
            retry_after,
            attempts: retry.attempts(),
            source: Box::new(error),
        };
    }
    if retry.retries() == 0 {
        return error;
    }
    SdkError::RetryExhausted {
        attempts: retry.attempts(),
        endpoints_tried: retry.endpoints_tried().iter().map(ToString::to_string).collect(),
        source: Box::new(error),
    }
}
