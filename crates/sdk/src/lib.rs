//! Client-side consistency and resilience layer for the Meridian document
//! database.
//!
//! This crate decides where each document operation goes, which session
//! token it carries, and whether and how a failed attempt is retried. The
//! wire itself is injected through the [`Transport`] trait.
//!
//! # Features
//!
//! - **Session consistency**: per-partition vector session tokens, merged on
//!   every response and attached to session reads (read-your-writes)
//! - **Regional failover**: ordered read/write endpoints with independent
//!   read and write unavailability marks
//! - **Topology changes**: incremental routing map refresh after splits and
//!   migrations, gated full refresh after repeated replica-gone errors
//! - **Recreated collections**: name lookups re-resolved when a session is
//!   not available under the old id
//! - **Throttling**: server-directed backoff with bounded retries and wait
//!
//! # Quick Start
//!
//! ```no_run
//! use meridian_sdk::{ClientConfig, CollectionRef, Operation, ResilientClient};
//! use meridian_sdk::mock::MockDatabaseService;
//!
//! # async fn example() -> meridian_sdk::Result<()> {
//! let config = ClientConfig::builder()
//!     .with_default_endpoint("https://account.example.com/")
//!     .with_preferred_regions(["West US", "East US"])
//!     .build()?;
//!
//! let client = ResilientClient::from_service(config, MockDatabaseService::new());
//! client.start().await?;
//!
//! let orders = CollectionRef::parse("dbs/app/colls/orders");
//! client.execute(Operation::create(orders, "3A", "order-1", b"{}".to_vec())).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ResilientClient (Public API)                │
//! │      .execute() │ .execute_cancellable() │ .session_token() │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     Retry Policy Chain                      │
//! │  Rename-aware → Gone → Endpoint failover → Throttling       │
//! ├──────────────────────┬──────────────────┬───────────────────┤
//! │  SessionTokenStore   │ EndpointManager  │  Routing caches   │
//! │  id/name views       │ read/write marks │  names, ranges    │
//! ├──────────────────────┴──────────────────┴───────────────────┤
//! │   Transport │ CollectionResolver │ TopologyFetcher │ Ranges │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod endpoint;
mod error;
mod metrics;
pub mod mock;
mod request;
mod retry;
mod routing;
mod session;
mod transport;

// Public API exports
pub use client::ResilientClient;
pub use config::{
    BackoffPolicy, ClientConfig, ClientConfigBuilder, ConsistencyLevel, GoneRetryOptions,
    ThrottleRetryOptions,
};
pub use endpoint::{
    DatabaseAccount, EndpointDiagnostics, EndpointManager, EndpointMarkSnapshot, RegionEndpoint,
    TopologyFetcher,
};
pub use error::{ErrorClass, GoneCause, NetworkCause, Result, SdkError};
pub use metrics::{MarkAxis, MetricsSdkMetrics, NoopSdkMetrics, RoutingRefreshKind, SdkMetrics};
pub use request::{
    CollectionRef, DocumentRequest, Operation, OperationKind, RequestContext, ResourceOperation,
    RetryContext, StoreResponse,
};
pub use retry::{
    DefaultRetryPolicy, EndpointFailoverPolicy, GoneRetryPolicy, RenameAwarePolicy,
    RetryDecision, RetryPolicy, RetryPolicyFactory, ShouldRetry, ThrottlingPolicy, apply_jitter,
    sleep_or_cancel, with_retry,
};
pub use routing::{
    CollectionCache, CollectionMetadata, CollectionResolver, CollectionRoutingMap,
    PartitionRoutingCache, RangeFeed, RangeFetcher,
};
pub use session::{SessionDiagnostics, SessionTokenStore};
pub use transport::Transport;

// Re-export commonly used types from meridian-types
pub use meridian_types::{KeyRange, PartitionKeyRange, SessionToken};
