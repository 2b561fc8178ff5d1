//! Shared setup for the client integration scenarios.
//!
//! Every scenario runs a [`ResilientClient`] against an in-process
//! [`MockDatabaseService`] with a two-region account: East accepts writes and
//! serves reads, West serves reads only.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use meridian_sdk::{
    ClientConfig, ClientConfigBuilder, CollectionRef, DatabaseAccount, RegionEndpoint,
    ResilientClient, mock::MockDatabaseService,
};
use meridian_types::PartitionKeyRange;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Name path of the collection every scenario uses.
pub const ORDERS: &str = "dbs/app/colls/orders";

/// Resource id of [`ORDERS`] at setup.
pub const ORDERS_ID: &str = "coll-1";

pub fn east() -> Url {
    Url::parse("https://east.example.com/").unwrap()
}

pub fn west() -> Url {
    Url::parse("https://west.example.com/").unwrap()
}

pub fn orders() -> CollectionRef {
    CollectionRef::parse(ORDERS)
}

pub fn single_range() -> Vec<PartitionKeyRange> {
    vec![PartitionKeyRange::new("0", "", "FF", "rs-0")]
}

/// A service with the two-region account and [`ORDERS`] on one partition.
pub fn service() -> Arc<MockDatabaseService> {
    let service = MockDatabaseService::new();
    service.set_account(DatabaseAccount {
        write_regions: vec![RegionEndpoint::new("East", east())],
        read_regions: vec![RegionEndpoint::new("East", east()), RegionEndpoint::new("West", west())],
        enable_multiple_write_locations: false,
    });
    service.create_collection(ORDERS, ORDERS_ID, single_range());
    service
}

pub fn config() -> ClientConfigBuilder {
    ClientConfig::builder().with_default_endpoint("https://account.example.com/")
}

/// Installs a test-writer subscriber once per test binary. `RUST_LOG`
/// overrides the default `warn` filter.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// A started client using `config` against `service`.
pub async fn client(
    service: &Arc<MockDatabaseService>,
    config: ClientConfigBuilder,
) -> ResilientClient {
    init_tracing();
    let client = ResilientClient::from_service(config.build().unwrap(), Arc::clone(service));
    client.start().await.unwrap();
    client
}
