//! End-to-end recovery scenarios against the mock service.
//!
//! ## Test Categories
//!
//! - **Read-your-writes**: a session token handed between clients gates reads
//! - **Rename recovery**: a recreated collection is re-resolved without
//!   charging the retry budget
//! - **Split recovery**: a write routed to a split partition lands on a child
//! - **Throttling**: server-directed backoff is honoured
//! - **Endpoint marks**: read and write unavailability stay independent
//! - **Background refresh**: topology changes reach the endpoint manager

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::{ORDERS, ORDERS_ID, east, orders, west};
use http::StatusCode;
use meridian_sdk::{
    DatabaseAccount, ErrorClass, GoneCause, NetworkCause, Operation, OperationKind,
    RegionEndpoint, SdkError, SessionDiagnostics,
    mock::{MockDatabaseService, MockFailure},
};
use meridian_test_utils::assert_eventually;
use meridian_types::{PartitionKeyRange, headers, headers::sub_status};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Read-your-writes
// ============================================================================

#[tokio::test]
async fn test_read_your_writes_across_clients() {
    let service = common::service();
    let writer = common::client(&service, common::config()).await;
    let reader = common::client(&service, common::config().with_preferred_regions(["West"])).await;

    writer.execute(Operation::create(orders(), "3A", "order-1", b"{\"n\":1}".to_vec())).await.unwrap();
    let token = writer.session_token(ORDERS);
    assert!(!token.is_empty());

    let response = reader
        .execute(Operation::read(orders(), "3A", "order-1").with_session_token(token.clone()))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"{\"n\":1}".to_vec());

    let read = service.requests().into_iter().last().unwrap();
    assert_eq!(read.endpoint, west());
    assert_eq!(read.header(headers::SESSION_TOKEN), Some(token.as_str()));

    writer.shutdown();
    reader.shutdown();
}

#[tokio::test]
async fn test_lagging_replica_rejects_session_read() {
    let service = common::service();
    service.set_replication_lag(&west(), 1);
    let writer = common::client(&service, common::config()).await;
    let reader = common::client(&service, common::config().with_preferred_regions(["West"])).await;

    writer.execute(Operation::create(orders(), "3A", "order-1", b"{}".to_vec())).await.unwrap();
    let token = writer.session_token(ORDERS);

    let err = reader
        .execute(Operation::read(orders(), "3A", "order-1").with_session_token(token))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::StaleSession);
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.sub_status(), Some(sub_status::READ_SESSION_NOT_AVAILABLE));

    // Same id after re-resolving the name: no rename, nothing cleared.
    assert_eq!(reader.session().aliased_id(ORDERS), None);
    assert_eq!(writer.session().aliased_id(ORDERS).as_deref(), Some(ORDERS_ID));
}

// ============================================================================
// Rename recovery
// ============================================================================

#[tokio::test]
async fn test_recreated_collection_recovers_without_charging_budget() {
    let service = common::service();
    let client = common::client(&service, common::config()).await;

    for id in ["a", "b", "c"] {
        client.execute(Operation::create(orders(), "3A", id, b"{}".to_vec())).await.unwrap();
    }
    assert_eq!(client.session_token(ORDERS), client.session_token(ORDERS_ID));
    let stale_token = client.session_token(ORDERS_ID);

    service.delete_collection(ORDERS_ID);
    service.create_collection(ORDERS, "coll-2", common::single_range());

    let mut ctx = client.new_context(Operation::create(orders(), "3A", "a", b"{}".to_vec()));
    client.execute_with_context(&mut ctx, &CancellationToken::new()).await.unwrap();

    assert_eq!(ctx.collection_id(), Some("coll-2"));
    assert_eq!(ctx.retry().charged_retries(), 0);
    assert_eq!(ctx.retry().uncharged_retries(), 1);
    assert_eq!(ctx.retry().last_error(), Some(ErrorClass::StaleSession));

    let session = client.session();
    assert_eq!(session.aliased_id(ORDERS).as_deref(), Some("coll-2"));
    assert_eq!(client.session_token(ORDERS), client.session_token("coll-2"));
    assert_ne!(client.session_token(ORDERS), stale_token);

    // The id view of the deleted collection is left in place.
    assert_eq!(client.session_token(ORDERS_ID), stale_token);
    assert!(service.document("coll-2", "a").is_some());
}

#[tokio::test]
async fn test_recreated_collection_ignores_handed_over_token() {
    let service = common::service();
    let writer = common::client(&service, common::config()).await;
    let reader = common::client(&service, common::config()).await;

    writer.execute(Operation::create(orders(), "3A", "a", b"{\"v\":1}".to_vec())).await.unwrap();
    let token = writer.session_token(ORDERS);
    reader.execute(Operation::read(orders(), "3A", "a").with_session_token(token.clone())).await.unwrap();

    service.delete_collection(ORDERS_ID);
    service.create_collection(ORDERS, "coll-2", common::single_range());
    let fresh_writer = common::client(&service, common::config()).await;
    fresh_writer.execute(Operation::create(orders(), "3A", "a", b"{\"v\":2}".to_vec())).await.unwrap();
    service.reset_counters();

    let mut ctx = reader.new_context(Operation::read(orders(), "3A", "a").with_session_token(token.clone()));
    let response = reader.execute_with_context(&mut ctx, &CancellationToken::new()).await.unwrap();

    assert_eq!(response.body, b"{\"v\":2}".to_vec());
    assert_eq!(ctx.collection_id(), Some("coll-2"));
    assert_eq!(ctx.retry().charged_retries(), 0);
    assert_eq!(ctx.retry().uncharged_retries(), 1);

    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header(headers::SESSION_TOKEN), Some(token.as_str()));
    assert_eq!(requests[1].collection_id, "coll-2");
    assert_eq!(requests[1].header(headers::SESSION_TOKEN), None);
}

#[tokio::test]
async fn test_deleted_collection_surfaces_not_found() {
    let service = common::service();
    let client = common::client(&service, common::config()).await;
    client.execute(Operation::create(orders(), "3A", "a", b"{}".to_vec())).await.unwrap();

    service.delete_collection(ORDERS_ID);

    let err = client.execute(Operation::create(orders(), "3A", "b", b"{}".to_vec())).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
}

// ============================================================================
// Split recovery
// ============================================================================

#[tokio::test]
async fn test_create_after_split_lands_on_child() {
    let service = common::service();
    let client = common::client(&service, common::config()).await;
    client.execute(Operation::create(orders(), "3A", "a", b"{}".to_vec())).await.unwrap();

    let (left, right) = service.split_partition(ORDERS_ID, "0", "80");
    service.reset_counters();

    let mut ctx = client.new_context(Operation::create(orders(), "3A", "b", b"{}".to_vec()));
    client.execute_with_context(&mut ctx, &CancellationToken::new()).await.unwrap();

    assert!(ctx.retry().attempts() <= 3, "took {} attempts", ctx.retry().attempts());
    assert_eq!(ctx.retry().last_error(), Some(ErrorClass::StaleRouting(GoneCause::PartitionSplit)));
    assert_eq!(ctx.target_range().map(|range| range.id.as_str()), Some(left.as_str()));

    let requests = service.requests();
    assert_eq!(requests.first().unwrap().partition_key_range_id, "0");
    assert_eq!(requests.last().unwrap().partition_key_range_id, left);
    assert_eq!(service.range_fetch_count(), 1);

    let map = client.routing_cache().get(ORDERS_ID).unwrap();
    let ids: Vec<&str> = map.ranges().iter().map(|range| range.id.as_str()).collect();
    assert_eq!(ids, [left.as_str(), right.as_str()]);
    assert_eq!(client.session().partition_ids(ORDERS_ID), ["0".to_owned(), left.clone()]);
}

#[tokio::test]
async fn test_session_read_on_split_child_uses_parent_token() {
    let service = common::service();
    let client = common::client(&service, common::config()).await;
    client.execute(Operation::create(orders(), "C0", "a", b"{}".to_vec())).await.unwrap();
    let parent_token = client.session().token(ORDERS_ID, "0").unwrap();

    let (_left, right) = service.split_partition(ORDERS_ID, "0", "80");
    client.execute(Operation::read(orders(), "C0", "a")).await.unwrap();

    let sent = service.requests().into_iter().last().unwrap();
    assert_eq!(sent.partition_key_range_id, right);
    assert_eq!(
        sent.header(headers::SESSION_TOKEN),
        Some(format!("{right}:{parent_token}").as_str())
    );
}

// ============================================================================
// Throttling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_throttled_create_waits_for_retry_after() {
    let service = common::service();
    let client = common::client(&service, common::config()).await;
    service.inject_failure(MockFailure::Throttled { retry_after: Some(Duration::from_millis(100)) });

    let response = client.execute(Operation::create(orders(), "3A", "a", b"{}".to_vec())).await.unwrap();
    assert_eq!(response.status, StatusCode::CREATED);

    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].at.duration_since(requests[0].at) >= Duration::from_millis(100));
    assert!(service.document(ORDERS_ID, "a").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_throttled_beyond_wait_budget_is_still_throttled() {
    let service = common::service();
    let client = common::client(&service, common::config()).await;
    for _ in 0..20 {
        service.inject_failure(MockFailure::Throttled { retry_after: Some(Duration::from_secs(8)) });
    }

    let err = client.execute(Operation::create(orders(), "3A", "a", b"{}".to_vec())).await.unwrap_err();
    match err {
        SdkError::StillThrottled { retry_after, attempts, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(8)));
            // 30 s budget: three 8 s waits fit, the fourth does not.
            assert_eq!(attempts, 4);
        },
        other => panic!("unexpected error: {other:?}"),
    }
}

// ============================================================================
// Endpoint marks
// ============================================================================

#[tokio::test]
async fn test_read_failure_marks_only_read_axis() {
    let service = common::service();
    let client = common::client(&service, common::config()).await;
    client.execute(Operation::create(orders(), "3A", "a", b"{}".to_vec())).await.unwrap();

    service.inject_failure_at(&east(), MockFailure::Network(NetworkCause::ConnectFailed));
    client.execute(Operation::read(orders(), "3A", "a")).await.unwrap();

    let endpoints = client.endpoints();
    assert!(endpoints.is_unavailable(&east(), OperationKind::Read));
    assert!(!endpoints.is_unavailable(&east(), OperationKind::Write));
    assert_eq!(service.requests().last().unwrap().endpoint, west());

    client.execute(Operation::create(orders(), "3A", "b", b"{}".to_vec())).await.unwrap();
    assert_eq!(service.requests().last().unwrap().endpoint, east());
}

#[tokio::test]
async fn test_write_failure_marks_only_write_axis() {
    let service = common::service();
    let client = common::client(&service, common::config()).await;
    client.execute(Operation::create(orders(), "3A", "a", b"{}".to_vec())).await.unwrap();

    service.inject_failure_at(&east(), MockFailure::Network(NetworkCause::Timeout));
    let err = client.execute(Operation::create(orders(), "3A", "b", b"{}".to_vec())).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::TransientNetwork(NetworkCause::Timeout));

    let endpoints = client.endpoints();
    assert!(endpoints.is_unavailable(&east(), OperationKind::Write));
    assert!(!endpoints.is_unavailable(&east(), OperationKind::Read));

    client.execute(Operation::read(orders(), "3A", "a")).await.unwrap();
    assert_eq!(service.requests().last().unwrap().endpoint, east());
}

#[tokio::test]
async fn test_write_forbidden_follows_new_write_region() {
    let service = common::service();
    let client = common::client(&service, common::config()).await;

    // West takes over writes; the client still routes writes to East.
    service.set_account(DatabaseAccount {
        write_regions: vec![RegionEndpoint::new("West", west())],
        read_regions: vec![RegionEndpoint::new("East", east()), RegionEndpoint::new("West", west())],
        enable_multiple_write_locations: false,
    });

    client.execute(Operation::create(orders(), "3A", "a", b"{}".to_vec())).await.unwrap();

    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].endpoint, east());
    assert_eq!(requests[1].endpoint, west());
    assert!(client.endpoints().is_unavailable(&east(), OperationKind::Write));
    assert_eq!(client.endpoints().write_endpoints(), vec![west()]);
}

// ============================================================================
// Background refresh
// ============================================================================

#[tokio::test]
async fn test_background_refresh_picks_up_new_region() {
    let service = common::service();
    let client = common::client(
        &service,
        common::config().with_topology_refresh_interval(Duration::from_millis(20)),
    )
    .await;
    assert_eq!(client.endpoints().read_endpoints(), vec![east(), west()]);

    let north = url::Url::parse("https://north.example.com/").unwrap();
    let mut account = service.account();
    account.read_regions.push(RegionEndpoint::new("North", north.clone()));
    service.set_account(account);

    let endpoints = client.endpoints().clone();
    let refreshed = assert_eventually(Duration::from_secs(2), || {
        endpoints.read_endpoints().contains(&north)
    })
    .await;
    assert!(refreshed, "background refresh never saw the new region");

    client.shutdown();
    assert!(client.is_shutdown());
    let err = client.execute(Operation::read(orders(), "3A", "a")).await.unwrap_err();
    assert!(matches!(err, SdkError::Cancelled));
}

#[tokio::test]
async fn test_clients_do_not_share_sessions() {
    let service = common::service();
    let first = common::client(&service, common::config()).await;
    let second = common::client(&service, common::config()).await;

    first.execute(Operation::create(orders(), "3A", "a", b"{}".to_vec())).await.unwrap();

    assert!(!first.session_token(ORDERS).is_empty());
    assert_eq!(second.session_token(ORDERS), "");
    assert_eq!(second.session().collection_count(), 0);
}

#[test]
fn test_split_ranges_cover_parent() {
    let service = MockDatabaseService::new();
    service.create_collection(ORDERS, ORDERS_ID, common::single_range());
    let (left, right) = service.split_partition(ORDERS_ID, "0", "80");

    let ranges: Vec<PartitionKeyRange> = service.ranges(ORDERS_ID);
    assert_eq!(ranges.len(), 2);
    assert_eq!((ranges[0].id.as_str(), ranges[0].max_exclusive.as_str()), (left.as_str(), "80"));
    assert_eq!((ranges[1].id.as_str(), ranges[1].min_inclusive.as_str()), (right.as_str(), "80"));
    assert_eq!(ranges[0].parents, ["0".to_owned()]);
}
