//! Client-side metrics for the resilience layer.
//!
//! [`SdkMetrics`] is a pluggable sink. Two implementations are included:
//!
//! - [`NoopSdkMetrics`]: default, discards everything.
//! - [`MetricsSdkMetrics`]: forwards to the [`metrics`](https://docs.rs/metrics) crate facade, and
//!   so to whatever recorder the process installed.
//!
//! # Metric Names
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `meridian_sdk_operations_total` | Counter | `operation`, `status` | Top-level operations by outcome |
//! | `meridian_sdk_operation_duration_seconds` | Histogram | `operation` | Operation latency including retries |
//! | `meridian_sdk_retries_total` | Counter | `operation`, `error_type` | Retries by triggering error class |
//! | `meridian_sdk_endpoint_marks_total` | Counter | `endpoint`, `axis` | Endpoints marked unavailable |
//! | `meridian_sdk_routing_refreshes_total` | Counter | `kind` | Routing map fetches |
//! | `meridian_sdk_topology_refreshes_total` | Counter | `status` | Account topology fetches |

use std::{fmt, sync::Arc, time::Duration};

/// Which traffic an unavailability mark applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkAxis {
    /// Reads are routed away from the endpoint.
    Read,
    /// Writes are routed away from the endpoint.
    Write,
}

impl fmt::Display for MarkAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// How a routing map was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingRefreshKind {
    /// First fetch for a collection.
    Initial,
    /// Delta applied on top of the previous map.
    Incremental,
    /// Complete refetch replacing the previous map.
    Full,
}

impl fmt::Display for RoutingRefreshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Incremental => write!(f, "incremental"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Trait for client-side metrics collection.
///
/// All methods default to no-ops; override the ones you care about.
/// Implementations are shared across tasks and must be `Send + Sync`.
pub trait SdkMetrics: Send + Sync + fmt::Debug {
    /// Records the outcome of a top-level operation after retries resolve.
    fn record_operation(&self, operation: &str, duration: Duration, success: bool) {
        let _ = (operation, duration, success);
    }

    /// Records one retry. `error_type` is [`crate::SdkError::error_type`].
    fn record_retry(&self, operation: &str, error_type: &str) {
        let _ = (operation, error_type);
    }

    /// Records an endpoint being marked unavailable.
    fn record_endpoint_mark(&self, endpoint: &str, axis: MarkAxis) {
        let _ = (endpoint, axis);
    }

    /// Records a routing map fetch.
    fn record_routing_refresh(&self, kind: RoutingRefreshKind) {
        let _ = kind;
    }

    /// Records an account topology fetch.
    fn record_topology_refresh(&self, success: bool) {
        let _ = success;
    }
}

/// No-op metrics implementation.
#[derive(Debug, Clone, Copy)]
pub struct NoopSdkMetrics;

impl SdkMetrics for NoopSdkMetrics {}

/// Metrics implementation using the `metrics` crate facade.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSdkMetrics;

mod metric_names {
    pub const OPERATIONS_TOTAL: &str = "meridian_sdk_operations_total";
    pub const OPERATION_DURATION: &str = "meridian_sdk_operation_duration_seconds";
    pub const RETRIES_TOTAL: &str = "meridian_sdk_retries_total";
    pub const ENDPOINT_MARKS_TOTAL: &str = "meridian_sdk_endpoint_marks_total";
    pub const ROUTING_REFRESHES_TOTAL: &str = "meridian_sdk_routing_refreshes_total";
    pub const TOPOLOGY_REFRESHES_TOTAL: &str = "meridian_sdk_topology_refreshes_total";
}

impl SdkMetrics for MetricsSdkMetrics {
    fn record_operation(&self, operation: &str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics::counter!(
            metric_names::OPERATIONS_TOTAL,
            "operation" => operation.to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(metric_names::OPERATION_DURATION, "operation" => operation.to_owned())
            .record(duration.as_secs_f64());
    }

    fn record_retry(&self, operation: &str, error_type: &str) {
        metrics::counter!(
            metric_names::RETRIES_TOTAL,
            "operation" => operation.to_owned(),
            "error_type" => error_type.to_owned(),
        )
        .increment(1);
    }

    fn record_endpoint_mark(&self, endpoint: &str, axis: MarkAxis) {
        metrics::counter!(
            metric_names::ENDPOINT_MARKS_TOTAL,
            "endpoint" => endpoint.to_owned(),
            "axis" => axis.to_string(),
        )
        .increment(1);
    }

    fn record_routing_refresh(&self, kind: RoutingRefreshKind) {
        metrics::counter!(metric_names::ROUTING_REFRESHES_TOTAL, "kind" => kind.to_string())
            .increment(1);
    }

    fn record_topology_refresh(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics::counter!(metric_names::TOPOLOGY_REFRESHES_TOTAL, "status" => status).increment(1);
    }
}

/// Creates the default metrics instance (no-op).
pub(crate) fn default_metrics() -> Arc<dyn SdkMetrics> {
    Arc::new(NoopSdkMetrics)
}
