//! SDK error types with retry classification.
//!
//! Provides a two-tier error model:
//! - **Boundary errors**: produced once where a response or connection failure enters the SDK
//!   ([`SdkError::Service`], [`SdkError::Network`]), carrying the status code, sub-status code
//!   and cause tag untouched
//! - **Terminal wrappers**: attached by the request pipeline when a retry budget runs out
//!   ([`SdkError::RetryExhausted`], [`SdkError::StillThrottled`])
//!
//! Retry policies never inspect error types or scrape headers. They match on
//! the tagged [`ErrorClass`] returned by [`SdkError::class`].

use std::time::Duration;

use http::{HeaderMap, StatusCode};
use meridian_types::{SessionTokenError, headers, headers::sub_status};
use snafu::{Location, Snafu};

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Cause of a transient network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkCause {
    /// The connection could not be established.
    ConnectFailed,
    /// Connect or read timed out.
    Timeout,
    /// The peer reset an established connection.
    ConnectionReset,
}

/// Why the service reported a routing entry as gone (HTTP 410).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoneCause {
    /// Generic replica gone with no clear cause.
    ReplicaGone,
    /// The partition was split (or a split is completing).
    PartitionSplit,
    /// The partition is migrating to another node.
    PartitionMigrating,
    /// The service's name cache is stale.
    NameCacheStale,
}

/// Classification consumed by the retry policy chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connect failure, timeout, or reset.
    TransientNetwork(NetworkCause),
    /// The region is temporarily unable to serve (HTTP 503).
    ServiceUnavailable,
    /// The cached routing view is out of date (HTTP 410).
    StaleRouting(GoneCause),
    /// The replica has not caught up with the session (HTTP 404/1002).
    StaleSession,
    /// Too many requests (HTTP 429).
    Throttled {
        /// Server-directed delay, when the response carried one.
        retry_after: Option<Duration>,
    },
    /// The region no longer accepts writes (HTTP 403/3).
    WriteForbidden,
    /// Never retried by this layer.
    Fatal,
}

/// SDK error types with context-rich error messages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SdkError {
    /// The service answered with an error status.
    #[snafu(display("Service error (status={status}, substatus={sub_status}): {message}"))]
    Service {
        /// HTTP status code.
        status: StatusCode,
        /// Sub-status code, `0` when absent.
        sub_status: u32,
        /// Error message from the service.
        message: String,
        /// Throttling delay directed by the service.
        retry_after: Option<Duration>,
    },

    /// The request never produced a response.
    #[snafu(display("Network error ({cause:?}) talking to {endpoint}: {message}"))]
    Network {
        /// Failure cause.
        cause: NetworkCause,
        /// Endpoint the request was sent to.
        endpoint: String,
        /// Error description.
        message: String,
    },

    /// Retry attempts exhausted.
    #[snafu(display(
        "Retry exhausted after {attempts} attempts across {endpoints_tried:?}: {source}"
    ))]
    RetryExhausted {
        /// Number of send attempts made.
        attempts: u32,
        /// Endpoints tried, in order, without repeats.
        endpoints_tried: Vec<String>,
        /// Last observed error.
        source: Box<SdkError>,
    },

    /// Throttling persisted beyond the configured retry bounds.
    #[snafu(display("Still throttled after {attempts} attempts (retry-after={retry_after:?}): {source}"))]
    StillThrottled {
        /// Last server-directed delay.
        retry_after: Option<Duration>,
        /// Number of send attempts made.
        attempts: u32,
        /// Last observed throttling error.
        source: Box<SdkError>,
    },

    /// A session token could not be decoded.
    #[snafu(display("Invalid session token: {source}"))]
    SessionToken {
        /// Decoding error.
        source: SessionTokenError,
    },

    /// Collection or routing metadata could not be resolved.
    #[snafu(display("Resolution error at {location}: {message}"))]
    Resolution {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Configuration validation error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// URL parsing error.
    #[snafu(display("Invalid URL '{url}': {message}"))]
    InvalidUrl {
        /// The invalid URL.
        url: String,
        /// Parse error description.
        message: String,
    },

    /// The operation was cancelled by its caller.
    #[snafu(display("Operation cancelled"))]
    Cancelled,
}

impl SdkError {
    /// Classifies an error response at the transport boundary.
    ///
    /// Reads the sub-status and throttling headers once; everything
    /// downstream works from the resulting fields.
    #[must_use]
    pub fn from_response(
        status: StatusCode,
        response_headers: &HeaderMap,
        message: impl Into<String>,
    ) -> Self {
        let sub_status = header_str(response_headers, headers::SUB_STATUS)
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(sub_status::UNKNOWN);

        Self::Service {
            status,
            sub_status,
            message: message.into(),
            retry_after: retry_after(response_headers),
        }
    }

    /// Returns the retry classification of this error.
    ///
    /// Terminal wrappers report the classification of the error they carry.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network { cause, .. } => ErrorClass::TransientNetwork(*cause),
            Self::Service { status, sub_status, retry_after, .. } => {
                classify(*status, *sub_status, *retry_after)
            },
            Self::RetryExhausted { source, .. } | Self::StillThrottled { source, .. } => {
                source.class()
            },
            Self::SessionToken { .. }
            | Self::Resolution { .. }
            | Self::Config { .. }
            | Self::InvalidUrl { .. }
            | Self::Cancelled => ErrorClass::Fatal,
        }
    }

    /// Returns the HTTP status of the underlying service error, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Service { status, .. } => Some(*status),
            Self::RetryExhausted { source, .. } | Self::StillThrottled { source, .. } => {
                source.status()
            },
            _ => None,
        }
    }

    /// Returns the sub-status code of the underlying service error, if any.
    #[must_use]
    pub fn sub_status(&self) -> Option<u32> {
        match self {
            Self::Service { sub_status, .. } => Some(*sub_status),
            Self::RetryExhausted { source, .. } | Self::StillThrottled { source, .. } => {
                source.sub_status()
            },
            _ => None,
        }
    }

    /// Returns the number of send attempts recorded by a terminal wrapper.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetryExhausted { attempts, .. } | Self::StillThrottled { attempts, .. } => {
                Some(*attempts)
            },
            _ => None,
        }
    }

    /// Returns true if the error is transient and a plain metadata call
    /// (topology or routing fetch) should be retried with backoff.
    ///
    /// Data-plane requests go through the policy chain instead.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.class() {
            ErrorClass::TransientNetwork(_)
            | ErrorClass::ServiceUnavailable
            | ErrorClass::Throttled { .. } => true,
            ErrorClass::StaleRouting(_)
            | ErrorClass::StaleSession
            | ErrorClass::WriteForbidden
            | ErrorClass::Fatal => false,
        }
    }

    /// Returns a short label for metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self.class() {
            ErrorClass::TransientNetwork(_) => "network",
            ErrorClass::ServiceUnavailable => "unavailable",
            ErrorClass::StaleRouting(_) => "gone",
            ErrorClass::StaleSession => "session_not_available",
            ErrorClass::Throttled { .. } => "throttled",
            ErrorClass::WriteForbidden => "write_forbidden",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl From<SessionTokenError> for SdkError {
    fn from(source: SessionTokenError) -> Self {
        Self::SessionToken { source }
    }
}

fn classify(status: StatusCode, sub: u32, retry_after: Option<Duration>) -> ErrorClass {
    match status {
        StatusCode::NOT_FOUND if sub == sub_status::READ_SESSION_NOT_AVAILABLE => {
            ErrorClass::StaleSession
        },
        StatusCode::GONE => ErrorClass::StaleRouting(match sub {
            sub_status::PARTITION_KEY_RANGE_GONE | sub_status::COMPLETING_SPLIT => {
                GoneCause::PartitionSplit
            },
            sub_status::COMPLETING_PARTITION_MIGRATION => GoneCause::PartitionMigrating,
            sub_status::NAME_CACHE_IS_STALE => GoneCause::NameCacheStale,
            _ => GoneCause::ReplicaGone,
        }),
        StatusCode::TOO_MANY_REQUESTS => ErrorClass::Throttled { retry_after },
        StatusCode::FORBIDDEN if sub == sub_status::WRITE_FORBIDDEN => ErrorClass::WriteForbidden,
        StatusCode::REQUEST_TIMEOUT => ErrorClass::TransientNetwork(NetworkCause::Timeout),
        StatusCode::SERVICE_UNAVAILABLE => ErrorClass::ServiceUnavailable,
        _ => ErrorClass::Fatal,
    }
}

fn header_str<'a>(map: &'a HeaderMap, name: &str) -> Option<&'a str> {
    map.get(name).and_then(|value| value.to_str().ok())
}

/// Reads the throttling delay. The millisecond header wins over the
/// standard seconds header.
fn retry_after(map: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = header_str(map, headers::RETRY_AFTER_MS).and_then(|v| v.trim().parse().ok()) {
        return Some(Duration::from_millis(ms));
    }
    header_str(map, headers::RETRY_AFTER)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
