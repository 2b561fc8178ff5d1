//! Header names and status codes shared with the backing service.
//!
//! These values are part of the wire contract and must match the service
//! byte for byte.

/// Session token header. Outgoing: the partition token list the request
/// requires. Incoming: the token observed by the response.
pub const SESSION_TOKEN: &str = "x-ms-session-token";

/// Sub-status code accompanying an error status.
pub const SUB_STATUS: &str = "x-ms-substatus";

/// Asks the service to bypass its address caches (boolean).
pub const FORCE_REFRESH: &str = "x-ms-force-refresh";

/// Asks the service to bypass its collection routing map cache (boolean).
pub const FORCE_COLLECTION_ROUTING_MAP_REFRESH: &str = "x-ms-collectionroutingmap-refresh";

/// Throttling delay in milliseconds.
pub const RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";

/// Standard HTTP throttling delay in seconds.
pub const RETRY_AFTER: &str = "retry-after";

/// Consistency level requested by the client.
pub const CONSISTENCY_LEVEL: &str = "x-ms-consistency-level";

/// Value used for boolean headers.
pub const HEADER_TRUE: &str = "true";

/// Sub-status codes that refine an HTTP status.
///
/// The same numeric code can mean different things under different
/// statuses (1002 is "read session not available" under 404 and "partition
/// key range gone" under 410), so always match on the status as well.
pub mod sub_status {
    /// No sub-status was reported.
    pub const UNKNOWN: u32 = 0;

    /// 403: the region no longer accepts writes.
    pub const WRITE_FORBIDDEN: u32 = 3;

    /// 410: the service's name cache is stale.
    pub const NAME_CACHE_IS_STALE: u32 = 1000;

    /// 410: the partition key range is gone (split).
    pub const PARTITION_KEY_RANGE_GONE: u32 = 1002;

    /// 404: the replica has not caught up with the session token.
    pub const READ_SESSION_NOT_AVAILABLE: u32 = 1002;

    /// 410: a split is completing.
    pub const COMPLETING_SPLIT: u32 = 1007;

    /// 410: the partition is migrating to another node.
    pub const COMPLETING_PARTITION_MIGRATION: u32 = 1008;
}
