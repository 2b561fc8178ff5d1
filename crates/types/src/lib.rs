//! Core types for the Meridian client resilience layer.
//!
//! This crate provides the pure data types shared by the client crates:
//! - [`SessionToken`]: the vector session token and its merge algebra
//! - [`KeyRange`] and [`PartitionKeyRange`]: effective partition key ranges
//! - [`headers`]: header names and sub-status codes of the wire contract
//!
//! Nothing here performs I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod headers;
pub mod range;
pub mod session_token;

pub use range::{
    KeyRange, MAX_EFFECTIVE_PARTITION_KEY, MIN_EFFECTIVE_PARTITION_KEY, PartitionKeyRange,
};
pub use session_token::{
    RegionId, SessionToken, SessionTokenError, decode_partition_tokens, encode_partition_tokens,
};
