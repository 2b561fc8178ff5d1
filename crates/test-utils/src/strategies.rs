//! Proptest strategies for Meridian domain types.
//!
//! Generators produce well-formed values: tokens with a canonical region
//! vector, partition ids without separators, and range sets that cover the
//! whole effective key space.
//!
//! # Usage
//!
//! ```no_run
//! use meridian_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn merge_is_commutative(a in strategies::arb_session_token(), b in strategies::arb_session_token()) {
//!         prop_assert_eq!(a.merge(&b), b.merge(&a));
//!     }
//! }
//! ```

use meridian_types::{
    MAX_EFFECTIVE_PARTITION_KEY, MIN_EFFECTIVE_PARTITION_KEY, PartitionKeyRange, RegionId,
    SessionToken,
};
use proptest::prelude::*;

/// Generates a region id from a small pool so tokens share regions often.
pub fn arb_region_id() -> impl Strategy<Value = RegionId> {
    0u32..6
}

/// Generates a session token with up to four region entries.
pub fn arb_session_token() -> impl Strategy<Value = SessionToken> {
    (
        0u64..4,
        0u64..10_000,
        proptest::collection::btree_map(arb_region_id(), 0u64..10_000, 0..4),
    )
        .prop_map(|(version, global_lsn, regions)| SessionToken::new(version, global_lsn, regions))
}

/// Generates a partition key range id.
pub fn arb_partition_id() -> impl Strategy<Value = String> {
    "[0-9]{1,3}"
}

/// Generates a short sequence of `(partition id, token)` updates for one
/// collection, with partitions repeating.
pub fn arb_token_updates() -> impl Strategy<Value = Vec<(String, SessionToken)>> {
    proptest::collection::vec(("[0-3]", arb_session_token()), 1..12)
}

/// Generates an effective partition key inside the key space.
pub fn arb_effective_key() -> impl Strategy<Value = String> {
    "([0-9A-E][0-9A-F]([0-9A-F]{2}){0,2})?"
}

/// Generates a contiguous range set covering `["", "FF")`.
///
/// Split points are distinct two-digit hex keys; range ids are their index.
pub fn arb_partition_ranges() -> impl Strategy<Value = Vec<PartitionKeyRange>> {
    proptest::collection::btree_set(0x01u8..0xFF, 0..8).prop_map(|splits| {
        let mut bounds = vec![MIN_EFFECTIVE_PARTITION_KEY.to_owned()];
        bounds.extend(splits.iter().map(|split| format!("{split:02X}")));
        bounds.push(MAX_EFFECTIVE_PARTITION_KEY.to_owned());

        bounds
            .windows(2)
            .enumerate()
            .map(|(index, pair)| {
                PartitionKeyRange::new(index.to_string(), &pair[0], &pair[1], format!("rs-{index}"))
            })
            .collect()
    })
}
