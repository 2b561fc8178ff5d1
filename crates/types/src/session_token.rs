//! Vector session tokens.
//!
//! A session token is a per-partition logical clock returned by the service
//! with every response. It carries:
//! - a `version` that changes when the partition's replica topology changes
//! - a `global_lsn`: the global sequence number the client has observed
//! - a per-region vector of local sequence numbers, one entry per region that has written to the
//!   partition
//!
//! # Wire Format
//!
//! ```text
//! <version>#<globalLsn>#<regionId>=<localLsn>,<regionId>=<localLsn>,...
//! ```
//!
//! The region segment is omitted when the vector is empty. Region entries are
//! always written in ascending region order, so any value produced by
//! [`SessionToken::merge`] serializes canonically.
//!
//! Tokens for several partitions travel in one header as a partition token
//! list (`<partitionId>:<token>,<partitionId>:<token>`); see
//! [`encode_partition_tokens`] and [`decode_partition_tokens`].

use std::{cmp::Ordering, collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{Snafu, ensure};

/// Identifier of a region inside a session token vector.
pub type RegionId = u32;

/// Separator between token segments.
const SEGMENT_SEPARATOR: char = '#';

/// Separator between region entries, and between partition tokens in a list.
const ENTRY_SEPARATOR: char = ',';

/// Separator between a region id and its local LSN.
const REGION_SEPARATOR: char = '=';

/// Separator between a partition id and its token in a partition token list.
const PARTITION_SEPARATOR: char = ':';

/// Errors produced while decoding session tokens.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum SessionTokenError {
    /// The token does not have two or three `#`-separated segments.
    #[snafu(display("session token '{token}' has {segments} segments, expected 2 or 3"))]
    SegmentCount {
        /// The offending token.
        token: String,
        /// Number of segments found.
        segments: usize,
    },

    /// A numeric field contains something other than ASCII digits.
    #[snafu(display("session token '{token}' has a non-numeric {field}: '{value}'"))]
    NonNumeric {
        /// The offending token.
        token: String,
        /// Which field failed to parse.
        field: &'static str,
        /// The raw field value.
        value: String,
    },

    /// A region entry is not of the form `<regionId>=<localLsn>`.
    #[snafu(display("session token '{token}' has a malformed region entry '{entry}'"))]
    RegionEntry {
        /// The offending token.
        token: String,
        /// The raw region entry.
        entry: String,
    },

    /// The same region appears twice in one token.
    #[snafu(display("session token '{token}' repeats region {region}"))]
    DuplicateRegion {
        /// The offending token.
        token: String,
        /// The repeated region.
        region: RegionId,
    },

    /// A partition token list entry has no `<partitionId>:` prefix.
    #[snafu(display("partition token list entry '{entry}' has no partition id"))]
    PartitionEntry {
        /// The raw list entry.
        entry: String,
    },
}

/// A per-partition vector session token.
///
/// Tokens are immutable values. Observing a newer token for a partition means
/// replacing the stored one with [`merge`](Self::merge) of both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SessionToken {
    version: u64,
    global_lsn: u64,
    region_lsn: BTreeMap<RegionId, u64>,
}

impl SessionToken {
    /// Creates a token from its parts.
    #[must_use]
    pub fn new(
        version: u64,
        global_lsn: u64,
        region_lsn: impl IntoIterator<Item = (RegionId, u64)>,
    ) -> Self {
        Self { version, global_lsn, region_lsn: region_lsn.into_iter().collect() }
    }

    /// Returns the topology version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the global LSN.
    #[must_use]
    pub fn global_lsn(&self) -> u64 {
        self.global_lsn
    }

    /// Returns the local LSN recorded for `region`, if any.
    #[must_use]
    pub fn region_lsn(&self, region: RegionId) -> Option<u64> {
        self.region_lsn.get(&region).copied()
    }

    /// Iterates the region vector in ascending region order.
    pub fn regions(&self) -> impl Iterator<Item = (RegionId, u64)> + '_ {
        self.region_lsn.iter().map(|(region, lsn)| (*region, *lsn))
    }

    /// Parses a token from its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`SessionTokenError`] when the segment count is wrong, a
    /// numeric field is not all digits, or a region entry is malformed or
    /// repeated.
    pub fn parse(token: &str) -> Result<Self, SessionTokenError> {
        let segments: Vec<&str> = token.split(SEGMENT_SEPARATOR).collect();
        ensure!(
            matches!(segments.len(), 2 | 3),
            SegmentCountSnafu { token, segments: segments.len() }
        );

        let version = parse_number(token, "version", segments[0])?;
        let global_lsn = parse_number(token, "global LSN", segments[1])?;

        let mut region_lsn = BTreeMap::new();
        if let Some(regions) = segments.get(2) {
            for entry in regions.split(ENTRY_SEPARATOR) {
                let (region, lsn) = entry
                    .split_once(REGION_SEPARATOR)
                    .ok_or_else(|| RegionEntrySnafu { token, entry }.build())?;
                let region = parse_number(token, "region id", region)?;
                let region = RegionId::try_from(region)
                    .map_err(|_| RegionEntrySnafu { token, entry }.build())?;
                let lsn = parse_number(token, "region LSN", lsn)?;
                ensure!(
                    region_lsn.insert(region, lsn).is_none(),
                    DuplicateRegionSnafu { token, region }
                );
            }
        }

        Ok(Self { version, global_lsn, region_lsn })
    }

    /// Serializes the token to its wire form.
    #[must_use]
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Merges two tokens for the same partition.
    ///
    /// Takes the larger version and global LSN and the key-wise maximum of
    /// the region vectors. The operation is commutative, associative and
    /// idempotent, and never decreases any component.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut region_lsn = self.region_lsn.clone();
        for (region, lsn) in &other.region_lsn {
            let merged = region_lsn.entry(*region).or_insert(*lsn);
            *merged = (*merged).max(*lsn);
        }

        Self {
            version: self.version.max(other.version),
            global_lsn: self.global_lsn.max(other.global_lsn),
            region_lsn,
        }
    }

    /// Returns true when a replica at `candidate` has caught up with
    /// `required`, which is all a session read needs.
    ///
    /// Only the global LSN participates; region vectors are not compared.
    #[must_use]
    pub fn is_partition_readable(candidate: &Self, required: &Self) -> bool {
        candidate.global_lsn >= required.global_lsn
    }

    /// Returns true when every component of `self` is at least the
    /// corresponding component of `other`.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        self.version >= other.version
            && self.global_lsn >= other.global_lsn
            && other
                .region_lsn
                .iter()
                .all(|(region, lsn)| self.region_lsn.get(region).is_some_and(|own| own >= lsn))
    }
}

/// Tokens are partially ordered: one token is greater than another when it
/// dominates it component-wise. Concurrent tokens are incomparable.
impl PartialOrd for SessionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.dominates(other), other.dominates(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            (false, false) => None,
        }
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEGMENT_SEPARATOR}{}", self.version, self.global_lsn)?;
        for (index, (region, lsn)) in self.region_lsn.iter().enumerate() {
            let separator = if index == 0 { SEGMENT_SEPARATOR } else { ENTRY_SEPARATOR };
            write!(f, "{separator}{region}{REGION_SEPARATOR}{lsn}")?;
        }
        Ok(())
    }
}

impl FromStr for SessionToken {
    type Err = SessionTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SessionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn parse_number(token: &str, field: &'static str, value: &str) -> Result<u64, SessionTokenError> {
    let well_formed = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
    let parsed = if well_formed { value.parse::<u64>().ok() } else { None };
    parsed.ok_or_else(|| NonNumericSnafu { token, field, value }.build())
}

/// Encodes a partition token list.
///
/// Entries are written in iteration order as `<partitionId>:<token>` joined
/// by commas.
pub fn encode_partition_tokens<'a, I>(tokens: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a SessionToken)>,
{
    let mut encoded = String::new();
    for (partition_id, token) in tokens {
        if !encoded.is_empty() {
            encoded.push(ENTRY_SEPARATOR);
        }
        encoded.push_str(partition_id);
        encoded.push(PARTITION_SEPARATOR);
        encoded.push_str(&token.to_string());
    }
    encoded
}

/// Decodes a partition token list.
///
/// Region entries and partition entries share the comma separator. An item
/// containing `:` starts a new partition entry; any other item continues the
/// region vector of the entry before it.
///
/// # Errors
///
/// Returns [`SessionTokenError::PartitionEntry`] when the list starts with an
/// item that has no partition id, or the parse error of any token.
pub fn decode_partition_tokens(
    list: &str,
) -> Result<Vec<(String, SessionToken)>, SessionTokenError> {
    let mut raw: Vec<(String, String)> = Vec::new();

    for item in list.split(ENTRY_SEPARATOR).filter(|item| !item.is_empty()) {
        match item.split_once(PARTITION_SEPARATOR) {
            Some((partition_id, token)) => {
                ensure!(!partition_id.is_empty(), PartitionEntrySnafu { entry: item });
                raw.push((partition_id.to_string(), token.to_string()));
            },
            None => {
                let (_, token) =
                    raw.last_mut().ok_or_else(|| PartitionEntrySnafu { entry: item }.build())?;
                token.push(ENTRY_SEPARATOR);
                token.push_str(item);
            },
        }
    }

    raw.into_iter()
        .map(|(partition_id, token)| Ok((partition_id, SessionToken::parse(&token)?)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_token() {
        let token = SessionToken::parse("2#100#1=20,3=40").unwrap();
        assert_eq!(token.version(), 2);
        assert_eq!(token.global_lsn(), 100);
        assert_eq!(token.region_lsn(1), Some(20));
        assert_eq!(token.region_lsn(3), Some(40));
        assert_eq!(token.region_lsn(2), None);
    }

    #[test]
    fn test_parse_without_regions() {
        let token = SessionToken::parse("1#5").unwrap();
        assert_eq!(token.global_lsn(), 5);
        assert_eq!(token.regions().count(), 0);
        assert_eq!(token.serialize(), "1#5");
    }

    #[test]
    fn test_parse_rejects_wrong_segment_count() {
        let err = SessionToken::parse("100").unwrap_err();
        assert!(matches!(err, SessionTokenError::SegmentCount { segments: 1, .. }));

        let err = SessionToken::parse("1#2#3=4#5").unwrap_err();
        assert!(matches!(err, SessionTokenError::SegmentCount { segments: 4, .. }));
    }

    #[test]
    fn test_parse_rejects_non_numeric_fields() {
        for bad in ["x#1", "1#y", "1#2#a=3", "1#2#1=b", "+1#2", "1#-2", "#1"] {
            let err = SessionToken::parse(bad).unwrap_err();
            assert!(
                matches!(err, SessionTokenError::NonNumeric { .. }),
                "expected NonNumeric for '{bad}', got {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_malformed_region_entries() {
        let err = SessionToken::parse("1#2#").unwrap_err();
        assert!(matches!(err, SessionTokenError::RegionEntry { .. }));

        let err = SessionToken::parse("1#2#1=3,,2=4").unwrap_err();
        assert!(matches!(err, SessionTokenError::RegionEntry { .. }));

        let err = SessionToken::parse("1#2#99999999999=1").unwrap_err();
        assert!(matches!(err, SessionTokenError::RegionEntry { .. }));
    }

    #[test]
    fn test_parse_rejects_duplicate_region() {
        let err = SessionToken::parse("1#2#1=3,1=4").unwrap_err();
        assert_eq!(
            err,
            SessionTokenError::DuplicateRegion { token: "1#2#1=3,1=4".to_string(), region: 1 }
        );
    }

    #[test]
    fn test_serialize_orders_regions() {
        let token = SessionToken::new(1, 9, [(7, 1), (2, 5), (4, 3)]);
        assert_eq!(token.serialize(), "1#9#2=5,4=3,7=1");
    }

    #[test]
    fn test_merge_takes_maximum_per_component() {
        let a = SessionToken::parse("1#100#1=20,2=5").unwrap();
        let b = SessionToken::parse("2#90#2=7,3=1").unwrap();
        let merged = a.merge(&b);
        assert_eq!(merged.serialize(), "2#100#1=20,2=7,3=1");
    }

    #[test]
    fn test_is_partition_readable_ignores_regions() {
        let replica = SessionToken::parse("1#100#1=1").unwrap();
        let required = SessionToken::parse("1#100#1=50").unwrap();
        assert!(SessionToken::is_partition_readable(&replica, &required));

        let behind = SessionToken::parse("1#99#1=99").unwrap();
        assert!(!SessionToken::is_partition_readable(&behind, &required));
    }

    #[test]
    fn test_partial_order() {
        let low = SessionToken::parse("1#10#1=1").unwrap();
        let high = SessionToken::parse("1#20#1=2").unwrap();
        let concurrent = SessionToken::parse("1#30#2=1").unwrap();

        assert!(low < high);
        assert!(high > low);
        assert_eq!(low.partial_cmp(&low), Some(Ordering::Equal));
        assert_eq!(high.partial_cmp(&concurrent), None);
    }

    #[test]
    fn test_partition_token_list_round_trip() {
        let a = SessionToken::parse("1#100#1=20,2=30").unwrap();
        let b = SessionToken::parse("1#7").unwrap();
        let c = SessionToken::parse("3#50#4=50").unwrap();

        let encoded = encode_partition_tokens([("0", &a), ("1", &b), ("2", &c)]);
        assert_eq!(encoded, "0:1#100#1=20,2=30,1:1#7,2:3#50#4=50");

        let decoded = decode_partition_tokens(&encoded).unwrap();
        assert_eq!(
            decoded,
            vec![("0".to_string(), a), ("1".to_string(), b), ("2".to_string(), c)]
        );
    }

    #[test]
    fn test_decode_partition_tokens_empty() {
        assert!(decode_partition_tokens("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_partition_tokens_requires_leading_partition() {
        let err = decode_partition_tokens("1#100#1=2").unwrap_err();
        assert!(matches!(err, SessionTokenError::PartitionEntry { .. }));

        let err = decode_partition_tokens(":1#100").unwrap_err();
        assert!(matches!(err, SessionTokenError::PartitionEntry { .. }));
    }

    #[test]
    fn test_serde_uses_wire_form() {
        let token = SessionToken::parse("1#100#1=20").unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"1#100#1=20\"");
        let back: SessionToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    // ============================================
    // Property-based token algebra tests
    // ============================================

    mod proptest_session_token {
        use proptest::prelude::*;

        use super::*;

        fn arb_token() -> impl Strategy<Value = SessionToken> {
            (
                0u64..4,
                0u64..1_000,
                proptest::collection::btree_map(0u32..6, 0u64..1_000, 0..5),
            )
                .prop_map(|(version, global_lsn, regions)| {
                    SessionToken::new(version, global_lsn, regions)
                })
        }

        proptest! {
            /// merge(merge(a, b), c) == merge(a, merge(b, c))
            #[test]
            fn prop_merge_is_associative(a in arb_token(), b in arb_token(), c in arb_token()) {
                prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
            }

            /// merge(a, b) == merge(b, a)
            #[test]
            fn prop_merge_is_commutative(a in arb_token(), b in arb_token()) {
                prop_assert_eq!(a.merge(&b), b.merge(&a));
            }

            /// merge(a, a) == a
            #[test]
            fn prop_merge_is_idempotent(a in arb_token()) {
                prop_assert_eq!(a.merge(&a), a);
            }

            /// The merged token dominates both inputs.
            #[test]
            fn prop_merge_never_decreases(a in arb_token(), b in arb_token()) {
                let merged = a.merge(&b);
                prop_assert!(merged.dominates(&a));
                prop_assert!(merged.dominates(&b));
            }

            /// parse(serialize(t)) == t, and serialization is byte-exact.
            #[test]
            fn prop_round_trip(a in arb_token(), b in arb_token()) {
                let merged = a.merge(&b);
                let wire = merged.serialize();
                let parsed = SessionToken::parse(&wire).unwrap();
                prop_assert_eq!(&parsed, &merged);
                prop_assert_eq!(parsed.serialize(), wire);
            }

            /// A token always satisfies itself.
            #[test]
            fn prop_token_readable_against_itself(a in arb_token()) {
                prop_assert!(SessionToken::is_partition_readable(&a, &a));
            }

            /// Partition token lists survive encode/decode in order.
            #[test]
            fn prop_partition_list_round_trip(tokens in proptest::collection::vec(arb_token(), 0..5)) {
                let ids: Vec<String> = (0..tokens.len()).map(|i| i.to_string()).collect();
                let encoded = encode_partition_tokens(
                    ids.iter().map(String::as_str).zip(tokens.iter()),
                );
                let decoded = decode_partition_tokens(&encoded).unwrap();
                let expected: Vec<(String, SessionToken)> = ids.into_iter().zip(tokens).collect();
                prop_assert_eq!(decoded, expected);
            }
        }
    }
}
