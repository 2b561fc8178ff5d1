//! Effective partition key ranges.
//!
//! A collection's documents are hashed into an ordered key space of
//! uppercase hex strings. The space is `["", "FF")`; each physical partition
//! serves one contiguous half-open sub-range.

use serde::{Deserialize, Serialize};

/// Smallest effective partition key (inclusive).
pub const MIN_EFFECTIVE_PARTITION_KEY: &str = "";

/// Upper bound of the effective partition key space (exclusive).
pub const MAX_EFFECTIVE_PARTITION_KEY: &str = "FF";

/// A half-open interval `[min_inclusive, max_exclusive)` of effective keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRange {
    /// Start key (inclusive).
    pub min_inclusive: String,
    /// End key (exclusive).
    pub max_exclusive: String,
}

impl KeyRange {
    /// Creates a new key range.
    pub fn new(min_inclusive: impl Into<String>, max_exclusive: impl Into<String>) -> Self {
        Self { min_inclusive: min_inclusive.into(), max_exclusive: max_exclusive.into() }
    }

    /// Creates a range covering the entire key space.
    #[must_use]
    pub fn full() -> Self {
        Self::new(MIN_EFFECTIVE_PARTITION_KEY, MAX_EFFECTIVE_PARTITION_KEY)
    }

    /// Creates a range holding exactly one key.
    ///
    /// The exclusive bound is the smallest string greater than `key`.
    pub fn point(key: impl Into<String>) -> Self {
        let min_inclusive = key.into();
        let mut max_exclusive = min_inclusive.clone();
        max_exclusive.push('\0');
        Self { min_inclusive, max_exclusive }
    }

    /// Returns true if `min_inclusive <= key < max_exclusive`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        key >= self.min_inclusive.as_str() && key < self.max_exclusive.as_str()
    }

    /// Returns true if the range holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min_inclusive >= self.max_exclusive
    }

    /// Returns true if the two ranges share at least one key.
    #[must_use]
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min_inclusive < other.max_exclusive
            && other.min_inclusive < self.max_exclusive
    }

    /// Returns true if `other` lies entirely within this range.
    #[must_use]
    pub fn covers(&self, other: &KeyRange) -> bool {
        self.min_inclusive <= other.min_inclusive && other.max_exclusive <= self.max_exclusive
    }
}

/// One physical partition of a collection as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKeyRange {
    /// Partition key range id, unique within the collection.
    pub id: String,
    /// Start key (inclusive).
    pub min_inclusive: String,
    /// End key (exclusive).
    pub max_exclusive: String,
    /// Ids of the ranges this one was split from, oldest first.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Replica set serving the range.
    pub replica_set: String,
}

impl PartitionKeyRange {
    /// Creates a partition key range with no parents.
    pub fn new(
        id: impl Into<String>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
        replica_set: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
            parents: Vec::new(),
            replica_set: replica_set.into(),
        }
    }

    /// Sets the parent range ids.
    #[must_use]
    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the key range served by this partition.
    #[must_use]
    pub fn key_range(&self) -> KeyRange {
        KeyRange::new(&self.min_inclusive, &self.max_exclusive)
    }

    /// Returns true if `key` falls inside this partition.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        key >= self.min_inclusive.as_str() && key < self.max_exclusive.as_str()
    }
}
