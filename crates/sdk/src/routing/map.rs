//! Immutable snapshot of how a collection's key space is partitioned.

use std::collections::HashSet;

use meridian_types::{
    KeyRange, MAX_EFFECTIVE_PARTITION_KEY, MIN_EFFECTIVE_PARTITION_KEY, PartitionKeyRange,
};

/// Ordered, contiguous, non-overlapping partition key ranges covering
/// `["", "FF")` for one collection.
///
/// A map is never modified. Refreshes build a new map and swap it in whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRoutingMap {
    collection_id: String,
    ranges: Vec<PartitionKeyRange>,
    /// Ids replaced by a split, so a late response naming one is recognised.
    gone_ranges: HashSet<String>,
    etag: Option<String>,
}

impl CollectionRoutingMap {
    /// Builds a map from unordered ranges.
    ///
    /// Returns `None` unless the ranges are contiguous and cover the whole
    /// key space exactly once.
    #[must_use]
    pub fn try_create(
        collection_id: impl Into<String>,
        mut ranges: Vec<PartitionKeyRange>,
        etag: Option<String>,
    ) -> Option<Self> {
        ranges.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));
        if !is_complete(&ranges) {
            return None;
        }

        let gone_ranges = ranges.iter().flat_map(|range| range.parents.iter().cloned()).collect();
        Some(Self { collection_id: collection_id.into(), ranges, gone_ranges, etag })
    }

    /// Returns the collection this map belongs to.
    #[must_use]
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    /// Returns the ranges in key order.
    #[must_use]
    pub fn ranges(&self) -> &[PartitionKeyRange] {
        &self.ranges
    }

    /// Returns the change feed position this map was built from.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Returns the range containing `effective_key`.
    ///
    /// # Panics
    ///
    /// Panics if the key is outside `["", "FF")`; callers validate keys first.
    #[must_use]
    pub fn lookup(&self, effective_key: &str) -> &PartitionKeyRange {
        assert!(
            effective_key < MAX_EFFECTIVE_PARTITION_KEY,
            "effective partition key {effective_key:?} is outside the key space"
        );
        // Ranges start at "" so at least one range satisfies the predicate.
        let index = self.ranges.partition_point(|range| range.min_inclusive.as_str() <= effective_key);
        &self.ranges[index - 1]
    }

    /// Returns every range intersecting `range`, in key order.
    #[must_use]
    pub fn overlapping(&self, range: &KeyRange) -> Vec<&PartitionKeyRange> {
        if range.is_empty() {
            return Vec::new();
        }
        self.ranges.iter().filter(|candidate| candidate.key_range().overlaps(range)).collect()
    }

    /// Returns the range with the given id, if it is part of this map.
    #[must_use]
    pub fn range_by_id(&self, id: &str) -> Option<&PartitionKeyRange> {
        self.ranges.iter().find(|range| range.id == id)
    }

    /// Returns true if `id` was replaced by a split recorded in this map.
    #[must_use]
    pub fn is_gone(&self, id: &str) -> bool {
        self.gone_ranges.contains(id)
    }

    /// Applies a change feed delta.
    ///
    /// Ranges in `delta` replace the ranges named as their parents and any
    /// range with the same id. Returns `None` if the result does not cover
    /// the key space, in which case the caller refetches the full map.
    #[must_use]
    pub fn try_combine(&self, delta: Vec<PartitionKeyRange>, etag: Option<String>) -> Option<Self> {
        let replaced: HashSet<String> = delta
            .iter()
            .flat_map(|range| range.parents.iter().chain([&range.id]).cloned())
            .collect();

        let mut ranges: Vec<PartitionKeyRange> = self
            .ranges
            .iter()
            .filter(|range| !replaced.contains(&range.id))
            .cloned()
            .collect();
        ranges.extend(delta);

        let mut combined = Self::try_create(&self.collection_id, ranges, etag)?;
        combined.gone_ranges.extend(self.gone_ranges.iter().cloned());
        Some(combined)
    }
}

fn is_complete(ranges: &[PartitionKeyRange]) -> bool {
    let Some(first) = ranges.first() else {
        return false;
    };
    if first.min_inclusive != MIN_EFFECTIVE_PARTITION_KEY {
        return false;
    }
    let contiguous = ranges.windows(2).all(|pair| {
        pair[0].max_exclusive == pair[1].min_inclusive && pair[0].min_inclusive < pair[0].max_exclusive
    });
    ranges.last().is_some_and(|last| {
        last.max_exclusive == MAX_EFFECTIVE_PARTITION_KEY && last.min_inclusive < last.max_exclusive
    }) && contiguous
}
