//! Collection and partition routing.
//!
//! - [`CollectionCache`]: name path to resource id.
//! - [`PartitionRoutingCache`]: resource id to the current [`CollectionRoutingMap`].

mod cache;
mod collection;
mod map;

pub use cache::{PartitionRoutingCache, RangeFeed, RangeFetcher};
pub use collection::{CollectionCache, CollectionMetadata, CollectionResolver};
pub use map::CollectionRoutingMap;
