//! Name path to resource id resolution.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{config::BackoffPolicy, error::Result, retry::with_retry};

/// Collection metadata returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMetadata {
    /// Immutable resource id. A recreated collection gets a new one.
    pub id: String,
    /// Name path, `dbs/<db>/colls/<coll>`.
    pub name_path: String,
}

/// Resolves a collection name path or resource id to its metadata.
#[async_trait]
pub trait CollectionResolver: Send + Sync + fmt::Debug {
    /// Looks the collection up on the service.
    async fn resolve_collection(&self, name_or_id: &str) -> Result<CollectionMetadata>;
}

/// Cache of name path resolutions.
///
/// Entries are only replaced on a forced lookup, which callers issue when
/// the service signals the name may now point at a different collection.
#[derive(Debug)]
pub struct CollectionCache {
    resolver: Arc<dyn CollectionResolver>,
    by_name: DashMap<String, CollectionMetadata>,
    retry_policy: BackoffPolicy,
}

impl CollectionCache {
    /// Creates an empty cache.
    pub fn new(resolver: Arc<dyn CollectionResolver>, retry_policy: BackoffPolicy) -> Self {
        Self { resolver, by_name: DashMap::new(), retry_policy }
    }

    /// Resolves a name path, consulting the service on a miss or when
    /// `force` is set.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error after metadata retries.
    pub async fn resolve(&self, name_path: &str, force: bool) -> Result<CollectionMetadata> {
        if !force && let Some(cached) = self.by_name.get(name_path) {
            return Ok(cached.value().clone());
        }

        let metadata =
            with_retry(&self.retry_policy, || self.resolver.resolve_collection(name_path)).await?;

        let previous = self.by_name.insert(name_path.to_owned(), metadata.clone());
        if let Some(previous) = previous
            && previous.id != metadata.id
        {
            debug!(
                name_path,
                stale_id = %previous.id,
                fresh_id = %metadata.id,
                "Collection name resolves to a new id"
            );
        }
        Ok(metadata)
    }

    /// Returns the cached resolution without contacting the service.
    #[must_use]
    pub fn cached(&self, name_path: &str) -> Option<CollectionMetadata> {
        self.by_name.get(name_path).map(|entry| entry.value().clone())
    }

    /// Drops a cached resolution.
    pub fn invalidate(&self, name_path: &str) {
        self.by_name.remove(name_path);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug)]
    struct CountingResolver {
        id: Mutex<String>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CollectionResolver for CountingResolver {
        async fn resolve_collection(&self, name_or_id: &str) -> Result<CollectionMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CollectionMetadata { id: self.id.lock().clone(), name_path: name_or_id.to_owned() })
        }
    }

    #[tokio::test]
    async fn test_resolve_caches_until_forced() {
        let resolver =
            Arc::new(CountingResolver { id: Mutex::new("id1".to_owned()), calls: AtomicU32::new(0) });
        let cache = CollectionCache::new(resolver.clone(), BackoffPolicy::no_retry());
        let name = "dbs/app/colls/users";

        assert_eq!(cache.resolve(name, false).await.unwrap().id, "id1");
        *resolver.id.lock() = "id2".to_owned();
        assert_eq!(cache.resolve(name, false).await.unwrap().id, "id1");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.resolve(name, true).await.unwrap().id, "id2");
        assert_eq!(cache.cached(name).unwrap().id, "id2");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_lookup() {
        let resolver =
            Arc::new(CountingResolver { id: Mutex::new("id1".to_owned()), calls: AtomicU32::new(0) });
        let cache = CollectionCache::new(resolver.clone(), BackoffPolicy::no_retry());

        cache.resolve("dbs/a/colls/b", false).await.unwrap();
        cache.invalidate("dbs/a/colls/b");
        assert!(cache.cached("dbs/a/colls/b").is_none());
        cache.resolve("dbs/a/colls/b", false).await.unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }
}
