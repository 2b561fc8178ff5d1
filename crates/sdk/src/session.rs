//! Session token tracking for read-your-writes consistency.
//!
//! The store keeps one token per `(collection, partition)` and exposes two
//! views of every collection: by resource id and by name path. The name view
//! is an alias onto the id view, so updating through either path updates
//! both and deleting purges both.
//!
//! Tokens are never mutated in place. Every update reads the current value,
//! merges the incoming token into it and swaps the result in under the map's
//! shard lock, so concurrent readers see either the old or the new token.

use std::sync::Arc;

use dashmap::DashMap;
use meridian_types::{
    PartitionKeyRange, SessionToken, decode_partition_tokens, encode_partition_tokens,
};
use tracing::debug;

use crate::error::Result;

type PartitionTokens = DashMap<String, Arc<SessionToken>>;

/// Per-collection, per-partition session tokens.
#[derive(Debug, Default)]
pub struct SessionTokenStore {
    /// Collection resource id to its partition tokens.
    by_id: DashMap<String, Arc<PartitionTokens>>,
    /// Collection name path to the resource id it currently resolves to.
    name_to_id: DashMap<String, String>,
}

impl SessionTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `token` into the stored token for the partition.
    ///
    /// When `collection_name` is given it is (re)pointed at `collection_id`;
    /// a name previously aliasing another id means the collection was
    /// recreated, and the stale alias is replaced.
    pub fn update_token(
        &self,
        collection_id: &str,
        collection_name: Option<&str>,
        partition_id: &str,
        token: &SessionToken,
    ) {
        if let Some(name) = collection_name {
            self.alias(name, collection_id);
        }

        let partitions = self.partitions_or_insert(collection_id);
        partitions
            .entry(partition_id.to_owned())
            .and_modify(|current| {
                if !current.dominates(token) {
                    *current = Arc::new(current.merge(token));
                }
            })
            .or_insert_with(|| Arc::new(token.clone()));
    }

    /// Returns the partition token list for every partition of a collection.
    ///
    /// A value containing `/` is a name path, anything else a resource id.
    /// Unknown collections yield an empty string.
    #[must_use]
    pub fn get_token(&self, path_or_id: &str) -> String {
        let Some(partitions) = self.resolve(path_or_id) else {
            return String::new();
        };

        let mut entries: Vec<(String, Arc<SessionToken>)> = partitions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        encode_partition_tokens(entries.iter().map(|(pid, token)| (pid.as_str(), token.as_ref())))
    }

    /// Returns the token to send for `range`.
    ///
    /// A range without its own token (a fresh split child) inherits the merge
    /// of its parents' tokens.
    #[must_use]
    pub fn partition_token(
        &self,
        path_or_id: &str,
        range: &PartitionKeyRange,
    ) -> Option<SessionToken> {
        let partitions = self.resolve(path_or_id)?;

        if let Some(token) = partitions.get(&range.id) {
            return Some(token.as_ref().clone());
        }

        range
            .parents
            .iter()
            .filter_map(|parent| partitions.get(parent).map(|token| Arc::clone(token.value())))
            .fold(None, |acc: Option<SessionToken>, token| {
                Some(match acc {
                    Some(acc) => acc.merge(&token),
                    None => token.as_ref().clone(),
                })
            })
    }

    /// Merges every entry of a response session token header.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::SessionToken`](crate::SdkError::SessionToken) if the
    /// header is malformed. Nothing is merged in that case.
    pub fn record_response(
        &self,
        collection_id: &str,
        collection_name: Option<&str>,
        header: &str,
    ) -> Result<()> {
        for (partition_id, token) in decode_partition_tokens(header)? {
            self.update_token(collection_id, collection_name, &partition_id, &token);
        }
        Ok(())
    }

    /// Removes every partition token of a collection and every name alias
    /// pointing at it.
    pub fn clear_collection(&self, collection_id: &str) {
        self.by_id.remove(collection_id);
        self.name_to_id.retain(|_, id| id.as_str() != collection_id);
        debug!(collection_id, "Cleared session tokens");
    }

    /// Repoints `collection_name` from `stale_id` to `fresh_id`.
    ///
    /// Lookups by name stop returning the stale collection's tokens. Tokens
    /// stored under `stale_id` remain reachable by id; callers that also want
    /// them gone call [`clear_collection`](Self::clear_collection).
    pub fn resolve_rename(&self, collection_name: &str, stale_id: &str, fresh_id: &str) {
        let repointed = match self.name_to_id.get_mut(collection_name) {
            Some(mut current) if current.as_str() == stale_id => {
                fresh_id.clone_into(&mut *current);
                true
            },
            Some(_) => false,
            None => {
                self.name_to_id.insert(collection_name.to_owned(), fresh_id.to_owned());
                true
            },
        };
        if repointed {
            debug!(collection_name, stale_id, fresh_id, "Resolved collection rename");
        }
    }

    fn alias(&self, name: &str, collection_id: &str) {
        let mut entry = self.name_to_id.entry(name.to_owned()).or_insert_with(String::new);
        if entry.as_str() != collection_id {
            if !entry.is_empty() {
                debug!(
                    collection_name = name,
                    stale_id = entry.as_str(),
                    fresh_id = collection_id,
                    "Collection name now resolves to a different id"
                );
            }
            collection_id.clone_into(&mut *entry);
        }
    }

    fn partitions_or_insert(&self, collection_id: &str) -> Arc<PartitionTokens> {
        if let Some(partitions) = self.by_id.get(collection_id) {
            return Arc::clone(partitions.value());
        }
        Arc::clone(self.by_id.entry(collection_id.to_owned()).or_default().value())
    }

    fn resolve(&self, path_or_id: &str) -> Option<Arc<PartitionTokens>> {
        let id = if path_or_id.contains('/') {
            self.name_to_id.get(path_or_id)?.value().clone()
        } else {
            path_or_id.to_owned()
        };
        self.by_id.get(&id).map(|partitions| Arc::clone(partitions.value()))
    }
}

/// Read-only introspection of a [`SessionTokenStore`].
pub trait SessionDiagnostics {
    /// Partition ids holding a token for the collection id, sorted.
    fn partition_ids(&self, collection_id: &str) -> Vec<String>;

    /// Resource id a name path currently resolves to.
    fn aliased_id(&self, collection_name: &str) -> Option<String>;

    /// Stored token for one partition.
    fn token(&self, collection_id: &str, partition_id: &str) -> Option<SessionToken>;

    /// Number of collections with stored tokens.
    fn collection_count(&self) -> usize;
}

impl SessionDiagnostics for SessionTokenStore {
    fn partition_ids(&self, collection_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .by_id
            .get(collection_id)
            .map(|partitions| partitions.iter().map(|entry| entry.key().clone()).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn aliased_id(&self, collection_name: &str) -> Option<String> {
        self.name_to_id.get(collection_name).map(|id| id.value().clone())
    }

    fn token(&self, collection_id: &str, partition_id: &str) -> Option<SessionToken> {
        let partitions = self.by_id.get(collection_id)?;
        partitions.get(partition_id).map(|token| token.as_ref().clone())
    }

    fn collection_count(&self) -> usize {
        self.by_id.len()
    }
}
