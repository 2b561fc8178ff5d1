//! Session recovery after a collection is recreated under the same name.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{RetryDecision, RetryPolicy, ShouldRetry};
use crate::{
    error::{ErrorClass, SdkError},
    request::RequestContext,
    routing::CollectionCache,
    session::SessionTokenStore,
};

/// Detects a renamed or recreated collection behind a "read session not
/// available" response.
///
/// The request's session token was issued by the collection the name used to
/// point at, so no replica of the new collection will ever satisfy it. When a
/// forced name lookup returns a different id than the request used, the
/// name's session alias is moved to the new id and the request is resolved
/// again. A session token the caller supplied was issued by the old
/// collection too and is dropped. The retry does not count against the caller's budget and happens at
/// most once per operation.
///
/// Requests addressed by resource id, and lookups that return the same id,
/// fall through: the replica is simply behind.
#[derive(Debug)]
pub struct RenameAwarePolicy<P> {
    collections: Arc<CollectionCache>,
    session: Arc<SessionTokenStore>,
    attempted: bool,
    inner: P,
}

impl<P> RenameAwarePolicy<P> {
    /// Wraps `inner`.
    pub fn new(collections: Arc<CollectionCache>, session: Arc<SessionTokenStore>, inner: P) -> Self {
        Self { collections, session, attempted: false, inner }
    }
}

#[async_trait]
impl<P: RetryPolicy> RetryPolicy for RenameAwarePolicy<P> {
    fn on_before_send(&mut self, ctx: &mut RequestContext) {
        self.inner.on_before_send(ctx);
    }

    async fn should_retry(&mut self, error: &SdkError, ctx: &mut RequestContext) -> ShouldRetry {
        if error.class() != ErrorClass::StaleSession || self.attempted {
            return self.inner.should_retry(error, ctx).await;
        }
        let (Some(name), Some(stale_id)) =
            (ctx.collection_name().map(str::to_owned), ctx.collection_id.clone())
        else {
            return self.inner.should_retry(error, ctx).await;
        };
        self.attempted = true;

        let fresh = match self.collections.resolve(&name, true).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(collection_name = name, error = %e, "Name lookup after session miss failed");
                return self.inner.should_retry(error, ctx).await;
            },
        };

        if fresh.id == stale_id {
            debug!(collection_name = name, collection_id = stale_id, "Session not available, no rename");
            return self.inner.should_retry(error, ctx).await;
        }

        info!(collection_name = name, stale_id, fresh_id = %fresh.id, "Collection recreated under same name");
        self.session.resolve_rename(&name, &stale_id, &fresh.id);
        ctx.clear_resolved();
        ctx.discard_caller_session_token();
        ShouldRetry::Retry(RetryDecision::now().on_alternate_target().uncharged())
    }
}
