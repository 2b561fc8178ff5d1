//! Boundary to the wire.

use std::fmt;

use async_trait::async_trait;

use crate::{
    error::Result,
    request::{DocumentRequest, StoreResponse},
};

/// Sends one fully addressed request.
///
/// Implementations own the wire format. They must classify failures at this
/// boundary: an error status becomes [`SdkError::Service`] via
/// [`SdkError::from_response`], a connect failure, timeout or reset becomes
/// [`SdkError::Network`]. Retries are never performed here.
///
/// [`SdkError::Service`]: crate::SdkError::Service
/// [`SdkError::from_response`]: crate::SdkError::from_response
/// [`SdkError::Network`]: crate::SdkError::Network
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends `request` and returns the successful response.
    async fn send(&self, request: &DocumentRequest) -> Result<StoreResponse>;
}
