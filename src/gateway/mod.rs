//! Network gateway for the engine
//!
//! Every byte the engine sends or receives goes through the [`Gateway`]
//! trait, so the interceptor and the sync scheduler can be exercised
//! against a scripted implementation without a network.

use async_trait::async_trait;

use crate::cache::CachedResponse;
use crate::error::Result;

pub mod http;
#[cfg(test)]
pub mod mock;

pub use http::HttpGateway;
#[cfg(test)]
#[allow(unused_imports)]
pub use mock::MockGateway;

/// Outbound request surface.
///
/// Non-2xx statuses come back as `Ok` responses; only transport-level
/// failures (no response at all) are errors. Policy decisions about
/// status codes belong to the callers.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Perform a request with an optional JSON body.
    async fn request(
        &self,
        method: &str,
        request_url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<CachedResponse>;

    /// GET a URL.
    async fn get(&self, request_url: &str) -> Result<CachedResponse> {
        self.request("GET", request_url, None).await
    }

    /// POST a JSON body, as used for queue delivery.
    async fn post_json(
        &self,
        request_url: &str,
        body: &serde_json::Value,
    ) -> Result<CachedResponse> {
        self.request("POST", request_url, Some(body)).await
    }
}
