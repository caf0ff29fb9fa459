//! Mock gateway for testing
//!
//! Scripted responses, an offline switch, and a recorded request log so
//! strategy and scheduler tests can assert exactly what went on the wire.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cache::CachedResponse;
use crate::error::{ApiError, Result};
use crate::gateway::Gateway;

/// A request the mock has seen.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

/// Scripted gateway for tests.
///
/// Responds 200 with an empty JSON object unless a response is scripted
/// for the (method, URL) pair. Flip `set_offline(true)` to make every
/// request fail at the transport level.
pub struct MockGateway {
    offline: Arc<Mutex<bool>>,
    responses: Arc<Mutex<HashMap<(String, String), CachedResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            offline: Arc::new(Mutex::new(false)),
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a response for a method and URL.
    pub async fn script(&self, method: &str, url: &str, response: CachedResponse) {
        self.responses
            .lock()
            .await
            .insert((method.to_uppercase(), url.to_string()), response);
    }

    /// Script a 200 response with the given body.
    pub async fn script_ok(&self, method: &str, url: &str, body: &[u8]) {
        self.script(
            method,
            url,
            CachedResponse {
                status: 200,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: body.to_vec(),
            },
        )
        .await;
    }

    /// Simulate losing or regaining connectivity.
    pub async fn set_offline(&self, offline: bool) {
        *self.offline.lock().await = offline;
    }

    /// All requests seen so far, in order.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of requests whose URL matches exactly.
    pub async fn count_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn request(
        &self,
        method: &str,
        request_url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<CachedResponse> {
        self.requests.lock().await.push(RecordedRequest {
            method: method.to_uppercase(),
            url: request_url.to_string(),
            body: body.cloned(),
        });

        if *self.offline.lock().await {
            return Err(ApiError::Network("offline".to_string()).into());
        }

        let scripted = self
            .responses
            .lock()
            .await
            .get(&(method.to_uppercase(), request_url.to_string()))
            .cloned();

        Ok(scripted.unwrap_or(CachedResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: b"{}".to_vec(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_response() {
        let mock = MockGateway::new();
        let response = mock.get("https://backend.satchel.app/x").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(mock.count_for("https://backend.satchel.app/x").await, 1);
    }

    #[tokio::test]
    async fn test_scripted_response() {
        let mock = MockGateway::new();
        mock.script_ok("GET", "/api/lessons/7", b"[1,2,3]").await;

        let response = mock.get("/api/lessons/7").await.unwrap();
        assert_eq!(response.body, b"[1,2,3]");
    }

    #[tokio::test]
    async fn test_offline_fails_transport() {
        let mock = MockGateway::new();
        mock.set_offline(true).await;

        assert!(mock.get("/api/lessons").await.is_err());

        mock.set_offline(false).await;
        assert!(mock.get("/api/lessons").await.is_ok());
    }

    #[tokio::test]
    async fn test_records_post_body() {
        let mock = MockGateway::new();
        let body = serde_json::json!({"client_id": "abc"});
        mock.post_json("/api/sync", &body).await.unwrap();

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].body, Some(body));
    }
}
