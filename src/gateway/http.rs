//! reqwest-backed gateway implementation

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use crate::cache::CachedResponse;
use crate::error::{ApiError, Error, Result};
use crate::gateway::Gateway;

/// Gateway speaking real HTTP via reqwest.
pub struct HttpGateway {
    http: HttpClient,
}

impl HttpGateway {
    /// Create a new HTTP gateway.
    ///
    /// No request deadline is set here: the transport default applies,
    /// and callers treat a hang as failure at their own layer.
    pub fn new() -> Result<Self> {
        let http = HttpClient::builder()
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self { http })
    }
}

async fn into_response(response: reqwest::Response) -> Result<CachedResponse> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = response.bytes().await.map_err(ApiError::from)?.to_vec();

    Ok(CachedResponse {
        status,
        headers,
        body,
    })
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn request(
        &self,
        method: &str,
        request_url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<CachedResponse> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| Error::Other(format!("Invalid HTTP method: {}", method)))?;

        let mut builder = self.http.request(method, request_url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(ApiError::from)?;
        into_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/lessons/7")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":7}"#)
            .create_async()
            .await;

        let gateway = HttpGateway::new().unwrap();
        let url = format!("{}/api/lessons/7", server.url());
        let response = gateway.get(&url).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"id":7}"#);
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let gateway = HttpGateway::new().unwrap();
        let url = format!("{}/missing", server.url());
        let response = gateway.get(&url).await.unwrap();

        assert_eq!(response.status, 404);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_post_json_sends_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/sync")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(serde_json::json!({"op": "save"})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let gateway = HttpGateway::new().unwrap();
        let url = format!("{}/api/sync", server.url());
        let response = gateway
            .post_json(&url, &serde_json::json!({"op": "save"}))
            .await
            .unwrap();

        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let gateway = HttpGateway::new().unwrap();
        // Port 1 is never listening
        let result = gateway.get("http://127.0.0.1:1/api/lessons").await;

        match result {
            Err(Error::Api(err)) => assert!(err.is_network()),
            other => panic!("Expected a network error, got {:?}", other.map(|r| r.status)),
        }
    }
}
