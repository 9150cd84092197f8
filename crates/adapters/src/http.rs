// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP request dispatcher.
//!
//! Sends one [`RequestSpec`] to the service and normalizes whatever happens
//! into a [`RequestResult`]. HTTP error statuses are ordinary results; only
//! connection failures, DNS failures and timeouts set `error`. Bodies are
//! returned as raw bytes.

use async_trait::async_trait;
use std::error::Error as StdError;
use std::time::Instant;
use tracing::trace;
use xpu_bench_core::{Dispatcher, HttpMethod, RequestError, RequestResult, RequestSpec};

/// [`Dispatcher`] over a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDispatcher {
    /// Dispatcher for the service at `base_url`, e.g. `http://127.0.0.1:8000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("xpu-bench/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Dispatcher reusing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(&self, spec: &RequestSpec) -> RequestResult {
        let url = self.url(&spec.path);
        let mut request = match spec.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        }
        .timeout(spec.timeout);
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return RequestResult::failed(request_error(&e), started.elapsed()),
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => {
                trace!(url = %url, status, bytes = body.len(), "Response received");
                RequestResult::response(status, body, started.elapsed())
            }
            Err(e) => RequestResult::failed(request_error(&e), started.elapsed()),
        }
    }
}

fn request_error(error: &reqwest::Error) -> RequestError {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    if error.is_timeout() {
        RequestError::timeout(message)
    } else {
        RequestError::network(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::time::Duration;
    use xpu_bench_core::ResponseShape;

    async fn serve() -> String {
        let app = Router::new()
            .route("/health", get(|| async { Json(json!({"status": "healthy"})) }))
            .route(
                "/v1/chat/completions",
                post(|Json(body): Json<Value>| async move {
                    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
                    Json(json!({
                        "choices": [{"message": {"role": "assistant", "content": prompt}}],
                        "usage": {"completion_tokens": 3}
                    }))
                }),
            )
            .route(
                "/v1/completions",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model crashed") }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "late"
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health_200() {
        let dispatcher = HttpDispatcher::new(serve().await).unwrap();

        let result = dispatcher.send(&RequestSpec::health("/health")).await;

        assert!(result.is_success());
        let parsed = ResponseShape::Health.parse(&result.body).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("healthy"));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let dispatcher = HttpDispatcher::new(serve().await).unwrap();

        let spec = RequestSpec::chat("m", "Request #1: hello", 8, 0.0);
        let result = dispatcher.send(&spec).await;

        assert_eq!(result.status_code, 200);
        let parsed = ResponseShape::ChatCompletion.parse(&result.body).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("Request #1: hello"));
        assert_eq!(parsed.completion_tokens, Some(3));
    }

    #[tokio::test]
    async fn test_http_500_is_not_a_network_error() {
        let dispatcher = HttpDispatcher::new(serve().await).unwrap();

        let result = dispatcher
            .send(&RequestSpec::completion("m", "x", 8, 0.0))
            .await;

        assert_eq!(result.status_code, 500);
        assert!(result.error.is_none());
        assert!(!result.is_success());
        assert_eq!(result.body_text(), "model crashed");
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let dispatcher = HttpDispatcher::new(serve().await).unwrap();

        let spec = RequestSpec::get("/slow").with_timeout(Duration::from_millis(50));
        let result = dispatcher.send(&spec).await;

        assert_eq!(result.status_code, 0);
        assert!(matches!(
            result.error,
            Some(RequestError::Network { timed_out: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dispatcher = HttpDispatcher::new(format!("http://{}/", addr)).unwrap();
        let result = dispatcher.send(&RequestSpec::health("/health")).await;

        assert_eq!(result.status_code, 0);
        assert!(matches!(
            result.error,
            Some(RequestError::Network { timed_out: false, .. })
        ));
    }

    #[test]
    fn test_url_joining() {
        let dispatcher = HttpDispatcher::new("http://localhost:8000/").unwrap();
        assert_eq!(dispatcher.base_url(), "http://localhost:8000");
        assert_eq!(dispatcher.url("/v1/models"), "http://localhost:8000/v1/models");
        assert_eq!(dispatcher.url("health"), "http://localhost:8000/health");
    }
}
