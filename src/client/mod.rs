//! Direct request runner
//!
//! Sends a single request without a listening socket and returns the same
//! record shape the proxy produces. Failures never escape: they end up in
//! the record's `error` field.

use crate::capture::{
    error_chain, header_fields, normalize_headers, ExchangePhase, ExchangeRecord,
    ExchangeRecorder, HeaderFields, ResponseParts,
};
use crate::config::ClientConfig;
use anyhow::Result;
use reqwest::Client;
use std::time::Duration;

/// Body of a direct request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent verbatim
    Text(String),
    /// Serialized to compact JSON before sending
    Json(serde_json::Value),
}

impl RequestBody {
    /// Interpret caller input as JSON, falling back to raw text.
    ///
    /// Returns the body and whether the fallback was taken.
    pub fn parse_lenient(input: &str) -> (Self, bool) {
        match serde_json::from_str(input) {
            Ok(value) => (RequestBody::Json(value), false),
            Err(e) => {
                tracing::warn!(error = %e, "Body is not valid JSON, sending it as a raw string");
                (RequestBody::Text(input.to_string()), true)
            }
        }
    }

    /// Text that goes on the wire
    pub fn into_text(self) -> String {
        match self {
            RequestBody::Text(text) => text,
            RequestBody::Json(value) => value.to_string(),
        }
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::Json(value)
    }
}

/// Optional parts of a direct request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Merged over the default `Content-Type: application/json`
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RequestOptions {
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Headers every direct request starts from
pub fn default_headers() -> HeaderFields {
    normalize_headers([("Content-Type", "application/json")])
}

/// Runs single requests and records them
pub struct RequestRunner {
    client: Client,
}

impl RequestRunner {
    /// Create a runner whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self { client })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(Duration::from_secs(config.timeout_secs))
    }

    /// Send one request and return its finalized record
    pub async fn run(&self, method: &str, url: &str, options: RequestOptions) -> ExchangeRecord {
        let mut headers = default_headers();
        headers.extend(normalize_headers(options.headers));

        let body = options.body.map(RequestBody::into_text);
        let mut recorder = ExchangeRecorder::begin(method, url, headers.clone(), body.clone());

        let method = match reqwest::Method::from_bytes(recorder.request().method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                let message = format!("invalid HTTP method `{}`: {}", recorder.request().method, e);
                return recorder.complete_error(message);
            }
        };

        tracing::debug!(method = %method, url = %url, "Sending request");
        recorder.advance(ExchangePhase::ReceivingBody);
        recorder.advance(ExchangePhase::Forwarding);

        let mut builder = self.client.request(method, url);
        for (key, value) in &headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return finish_with_error(recorder, &e),
        };

        recorder.advance(ExchangePhase::ReceivingResponse);
        let status = response.status().as_u16();
        let response_headers = header_fields(response.headers());

        let record = match response.bytes().await {
            Ok(bytes) => {
                recorder.complete_success(ResponseParts::new(status, response_headers, bytes))
            }
            Err(e) => finish_with_error(recorder, &e),
        };

        tracing::info!(
            method = %record.request.method,
            url = %record.request.url,
            status = ?record.status(),
            duration_ms = %record.timing.total,
            "Request completed"
        );

        record
    }
}

fn finish_with_error(recorder: ExchangeRecorder, err: &reqwest::Error) -> ExchangeRecord {
    let message = error_chain(err);
    tracing::warn!(url = %recorder.request().url, error = %message, "Request failed");
    recorder.complete_error(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::any, routing::get, Json, Router};

    async fn spawn_origin() -> String {
        let app = Router::new()
            .route("/json", get(|| async { Json(serde_json::json!({"id": 1})) }))
            .route(
                "/echo",
                any(|headers: axum::http::HeaderMap, body: String| async move {
                    let content_type = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    format!("{}|{}", content_type, body)
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn runner() -> RequestRunner {
        RequestRunner::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_get_json_is_pretty_printed() {
        let origin = spawn_origin().await;
        let record = runner()
            .run("get", &format!("{}/json", origin), RequestOptions::default())
            .await;

        assert!(record.error.is_none());
        assert_eq!(record.request.method, "GET");
        let response = record.response.as_ref().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "{\n  \"id\": 1\n}");
        assert_eq!(response.size, 8);
        assert!(
            (record.timing.waiting + record.timing.content_download - record.timing.total).abs()
                < 1e-6
        );
    }

    #[tokio::test]
    async fn test_put_with_malformed_json_sends_raw_string() {
        let origin = spawn_origin().await;
        let (body, fell_back) = RequestBody::parse_lenient("not json");
        assert!(fell_back);

        let record = runner()
            .run(
                "PUT",
                &format!("{}/echo", origin),
                RequestOptions::default().with_body(body),
            )
            .await;

        assert_eq!(record.request.body.as_deref(), Some("not json"));
        assert_eq!(
            record.response.unwrap().body,
            "application/json|not json"
        );
    }

    #[tokio::test]
    async fn test_json_body_is_serialized_and_headers_override_default() {
        let origin = spawn_origin().await;
        let options = RequestOptions::default()
            .with_header("Content-Type", "text/plain")
            .with_body(serde_json::json!({"title": "test"}));

        let record = runner()
            .run("post", &format!("{}/echo", origin), options)
            .await;

        assert_eq!(record.request.headers["content-type"], "text/plain");
        assert_eq!(record.request.body.as_deref(), Some("{\"title\":\"test\"}"));
        assert_eq!(
            record.response.unwrap().body,
            "text/plain|{\"title\":\"test\"}"
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_recorded() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let record = runner()
            .run("GET", &format!("http://{}/", addr), RequestOptions::default())
            .await;

        assert!(record.response.is_none());
        assert!(!record.error.as_deref().unwrap().is_empty());
        assert!(record.timing.total >= 0.0);
    }

    #[tokio::test]
    async fn test_invalid_method_and_url_are_recorded() {
        let record = runner()
            .run("BAD METHOD", "http://localhost/", RequestOptions::default())
            .await;
        assert!(record.error.unwrap().contains("invalid HTTP method"));

        let record = runner()
            .run("GET", "not a url", RequestOptions::default())
            .await;
        assert!(record.response.is_none());
        assert!(record.error.is_some());
    }

    #[test]
    fn test_parse_lenient_accepts_json() {
        let (body, fell_back) = RequestBody::parse_lenient("{\"a\":1}");
        assert!(!fell_back);
        assert_eq!(body.into_text(), "{\"a\":1}");
    }
}
