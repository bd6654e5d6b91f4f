//! Proxy module
//!
//! Forwards one inbound exchange to the configured origin. Only the `Host`
//! header and hop-by-hop headers are touched; bodies pass through as bytes.

mod tee;

pub use tee::{CaptureTap, TeeBody};

use crate::capture::error_chain;
use axum::http::{header, HeaderMap, HeaderValue, Method, Response};
use bytes::Bytes;
use reqwest::{redirect, Client, Url};
use std::time::Duration;

/// Headers that describe a single connection and must not be relayed
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Transport-level failure while talking to the origin
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid target origin `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("failed to build upstream client")]
    Client(#[source] reqwest::Error),
    #[error("origin {origin} did not respond within {timeout_secs}s")]
    Timeout {
        origin: String,
        timeout_secs: u64,
        #[source]
        source: reqwest::Error,
    },
    #[error("could not connect to origin {origin}")]
    Connect {
        origin: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to origin {origin} failed")]
    Transport {
        origin: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ForwardError {
    /// Message including every underlying cause, for the capture record
    pub fn describe(&self) -> String {
        error_chain(self)
    }
}

/// True for headers that only apply to one hop
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Remove hop-by-hop headers, including any named by `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    for name in HOP_BY_HOP_HEADERS.iter().copied() {
        headers.remove(name);
    }
    for name in listed {
        headers.remove(name.as_str());
    }
}

/// Relays requests to a single origin
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    origin: Url,
    host: String,
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder for `target` (scheme://host[:port])
    pub fn new(target: &str, timeout: Duration) -> Result<Self, ForwardError> {
        let invalid = |reason: &str| ForwardError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let origin = Url::parse(target.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        let host = match (origin.host_str(), origin.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(invalid("missing host")),
        };

        // Redirects are relayed to the caller, never followed here.
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(ForwardError::Client)?;

        Ok(Self {
            client,
            origin,
            host,
            timeout,
        })
    }

    /// The origin requests are relayed to
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Value written to the outbound `Host` header
    pub fn host_header(&self) -> &str {
        &self.host
    }

    /// Origin URL joined with the inbound path and query
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        let base = self.origin.as_str().trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{}{}", base, path_and_query)
        } else {
            format!("{}/{}", base, path_and_query)
        }
    }

    /// Send the inbound request upstream and return the origin's response head
    /// with its body still streaming
    pub async fn forward(
        &self,
        method: &Method,
        path_and_query: &str,
        inbound_headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<reqwest::Body>, ForwardError> {
        let url = self.upstream_url(path_and_query);

        let mut headers = inbound_headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);
        if let Ok(host) = HeaderValue::from_str(&self.host) {
            headers.insert(header::HOST, host);
        }

        let mut builder = self.client.request(method.clone(), &url).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|source| self.classify(source))?;

        tracing::debug!(
            url = %url,
            status = %response.status(),
            "Origin responded"
        );

        Ok(response.into())
    }

    fn classify(&self, source: reqwest::Error) -> ForwardError {
        let origin = self.origin.as_str().trim_end_matches('/').to_string();
        if source.is_timeout() {
            ForwardError::Timeout {
                origin,
                timeout_secs: self.timeout.as_secs(),
                source,
            }
        } else if source.is_connect() {
            ForwardError::Connect { origin, source }
        } else {
            ForwardError::Transport { origin, source }
        }
    }
}
