//! Capture module
//!
//! The record of one HTTP exchange and the recorder that owns it until it is
//! finalized. A recorder is consumed by whichever completion method ends the
//! exchange, so a record can only ever be finalized once.

use crate::timing::{RequestTiming, Stopwatch};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header map with trimmed, lower-cased keys
pub type HeaderFields = BTreeMap<String, String>;

/// Build a header map from arbitrary pairs. Later duplicates replace earlier ones.
pub fn normalize_headers<I, K, V>(pairs: I) -> HeaderFields
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut fields = HeaderFields::new();
    for (key, value) in pairs {
        let key = key.as_ref().trim();
        if key.is_empty() {
            continue;
        }
        fields.insert(key.to_ascii_lowercase(), value.into());
    }
    fields
}

/// Snapshot an `http` header map. Non-UTF-8 values are decoded lossily.
pub fn header_fields(headers: &hyper::HeaderMap) -> HeaderFields {
    normalize_headers(
        headers
            .iter()
            .map(|(k, v)| (k.as_str(), String::from_utf8_lossy(v.as_bytes()).into_owned())),
    )
}

/// Render an error with every underlying cause, outermost first
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Re-indent a JSON body with two spaces, or return the text unchanged
pub fn pretty_body(text: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string()),
        Err(_) => text.to_string(),
    }
}

/// The inbound (or outgoing, for direct runs) request of an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub id: String,
    /// Upper-cased method
    pub method: String,
    /// URL exactly as received
    pub url: String,
    pub headers: HeaderFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// The response an exchange ended with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderFields,
    /// Body text, pretty-printed when it is JSON. Empty when there was no body.
    pub body: String,
    /// Byte length of the body as received
    pub size: usize,
    /// Milliseconds from receipt to finalization
    pub duration: f64,
}

/// One finalized HTTP exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    pub id: String,
    pub request: CapturedRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timing: RequestTiming,
}

impl ExchangeRecord {
    /// Status of the response, if there was one
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// True when a 2xx response was received and no error was recorded
    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status(), Some(200..=299))
    }

    /// True when the exchange failed to reach or hear back from the origin
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Raw response data handed to the recorder on completion
#[derive(Debug, Clone)]
pub struct ResponseParts {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderFields,
    pub body: Bytes,
}

impl ResponseParts {
    /// Build response parts using the canonical reason phrase for `status`
    pub fn new(status: u16, headers: HeaderFields, body: impl Into<Bytes>) -> Self {
        let status_text = hyper::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
            .to_string();
        Self {
            status,
            status_text,
            headers,
            body: body.into(),
        }
    }

    /// A plain-text response synthesized by the proxy itself
    pub fn synthesized(status: u16, body: &'static str) -> Self {
        let headers = normalize_headers([("content-type", "text/plain; charset=utf-8")]);
        Self::new(status, headers, Bytes::from_static(body.as_bytes()))
    }
}

/// Progress of a single exchange through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExchangePhase {
    Created,
    ReceivingBody,
    Forwarding,
    ReceivingResponse,
    Finalized,
}

impl ExchangePhase {
    /// The phase that follows this one
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::ReceivingBody),
            Self::ReceivingBody => Some(Self::Forwarding),
            Self::Forwarding => Some(Self::ReceivingResponse),
            Self::ReceivingResponse => Some(Self::Finalized),
            Self::Finalized => None,
        }
    }
}

/// Owns the record of one exchange until it is finalized
#[derive(Debug)]
pub struct ExchangeRecorder {
    request: CapturedRequest,
    stopwatch: Stopwatch,
    phase: ExchangePhase,
}

impl ExchangeRecorder {
    /// Allocate a record and start its clock
    pub fn begin(
        method: &str,
        url: impl Into<String>,
        headers: HeaderFields,
        body: Option<String>,
    ) -> Self {
        let stopwatch = Stopwatch::start();
        let id = uuid::Uuid::new_v4().to_string();
        let request = CapturedRequest {
            id,
            method: method.trim().to_ascii_uppercase(),
            url: url.into(),
            headers,
            body,
            timestamp: stopwatch.started_at(),
        };
        tracing::trace!(id = %request.id, method = %request.method, url = %request.url, "Exchange created");

        Self {
            request,
            stopwatch,
            phase: ExchangePhase::Created,
        }
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub fn request(&self) -> &CapturedRequest {
        &self.request
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.stopwatch.elapsed_ms()
    }

    /// Move the exchange forward. Phases never go backwards.
    pub fn advance(&mut self, next: ExchangePhase) {
        debug_assert_eq!(self.phase.next(), Some(next), "phases advance one step at a time");
        debug_assert!(next != ExchangePhase::Finalized);
        tracing::trace!(id = %self.request.id, from = ?self.phase, to = ?next, "Exchange phase");
        self.phase = next;
    }

    /// Store the fully buffered inbound body. Empty bodies are left absent.
    pub fn set_request_body(&mut self, body: &[u8]) {
        if !body.is_empty() {
            self.request.body = Some(String::from_utf8_lossy(body).into_owned());
        }
    }

    /// Finalize with the origin's (or the proxy's own) response
    pub fn complete_success(self, parts: ResponseParts) -> ExchangeRecord {
        self.finalize(Some(parts), None)
    }

    /// Finalize with a transport failure and no response
    pub fn complete_error(self, message: impl Into<String>) -> ExchangeRecord {
        self.finalize(None, Some(message.into()))
    }

    /// Finalize with a transport failure answered by a synthesized response
    pub fn complete_bad_gateway(
        self,
        parts: ResponseParts,
        message: impl Into<String>,
    ) -> ExchangeRecord {
        self.finalize(Some(parts), Some(message.into()))
    }

    fn finalize(self, parts: Option<ResponseParts>, error: Option<String>) -> ExchangeRecord {
        let total = self.stopwatch.elapsed_ms();

        let timing = if error.is_none() {
            RequestTiming::split(total)
        } else {
            RequestTiming::total_only(total)
        };

        let response = parts.map(|parts| {
            let text = String::from_utf8_lossy(&parts.body);
            CapturedResponse {
                status: parts.status,
                status_text: parts.status_text,
                headers: parts.headers,
                body: pretty_body(&text),
                size: parts.body.len(),
                duration: total,
            }
        });

        tracing::trace!(
            id = %self.request.id,
            from = ?self.phase,
            to = ?ExchangePhase::Finalized,
            "Exchange phase"
        );

        ExchangeRecord {
            id: self.request.id.clone(),
            request: self.request,
            response,
            error,
            timing,
        }
    }
}
