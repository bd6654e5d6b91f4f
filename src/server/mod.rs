//! Capture proxy server
//!
//! Accepts HTTP/1.1 connections, relays each exchange to the configured
//! origin and publishes one finalized record per exchange. Every exchange
//! runs on its own connection task, so a slow origin only stalls its own
//! caller.

use crate::capture::{header_fields, ExchangePhase, ExchangeRecorder, ResponseParts};
use crate::config::ProxyConfig;
use crate::proxy::{strip_hop_by_hop, CaptureTap, Forwarder, TeeBody};
use crate::records::SharedRecordLog;
use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, Response, StatusCode},
    response::IntoResponse,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Body answered when no target origin is configured
pub const NO_TARGET_BODY: &str = "No target specified";

/// Body answered when the origin could not be reached
pub const BAD_GATEWAY_BODY: &str = "Bad Gateway";

/// How long `stop` waits for in-flight exchanges before abandoning them
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Proxy state shared by every connection
pub struct ProxyState {
    pub forwarder: Option<Forwarder>,
    pub log: SharedRecordLog,
}

impl ProxyState {
    /// Create proxy state from configuration. An invalid target is an error.
    pub fn new(config: &ProxyConfig, log: SharedRecordLog) -> anyhow::Result<Self> {
        let forwarder = config
            .target()
            .map(|target| {
                Forwarder::new(target, Duration::from_secs(config.upstream_timeout_secs))
            })
            .transpose()?;

        Ok(Self { forwarder, log })
    }

    fn publish(&self, record: crate::capture::ExchangeRecord) {
        tracing::debug!(
            id = %record.id,
            method = %record.request.method,
            url = %record.request.url,
            status = ?record.status(),
            error = ?record.error,
            duration_ms = %record.timing.total,
            "Exchange finalized"
        );
        self.log.publish(record);
    }
}

/// Create the proxy router. Every path and method is captured.
pub fn create_proxy_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .fallback(capture_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Capture one exchange and relay it to the origin
pub async fn capture_handler(
    State(state): State<Arc<ProxyState>>,
    req: Request<Body>,
) -> Response<Body> {
    let (parts, body) = req.into_parts();

    let mut recorder = ExchangeRecorder::begin(
        parts.method.as_str(),
        parts.uri.to_string(),
        header_fields(&parts.headers),
        None,
    );

    // Inbound bodies are buffered whole before forwarding.
    recorder.advance(ExchangePhase::ReceivingBody);
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(id = %recorder.id(), error = %e, "Failed to read request body");
            let record = recorder.complete_error(format!("failed to read request body: {}", e));
            state.publish(record);
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };
    recorder.set_request_body(&body);

    recorder.advance(ExchangePhase::Forwarding);
    let Some(forwarder) = state.forwarder.as_ref() else {
        // Nothing to forward to; the synthesized answer is the response.
        recorder.advance(ExchangePhase::ReceivingResponse);
        let synthesized = ResponseParts::synthesized(404, NO_TARGET_BODY);
        let response = synthesized_response(&synthesized);
        state.publish(recorder.complete_success(synthesized));
        return response;
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    match forwarder
        .forward(&parts.method, path_and_query, &parts.headers, body)
        .await
    {
        Ok(upstream) => {
            recorder.advance(ExchangePhase::ReceivingResponse);
            let (head, upstream_body) = upstream.into_parts();

            let mut headers = head.headers;
            strip_hop_by_hop(&mut headers);

            let tap = CaptureTap::new(
                recorder,
                head.status.as_u16(),
                header_fields(&headers),
                state.log.clone(),
            );

            let mut response = Response::new(Body::new(TeeBody::new(upstream_body, tap)));
            *response.status_mut() = head.status;
            *response.headers_mut() = headers;
            response
        }
        Err(err) => {
            let message = err.describe();
            tracing::warn!(
                id = %recorder.id(),
                origin = %forwarder.origin(),
                error = %message,
                "Forwarding failed"
            );

            let synthesized = ResponseParts::synthesized(502, BAD_GATEWAY_BODY);
            let response = synthesized_response(&synthesized);
            state.publish(recorder.complete_bad_gateway(synthesized, message));
            response
        }
    }
}

/// Build the response sent to the caller from the parts that get recorded
fn synthesized_response(parts: &ResponseParts) -> Response<Body> {
    let mut response = Response::new(Body::from(parts.body.clone()));
    *response.status_mut() =
        StatusCode::from_u16(parts.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    for (name, value) in &parts.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// A capture proxy that has not been started yet
pub struct CaptureProxy {
    config: ProxyConfig,
    log: SharedRecordLog,
}

impl CaptureProxy {
    pub fn new(config: ProxyConfig, log: SharedRecordLog) -> Self {
        Self { config, log }
    }

    /// Bind the listener and start serving in the background.
    ///
    /// Bind failures (port in use, permission denied) are returned here.
    pub async fn start(self) -> anyhow::Result<ProxyHandle> {
        let state = Arc::new(ProxyState::new(&self.config, self.log)?);
        let app = create_proxy_router(state);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind capture proxy on {}", addr))?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            target = %self.config.target().unwrap_or("(none)"),
            "Capture proxy listening"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(ProxyHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

/// A running capture proxy
pub struct ProxyHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ProxyHandle {
    /// Address the proxy is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and let in-flight exchanges drain.
    ///
    /// Exchanges still running after the drain timeout are abandoned.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(DRAIN_TIMEOUT, &mut self.task).await {
            Ok(joined) => {
                joined.context("capture proxy task panicked")??;
            }
            Err(_) => {
                tracing::warn!("In-flight exchanges did not drain, abandoning them");
                self.task.abort();
            }
        }

        tracing::info!(addr = %self.local_addr, "Capture proxy stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::create_shared_log;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn create_test_app(target: Option<String>) -> (Router, SharedRecordLog) {
        let log = create_shared_log(None);
        let config = ProxyConfig {
            target,
            ..Default::default()
        };
        let state = Arc::new(ProxyState::new(&config, log.clone()).unwrap());
        (create_proxy_router(state), log)
    }

    fn closed_port_target() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_no_target_answers_404_and_records_it() {
        let (app, log) = create_test_app(None);

        let request = Request::builder()
            .uri("/anything")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], NO_TARGET_BODY.as_bytes());

        let records = log.get_all();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.request.method, "GET");
        assert_eq!(record.request.url, "/anything");
        assert_eq!(record.status(), Some(404));
        assert_eq!(record.response.as_ref().unwrap().body, NO_TARGET_BODY);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_closed_port_answers_502_with_error() {
        let (app, log) = create_test_app(Some(closed_port_target()));

        let request = Request::builder()
            .method("POST")
            .uri("/users")
            .body(Body::from("{\"name\":\"a\"}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], BAD_GATEWAY_BODY.as_bytes());

        let records = log.get_all();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status(), Some(502));
        assert!(!record.error.as_deref().unwrap().is_empty());
        assert_eq!(record.request.body.as_deref(), Some("{\"name\":\"a\"}"));
        assert!(record.timing.total >= 0.0);
    }

    #[test]
    fn test_invalid_target_is_rejected() {
        let config = ProxyConfig {
            target: Some("localhost".to_string()),
            ..Default::default()
        };
        assert!(ProxyState::new(&config, create_shared_log(None)).is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_propagates() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let config = ProxyConfig {
            port,
            ..Default::default()
        };
        let result = CaptureProxy::new(config, create_shared_log(None)).start().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let config = ProxyConfig {
            port: 0,
            ..Default::default()
        };
        let handle = CaptureProxy::new(config, create_shared_log(None))
            .start()
            .await
            .unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        handle.stop().await.unwrap();
    }
}
