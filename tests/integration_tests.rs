//! Integration tests for api-devtools

use std::time::Duration;

use api_devtools::client::{RequestBody, RequestOptions, RequestRunner};
use api_devtools::config::{AppConfig, ProxyConfig, SharedConfig};
use api_devtools::records::{create_shared_log, RecordReceiver, SharedRecord, SharedRecordLog};
use api_devtools::server::{CaptureProxy, ProxyHandle};
use api_devtools::storage::RequestStore;
use axum::{
    extract::Path,
    http::HeaderMap,
    routing::{any, get},
    Json, Router,
};

/// Origin server used as the proxy target
async fn spawn_origin() -> String {
    let app = Router::new()
        .route(
            "/users",
            any(|headers: HeaderMap, body: String| async move {
                let host = headers
                    .get("host")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                Json(serde_json::json!({ "host": host, "received": body }))
            }),
        )
        .route(
            "/slow/:n",
            get(|Path(n): Path<u64>| async move {
                tokio::time::sleep(Duration::from_millis(slow_delay_ms(n))).await;
                format!("reply-{}", n)
            }),
        )
        .route(
            "/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "too late"
            }),
        )
        .route("/missing", get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn slow_delay_ms(n: u64) -> u64 {
    50 + (n % 3) * 20
}

/// Origin speaking raw HTTP/1.1 that sends one chunk, stalls, then finishes
async fn spawn_chunked_origin(stall: Duration) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\
                  Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nfirst\r\n",
            )
            .await
            .unwrap();
        socket.flush().await.unwrap();

        tokio::time::sleep(stall).await;
        socket.write_all(b"6\r\nsecond\r\n0\r\n\r\n").await.unwrap();
        socket.flush().await.unwrap();
    });
    format!("http://{}", addr)
}

async fn start_proxy(target: Option<String>) -> (ProxyHandle, SharedRecordLog) {
    start_proxy_with_timeout(target, 5).await
}

async fn start_proxy_with_timeout(
    target: Option<String>,
    upstream_timeout_secs: u64,
) -> (ProxyHandle, SharedRecordLog) {
    let log = create_shared_log(None);
    let config = ProxyConfig {
        port: 0,
        target,
        upstream_timeout_secs,
        ..ProxyConfig::default()
    };
    let handle = CaptureProxy::new(config, log.clone()).start().await.unwrap();
    (handle, log)
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn next_record(rx: &mut RecordReceiver) -> SharedRecord {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a record")
        .expect("record log closed")
}

#[tokio::test]
async fn test_proxy_forwards_and_captures_exchange() {
    let origin = spawn_origin().await;
    let origin_host = origin.trim_start_matches("http://").to_string();
    let (handle, log) = start_proxy(Some(origin)).await;
    let mut rx = log.subscribe();

    let response = http_client()
        .post(format!("http://{}/users?page=2", handle.local_addr()))
        .header("Content-Type", "application/json")
        .header("X-Trace", "abc")
        .body("{\"name\":\"a\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["host"], origin_host.as_str());
    assert_eq!(echoed["received"], "{\"name\":\"a\"}");

    let record = next_record(&mut rx).await;
    assert_eq!(record.request.method, "POST");
    assert_eq!(record.request.url, "/users?page=2");
    assert_eq!(record.request.headers["x-trace"], "abc");
    assert_eq!(record.request.body.as_deref(), Some("{\"name\":\"a\"}"));

    let captured = record.response.as_ref().unwrap();
    assert_eq!(captured.status, 200);
    assert_eq!(captured.status_text, "OK");
    assert!(captured.body.contains("\"received\""));
    assert!(captured.size > 0);
    assert!(record.error.is_none());
    assert!(record.timing.total >= 0.0);
    assert!(
        (record.timing.waiting + record.timing.content_download - record.timing.total).abs()
            < 1e-6
    );

    assert_eq!(log.count(), 1);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_origin_error_statuses_are_relayed() {
    let origin = spawn_origin().await;
    let (handle, log) = start_proxy(Some(origin)).await;
    let mut rx = log.subscribe();

    let response = http_client()
        .get(format!("http://{}/missing", handle.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "nope");

    let record = next_record(&mut rx).await;
    assert_eq!(record.status(), Some(404));
    assert!(record.error.is_none());
    assert_eq!(record.response.as_ref().unwrap().body, "nope");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_proxy_without_target_answers_404() {
    let (handle, log) = start_proxy(None).await;
    let mut rx = log.subscribe();

    let response = http_client()
        .get(format!("http://{}/anything", handle.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "No target specified");

    let record = next_record(&mut rx).await;
    assert_eq!(record.status(), Some(404));
    assert!(record.error.is_none());

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_origin_answers_502() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed = listener.local_addr().unwrap();
    drop(listener);

    let (handle, log) = start_proxy(Some(format!("http://{}", closed))).await;
    let mut rx = log.subscribe();

    let response = http_client()
        .get(format!("http://{}/users", handle.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(response.text().await.unwrap(), "Bad Gateway");

    let record = next_record(&mut rx).await;
    assert_eq!(record.status(), Some(502));
    assert!(!record.error.as_deref().unwrap().is_empty());
    assert!(record.timing.dns_lookup.is_none());
    assert_eq!(record.timing.waiting, 0.0);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_unresponsive_origin_times_out_with_502() {
    let origin = spawn_origin().await;
    let (handle, log) = start_proxy_with_timeout(Some(origin), 1).await;
    let mut rx = log.subscribe();

    let response = http_client()
        .get(format!("http://{}/hang", handle.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(response.text().await.unwrap(), "Bad Gateway");

    let record = next_record(&mut rx).await;
    assert_eq!(record.status(), Some(502));
    let error = record.error.as_deref().unwrap();
    assert!(error.contains("did not respond within 1s"), "{}", error);
    assert!(record.timing.total >= 1000.0);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_response_streams_before_origin_finishes() {
    let stall = Duration::from_millis(1500);
    let origin = spawn_chunked_origin(stall).await;
    let (handle, log) = start_proxy(Some(origin)).await;
    let mut rx = log.subscribe();

    let started = std::time::Instant::now();
    let mut response = http_client()
        .get(format!("http://{}/stream", handle.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let first = response.chunk().await.unwrap().unwrap();
    assert_eq!(&first[..], b"first");
    assert!(started.elapsed() < stall);
    assert_eq!(log.count(), 0);

    let mut rest = Vec::new();
    while let Some(chunk) = response.chunk().await.unwrap() {
        rest.extend_from_slice(&chunk);
    }
    assert_eq!(rest, b"second");

    let record = next_record(&mut rx).await;
    assert!(record.error.is_none());
    let captured = record.response.as_ref().unwrap();
    assert_eq!(captured.body, "firstsecond");
    assert_eq!(captured.size, 11);
    assert!(record.timing.total >= stall.as_millis() as f64);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_exchanges_are_isolated() {
    let origin = spawn_origin().await;
    let (handle, log) = start_proxy(Some(origin)).await;
    let mut rx = log.subscribe();
    let base = format!("http://{}", handle.local_addr());
    let client = http_client();

    let requests = (0..10).map(|n| {
        let client = client.clone();
        let url = format!("{}/slow/{}", base, n);
        tokio::spawn(async move {
            let body = client.get(url).send().await.unwrap().text().await.unwrap();
            (n, body)
        })
    });
    for task in requests.collect::<Vec<_>>() {
        let (n, body) = task.await.unwrap();
        assert_eq!(body, format!("reply-{}", n));
    }

    let mut seen = std::collections::HashSet::new();
    for _ in 0..10 {
        let record = next_record(&mut rx).await;
        let n = record
            .request
            .url
            .trim_start_matches("/slow/")
            .to_string();
        assert_eq!(
            record.response.as_ref().unwrap().body,
            format!("reply-{}", n)
        );
        let delay = slow_delay_ms(n.parse().unwrap()) as f64;
        assert!(
            record.timing.total >= delay,
            "exchange {} took {}ms, origin delay was {}ms",
            n,
            record.timing.total,
            delay
        );
        assert!(seen.insert(record.id.clone()));
    }
    assert_eq!(log.count(), 10);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_late_subscriber_sees_only_new_records() {
    let (handle, log) = start_proxy(None).await;
    let client = http_client();
    let url = format!("http://{}/first", handle.local_addr());

    let mut early = log.subscribe();
    client.get(&url).send().await.unwrap();
    next_record(&mut early).await;

    let mut late = log.subscribe();
    client
        .get(format!("http://{}/second", handle.local_addr()))
        .send()
        .await
        .unwrap();

    assert_eq!(next_record(&mut late).await.request.url, "/second");
    assert_eq!(next_record(&mut early).await.request.url, "/second");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_direct_request_matches_proxy_record_shape() {
    let origin = spawn_origin().await;
    let runner = RequestRunner::new(Duration::from_secs(5)).unwrap();

    let (body, fell_back) = RequestBody::parse_lenient("not json");
    assert!(fell_back);
    let record = runner
        .run(
            "put",
            &format!("{}/users", origin),
            RequestOptions::default().with_body(body),
        )
        .await;

    assert_eq!(record.request.method, "PUT");
    assert_eq!(record.request.body.as_deref(), Some("not json"));
    let response = record.response.as_ref().unwrap();
    assert_eq!(response.status, 200);
    assert!(response.body.contains("\"received\": \"not json\""));
}

#[tokio::test]
async fn test_saved_request_round_trips_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = RequestStore::new(dir.path().join("requests.json"));
    let origin = spawn_origin().await;
    let runner = RequestRunner::new(Duration::from_secs(5)).unwrap();

    let record = runner
        .run(
            "POST",
            &format!("{}/users", origin),
            RequestOptions::default().with_body(serde_json::json!({"name": "a"})),
        )
        .await;

    store.save("create-user", &record).unwrap();
    store.save("create-user", &record).unwrap();

    let saved = store.list().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].method, "POST");

    let replayed = store.get("create-user").unwrap().unwrap().to_record();
    assert_eq!(replayed.request.url, record.request.url);
    assert_eq!(replayed.request.body, record.request.body);

    assert!(store.delete("create-user").unwrap());
    assert!(!store.delete("create-user").unwrap());
}

#[test]
fn test_config_default() {
    let config = AppConfig::default();
    assert_eq!(config.proxy.host, "127.0.0.1");
    assert_eq!(config.proxy.port, 8888);
    assert!(config.proxy.target.is_none());
    assert_eq!(config.inspect.port, 8889);
}

#[test]
fn test_shared_config_update() {
    let shared = SharedConfig::new(AppConfig::default());

    shared.update_proxy(ProxyConfig {
        target: Some("http://example.com".to_string()),
        ..ProxyConfig::default()
    });

    assert_eq!(
        shared.get().proxy.target(),
        Some("http://example.com")
    );
}
