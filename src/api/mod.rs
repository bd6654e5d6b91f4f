//! Inspection API module
//!
//! Read-only HTTP endpoints over the captured records. Served on its own
//! listener because the proxy port forwards every path.

use crate::capture::ExchangeRecord;
use crate::codegen::{generate, CodeTarget};
use crate::config::{AppConfig, SharedConfig};
use crate::records::{RecordSummary, SharedRecordLog};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub config: SharedConfig,
    pub records: SharedRecordLog,
}

impl ApiState {
    pub fn new(config: SharedConfig, records: SharedRecordLog) -> Self {
        Self { config, records }
    }
}

/// Create the inspection API router
pub fn create_api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/records", get(list_records))
        .route("/api/records/clear", post(clear_records))
        .route("/api/records/:id", get(get_record))
        .route("/api/records/:id/code", get(get_record_code))
        .route("/api/summary", get(get_summary))
        .route("/api/config", get(get_config))
        .route("/api/health", get(health_check))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Query parameters for record listings
#[derive(Debug, Deserialize, Default)]
pub struct RecordsQuery {
    /// Only records whose request arrived in the last N seconds
    pub seconds: Option<i64>,
}

async fn list_records(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<RecordsQuery>,
) -> impl IntoResponse {
    let records = match query.seconds {
        Some(seconds) => match state.records.get_recent(seconds) {
            Some(records) => records,
            None => {
                return (StatusCode::BAD_REQUEST, "seconds is out of range").into_response()
            }
        },
        None => state.records.get_all(),
    };
    let records: Vec<ExchangeRecord> = records.iter().map(|r| ExchangeRecord::clone(r)).collect();
    Json(records).into_response()
}

async fn get_record(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.records.get(&id) {
        Some(record) => Json(ExchangeRecord::clone(&record)).into_response(),
        None => (StatusCode::NOT_FOUND, "Record not found").into_response(),
    }
}

/// Query parameters for code generation
#[derive(Debug, Deserialize)]
pub struct CodeQuery {
    #[serde(default = "default_target")]
    pub target: String,
}

fn default_target() -> String {
    CodeTarget::Curl.to_string()
}

async fn get_record_code(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<CodeQuery>,
) -> impl IntoResponse {
    let target: CodeTarget = match query.target.parse() {
        Ok(target) => target,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.records.get(&id) {
        Some(record) => (StatusCode::OK, generate(&record, target)).into_response(),
        None => (StatusCode::NOT_FOUND, "Record not found").into_response(),
    }
}

async fn get_summary(State(state): State<Arc<ApiState>>) -> Json<RecordSummary> {
    Json(state.records.get_summary())
}

async fn clear_records(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.records.clear();
    (StatusCode::OK, "Records cleared")
}

async fn get_config(State(state): State<Arc<ApiState>>) -> Json<AppConfig> {
    Json(state.config.get())
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Serve the inspection API until the process exits
pub async fn start_api_server(
    config: SharedConfig,
    records: SharedRecordLog,
) -> anyhow::Result<()> {
    let inspect = config.get().inspect;
    let addr = format!("{}:{}", inspect.host, inspect.port);

    let app = create_api_router(Arc::new(ApiState::new(config, records)));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Inspection API listening");
    axum::serve(listener, app).await?;

    Ok(())
}
