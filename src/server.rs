//! HTTP API shell.
//!
//! Thin Axum layer over the [`Engine`]: every handler validates, delegates,
//! and translates structured errors into status codes. Business logic lives
//! in the engine and below.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Token-budgeted context for a natural-language query |
//! | `POST` | `/fetch_exact` | Pointer dereference: exact line range from disk |
//! | `POST` | `/jobs` | Submit a background job |
//! | `GET`  | `/jobs/{id}` | Job record |
//! | `DELETE` | `/jobs/{id}` | Cancel a pending or running job |
//! | `GET`  | `/stream` | Server-sent events: `job_update`, `log`, `suggestion` |
//! | `GET`  | `/health` | Liveness plus the retrieval health score |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_path", "message": "..." } }
//! ```
//!
//! 400 for client validation, 403 for unsafe paths, 404 for missing jobs or
//! files, 500 only for truly unexpected failures.

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::{Engine, QueryRequest, QueryResponse};
use crate::errors::EngineError;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Build the router; exposed separately so tests can drive it in-process.
pub fn build_router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/fetch_exact", post(handle_fetch_exact))
        .route("/jobs", post(handle_submit_job))
        .route("/jobs/{id}", get(handle_get_job).delete(handle_cancel_job))
        .route("/stream", get(handle_stream))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Serve until the process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = engine.config.server.bind.clone();
    let app = build_router(engine);

    tracing::info!("API listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error mapping ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        let (status, code) = match &e {
            EngineError::InvalidPath(_) => (StatusCode::FORBIDDEN, "invalid_path"),
            EngineError::InvalidRange(_) => (StatusCode::BAD_REQUEST, "invalid_range"),
            EngineError::FileNotFound(_) => (StatusCode::NOT_FOUND, "file_not_found"),
            EngineError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
            EngineError::LockTimeout(_) => (StatusCode::INTERNAL_SERVER_ERROR, "lock_timeout"),
            EngineError::EncodingError(_) => (StatusCode::BAD_REQUEST, "encoding_error"),
            EngineError::JobNotFound(_) => (StatusCode::NOT_FOUND, "job_not_found"),
            EngineError::JobNotCancellable(_) => (StatusCode::BAD_REQUEST, "job_not_cancellable"),
            EngineError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: e.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if request.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    match request.mode.as_str() {
        "light" | "auto" | "extra" | "budget" => {}
        other => {
            return Err(bad_request(format!(
                "Unknown mode: {}. Use light, auto, extra, or budget.",
                other
            )))
        }
    }

    Ok(Json(state.engine.query(request).await))
}

// ============ POST /fetch_exact ============

#[derive(Deserialize)]
struct FetchRequest {
    file_path: String,
    start_line: i64,
    end_line: i64,
    #[serde(default)]
    content_hash: Option<String>,
}

async fn handle_fetch_exact(
    State(state): State<AppState>,
    Json(request): Json<FetchRequest>,
) -> Result<Json<crate::fetch::FetchResult>, AppError> {
    let result = state
        .engine
        .fetch_exact(
            request.file_path,
            request.start_line,
            request.end_line,
            request.content_hash,
        )
        .await?;
    Ok(Json(result))
}

// ============ Jobs ============

#[derive(Deserialize)]
struct SubmitJobRequest {
    #[serde(rename = "type")]
    job_type: String,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default = "default_priority")]
    priority: i64,
}

fn default_priority() -> i64 {
    5
}

#[derive(Serialize)]
struct SubmitJobResponse {
    id: String,
    status: String,
}

async fn handle_submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, AppError> {
    if request.job_type.trim().is_empty() {
        return Err(bad_request("type must not be empty"));
    }
    let id = state
        .engine
        .queue
        .submit(&request.job_type, request.params, request.priority)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(SubmitJobResponse {
        id,
        status: "pending".to_string(),
    }))
}

async fn handle_get_job(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<crate::models::Job>, AppError> {
    let job = state
        .engine
        .queue
        .get(&id)
        .await
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| AppError::from(EngineError::JobNotFound(id)))?;
    Ok(Json(job))
}

#[derive(Serialize)]
struct CancelResponse {
    status: String,
}

async fn handle_cancel_job(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let job = state
        .engine
        .queue
        .get(&id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    if job.is_none() {
        return Err(EngineError::JobNotFound(id).into());
    }

    let cancelled = state
        .engine
        .queue
        .cancel(&id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    if !cancelled {
        return Err(EngineError::JobNotCancellable(id).into());
    }
    Ok(Json(CancelResponse {
        status: "cancelled".to_string(),
    }))
}

// ============ GET /stream ============

async fn handle_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.engine.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => {
            let data = serde_json::to_string(&event.data).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(event.event).data(data)))
        }
        // A lagged subscriber just misses events; no replay.
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    health_score: f64,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        health_score: state.engine.health_score(),
    })
}
