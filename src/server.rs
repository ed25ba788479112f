//! HTTP surface: request parsing, response shaping, CORS.
//!
//! Deliberately thin. Payloads are deserialized into records or tables
//! here and handed to the pipeline; everything interesting happens there.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::PipelineError;
use crate::metrics::ModelMetrics;
use crate::pipeline::{read_csv_bytes, Pipeline};

/// Uploads beyond this size are rejected outright.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub struct AppState {
    pub pipeline: Pipeline,
}

/// Build the service router with permissive CORS, mirroring the
/// wide-open posture of the frontend deployments this API serves.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/predict/batch", post(predict_batch_handler))
        .route("/retrain", post(retrain_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct RetrainingResponse {
    message: String,
    metrics: ModelMetrics,
}

/// JSON error envelope with a stable machine-readable type tag.
fn error_response(err: PipelineError) -> Response {
    let (status, error_type) = match &err {
        PipelineError::Schema(_) => (StatusCode::BAD_REQUEST, "schema_error"),
        PipelineError::Range { .. } => (StatusCode::BAD_REQUEST, "range_error"),
        PipelineError::Parse(_) => (StatusCode::BAD_REQUEST, "parse_error"),
        PipelineError::Train(_) => (StatusCode::BAD_REQUEST, "training_error"),
        PipelineError::RetrainInFlight => (StatusCode::CONFLICT, "retrain_in_flight"),
        PipelineError::NotFitted => (StatusCode::SERVICE_UNAVAILABLE, "not_fitted"),
        PipelineError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
    };
    if status.is_server_error() {
        warn!(%err, "request failed");
    }
    let body = json!({
        "error": { "message": err.to_string(), "type": error_type }
    });
    (status, Json(body)).into_response()
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Map<String, Value>>,
) -> Response {
    match state.pipeline.predict_record(&payload).await {
        Ok(prediction) => Json(prediction).into_response(),
        Err(err) => error_response(err),
    }
}

async fn predict_batch_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Response {
    let df = match csv_upload(multipart).await.and_then(read_csv_bytes) {
        Ok(df) => df,
        Err(err) => return error_response(err),
    };
    match state.pipeline.predict_table(&df).await {
        Ok(batch) => Json(batch).into_response(),
        Err(err) => error_response(err),
    }
}

async fn retrain_handler(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let df = match csv_upload(multipart).await.and_then(read_csv_bytes) {
        Ok(df) => df,
        Err(err) => return error_response(err),
    };
    match state.pipeline.retrain(df).await {
        Ok(metrics) => Json(RetrainingResponse {
            message: "Model retrained successfully".into(),
            metrics,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

/// Pull the CSV bytes out of a multipart upload's `file` field.
async fn csv_upload(mut multipart: Multipart) -> Result<Vec<u8>, PipelineError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::Parse(e.to_string()))?
    {
        if field.name() == Some("file") {
            return field
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| PipelineError::Parse(e.to_string()));
        }
    }
    Err(PipelineError::Parse(
        "multipart upload must contain a `file` field".into(),
    ))
}
