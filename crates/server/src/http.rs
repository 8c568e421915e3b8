//! `/infer`, `/health`, `/ready`, `/metrics`, `/info` handlers and the
//! router that wires them up with CORS.

use crate::image_utils;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::Multipart;
use embedserve_common::error::EmbedServeError;
use embedserve_core::request::Payload;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/infer", post(infer))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/info", get(info))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps each failure mode to the status code the original service used:
/// bad input is a 400, backpressure is a 429, a stalled batch is a 504,
/// anything unexpected falls back to a 500.
fn error_response(err: EmbedServeError) -> Response {
    let (status, message) = match &err {
        EmbedServeError::InvalidImage(_) | EmbedServeError::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        EmbedServeError::QueueFull { .. } => (StatusCode::TOO_MANY_REQUESTS, err.to_string()),
        EmbedServeError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "request timeout".to_string()),
        EmbedServeError::Shutdown(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string()),
    };
    (status, Json(json!({ "detail": message }))).into_response()
}

async fn infer(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut image_bytes: Option<bytes::Bytes> = None;
    let mut text: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(EmbedServeError::invalid_request(format!(
                    "malformed multipart body: {e}"
                )))
            }
        };

        match field.name() {
            Some("image") => {
                let content_type = field.content_type().map(|ct| ct.to_string());
                if !content_type
                    .as_deref()
                    .is_some_and(|ct| ct.starts_with("image/"))
                {
                    return error_response(EmbedServeError::invalid_request(format!(
                        "image field must have a content-type starting with 'image/', got {:?}",
                        content_type
                    )));
                }
                match field.bytes().await {
                    Ok(bytes) => image_bytes = Some(bytes),
                    Err(e) => {
                        return error_response(EmbedServeError::invalid_request(format!(
                            "failed to read image field: {e}"
                        )))
                    }
                }
            }
            Some("text") => match field.text().await {
                Ok(t) => text = Some(t),
                Err(e) => {
                    return error_response(EmbedServeError::invalid_request(format!(
                        "failed to read text field: {e}"
                    )))
                }
            },
            _ => {}
        }
    }

    let Some(raw) = image_bytes else {
        return error_response(EmbedServeError::invalid_request("missing 'image' field"));
    };

    let max_upload_mb = state.config.security.max_upload_size_mb as f64;
    let size_mb = raw.len() as f64 / (1024.0 * 1024.0);
    if size_mb > max_upload_mb {
        return error_response(EmbedServeError::invalid_request(format!(
            "file too large: {size_mb:.2}MB (max: {max_upload_mb}MB)"
        )));
    }

    let decoded = match image_utils::decode_image(&raw) {
        Ok(img) => img,
        Err(e) => return error_response(e),
    };
    if let Err(e) = image_utils::validate_image_size(&decoded, max_upload_mb) {
        return error_response(e);
    }
    let decoded = image_utils::resize_if_needed(decoded);
    let metadata = json!({ "image_info": image_utils::image_info(&decoded) });

    let request_start = std::time::Instant::now();
    let payload = Payload { image: decoded, text };

    match state.worker.submit(payload, metadata).await {
        Ok(response) => {
            let total_time_ms = request_start.elapsed().as_secs_f64() * 1000.0;
            Json(json!({
                "output": response.output,
                "request_id": response.request_id,
                "processing_time_ms": response.processing_time_ms,
                "batch_size": response.batch_size,
                "total_time_ms": total_time_ms,
            }))
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "inference request failed");
            error_response(e)
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": state.config.service.name,
        "version": state.config.service.version,
    }))
}

async fn ready(State(state): State<AppState>) -> Response {
    use embedserve_core::worker::WorkerPhase;
    if state.worker.phase() == WorkerPhase::Ready {
        Json(json!({
            "status": "ready",
            "model": state.worker.model_info(),
        }))
        .into_response()
    } else {
        error!(phase = ?state.worker.phase(), "readiness check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "service not ready" })),
        )
            .into_response()
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    if !state.config.metrics.enabled {
        return (StatusCode::NOT_FOUND, "metrics disabled").into_response();
    }
    state.metrics.gather().into_response()
}

async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let queue = state.worker.queue_metrics();
    Json(json!({
        "service": {
            "name": state.config.service.name,
            "version": state.config.service.version,
        },
        "model": state.worker.model_info(),
        "queue": {
            "depth": queue.depth,
            "capacity": queue.capacity,
            "admitted": queue.admitted,
            "rejected": queue.rejected,
            "drain_timeouts": queue.drain_timeouts,
            "utilization": queue.utilization(),
        },
    }))
}
