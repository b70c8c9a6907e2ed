//! JSON API handlers for job submission, observation, and previews.

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use super::state::AppState;
use crate::error::TarjetaError;
use crate::job::{CancelFlag, JobPayload};
use crate::pipeline::RenderOptions;
use crate::resolve::Record;
use crate::template::{ExportFormat, Template};

fn error_response(status: StatusCode, error: &TarjetaError) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({"error": error.to_string(), "kind": error.kind()})),
    )
}

/// Handle POST /api/jobs: enqueue a render job.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<JobPayload>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let job_id = state
        .controller
        .submit(payload)
        .await
        .map_err(|e| error_response(StatusCode::SERVICE_UNAVAILABLE, &e))?;
    Ok((StatusCode::ACCEPTED, Json(json!({"job_id": job_id}))))
}

/// Handle GET /api/jobs: list known jobs, oldest first.
pub async fn list(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.controller.list().await)
}

/// Handle GET /api/jobs/:id: job state, attempts, last error.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.controller.status(job_id).await {
        Some(job) => Ok(Json(job)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// Handle POST /api/jobs/:id/cancel.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> impl IntoResponse {
    let cancelled = state.controller.cancel(job_id).await;
    Json(json!({"cancelled": cancelled}))
}

/// Preview request: an inline template plus one record, rendered
/// synchronously without touching the queue.
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub template: Value,
    #[serde(default)]
    pub record: Record,
    #[serde(default)]
    pub output_format: Option<ExportFormat>,
}

/// Handle POST /api/render/preview: render and return the image bytes.
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PreviewRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let template = Template::from_json(&request.template.to_string())
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &e))?;

    let options = RenderOptions {
        output_format: request.output_format,
        fail_when_empty: false,
    };
    let output = state
        .pipeline
        .render(&template, &request.record, &options, &CancelFlag::new())
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, &e))?;

    let content_type = match output.format {
        ExportFormat::Png => "image/png",
        ExportFormat::Jpg => "image/jpeg",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], output.bytes))
}
