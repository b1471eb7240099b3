use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use futures::StreamExt;
use garde::Validate;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::models::requests::{CreateJobRequest, CreateJobResponse};
use crate::routes::{error_body, internal_error};
use crate::services::admission::AdmissionError;

/// Check that the submitted selfie is a base64 data URL carrying bytes that
/// sniff as a real image.
fn validate_image_payload(image: &str) -> Result<(), &'static str> {
    let Some(rest) = image.strip_prefix("data:image/") else {
        return Err("Image must be a valid base64 data URL");
    };
    let Some((_, encoded)) = rest.split_once(";base64,") else {
        return Err("Image must be a valid base64 data URL");
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| "Image payload is not valid base64")?;
    image::guess_format(&bytes).map_err(|_| "Image payload is not a recognizable image")?;
    Ok(())
}

/// POST /create-job — admit a face-search job for a user.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> impl IntoResponse {
    if let Err(report) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            error_body("Invalid request", &report.to_string()),
        );
    }
    if let Err(message) = validate_image_payload(&request.image) {
        return (
            StatusCode::BAD_REQUEST,
            error_body("Invalid request", message),
        );
    }

    match state
        .admission
        .admit(&request.uid, request.image, request.stage)
        .await
    {
        Ok(record) => {
            metrics::counter!("face_search_jobs_total").increment(1);
            let response = CreateJobResponse {
                job_id: record.id,
                timestamp: record.data.timestamp,
            };
            (StatusCode::CREATED, Json(json!(response)))
        }
        Err(AdmissionError::AlreadyQueued { job_id, stage }) => {
            metrics::counter!("face_search_admission_rejections_total", "reason" => "already_queued")
                .increment(1);
            (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "Already in queue",
                    "message": "You already have an active job in the queue",
                    "existingJobId": job_id,
                    "stage": stage,
                })),
            )
        }
        Err(AdmissionError::RateLimited { retry_after_secs }) => {
            metrics::counter!("face_search_admission_rejections_total", "reason" => "rate_limited")
                .increment(1);
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "Rate limit exceeded",
                    "message": "You can only create a job once per rate-limit window",
                    "retryAfter": retry_after_secs,
                })),
            )
        }
        Err(err) => internal_error("Failed to create job", err),
    }
}

#[derive(Debug, Deserialize)]
pub struct GetJobParams {
    pub id: Option<String>,
}

/// GET /get-job?id= — persistent SSE status stream for one job.
///
/// Emits named events `status`, `result`, `error` and `ping`; the connection
/// closes after `result` or `error`.
pub async fn get_job(
    State(state): State<AppState>,
    Query(params): Query<GetJobParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let Some(job_id) = params.id.filter(|id| !id.is_empty()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            error_body("Invalid request", "Job ID is required"),
        ));
    };

    let events = state
        .streams
        .subscribe_job(job_id)
        .map(|event| Event::default().event(event.name()).json_data(&event));
    Ok(Sse::new(events))
}
