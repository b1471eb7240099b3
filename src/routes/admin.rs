use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::models::job::JobState;
use crate::models::requests::{BulkAction, BulkActionRequest, JobAction, JobActionRequest};
use crate::routes::{error_body, internal_error};
use crate::services::queue::QueueError;

const DEFAULT_JOBS_PER_STATE: isize = 100;
/// Terminal jobs removed per purge call.
const PURGE_BATCH: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueQuery {
    pub include_jobs: Option<bool>,
    pub limit: Option<isize>,
}

/// GET /admin/queue — per-state counts, optionally with recent jobs per state.
pub async fn get_queue(
    State(state): State<AppState>,
    Query(params): Query<QueueQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let counts = state
        .queue
        .counts()
        .await
        .map_err(|err| internal_error("Failed to fetch queue stats", err))?;

    let mut body = json!({ "stats": counts });
    if params.include_jobs.unwrap_or(true) {
        let limit = params.limit.unwrap_or(DEFAULT_JOBS_PER_STATE).max(0);
        let mut jobs = serde_json::Map::new();
        for job_state in JobState::ALL {
            let records = state
                .queue
                .list(job_state, 0, limit)
                .await
                .map_err(|err| internal_error("Failed to fetch queue stats", err))?;
            jobs.insert(job_state.to_string(), json!(records));
        }
        body["jobs"] = Value::Object(jobs);
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteJobQuery {
    pub job_id: Option<String>,
}

/// DELETE /admin/queue?jobId= — remove one job, whatever its state.
pub async fn delete_job(
    State(state): State<AppState>,
    Query(params): Query<DeleteJobQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(job_id) = params.job_id.filter(|id| !id.is_empty()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            error_body("Invalid request", "Job ID is required"),
        ));
    };
    match state.queue.remove(&job_id).await {
        Ok(()) => Ok(Json(json!({ "success": true, "message": "Job deleted" }))),
        Err(QueueError::NotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            error_body("Job not found", &job_id),
        )),
        Err(err) => Err(internal_error("Failed to delete job", err)),
    }
}

/// PATCH /admin/queue — per-job operator action: retry, promote, setPriority.
pub async fn patch_job(
    State(state): State<AppState>,
    Json(request): Json<JobActionRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Err(report) = request.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            error_body("Invalid request", &report.to_string()),
        ));
    }

    let result = match request.action {
        JobAction::Retry => state.queue.retry(&request.job_id).await.map(|_| "Job retried"),
        JobAction::Promote => state
            .queue
            .promote(&request.job_id)
            .await
            .map(|_| "Job promoted"),
        JobAction::SetPriority => {
            let Some(priority) = request.priority else {
                return Err((
                    StatusCode::BAD_REQUEST,
                    error_body("Invalid request", "priority is required for setPriority"),
                ));
            };
            state
                .queue
                .set_priority(&request.job_id, priority)
                .await
                .map(|_| "Priority updated")
        }
    };

    match result {
        Ok(message) => Ok(Json(json!({ "success": true, "message": message }))),
        Err(QueueError::NotFound(job_id)) => Err((
            StatusCode::NOT_FOUND,
            error_body("Job not found", &job_id),
        )),
        Err(err @ QueueError::Conflict { .. }) => Err((
            StatusCode::CONFLICT,
            error_body("Invalid job state", &err.to_string()),
        )),
        Err(err) => Err(internal_error("Failed to update job", err)),
    }
}

/// POST /admin/bulk — bulk retry/purge actions.
///
/// Retrying is isolated per job: one bad retry never aborts the rest.
pub async fn bulk_action(
    State(state): State<AppState>,
    Json(request): Json<BulkActionRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match request.action {
        BulkAction::RetryFailed => {
            let failed = state
                .queue
                .list(JobState::Failed, 0, 0)
                .await
                .map_err(|err| internal_error("Failed to list failed jobs", err))?;
            let mut retried = 0u64;
            let mut errors: Vec<String> = Vec::new();
            for job in &failed {
                match state.queue.retry(&job.id).await {
                    Ok(_) => retried += 1,
                    Err(err) => {
                        tracing::warn!(job_id = %job.id, error = %err, "Bulk retry skipped job");
                        errors.push(job.id.clone());
                    }
                }
            }
            Ok(Json(json!({
                "success": true,
                "message": format!("Retried {retried} failed jobs"),
                "retried": retried,
                "errors": errors,
            })))
        }
        BulkAction::DeleteFailed => {
            let removed = state
                .queue
                .clean(JobState::Failed, 0, PURGE_BATCH)
                .await
                .map_err(|err| internal_error("Failed to purge failed jobs", err))?;
            Ok(Json(json!({
                "success": true,
                "message": "Deleted all failed jobs",
                "removed": removed,
            })))
        }
        BulkAction::DeleteCompleted => {
            let removed = state
                .queue
                .clean(JobState::Completed, 0, PURGE_BATCH)
                .await
                .map_err(|err| internal_error("Failed to purge completed jobs", err))?;
            Ok(Json(json!({
                "success": true,
                "message": "Deleted all completed jobs",
                "removed": removed,
            })))
        }
    }
}

/// POST /admin/clean — purge both terminal states.
pub async fn clean_queue(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let completed = state
        .queue
        .clean(JobState::Completed, 0, PURGE_BATCH)
        .await
        .map_err(|err| internal_error("Failed to clean queue", err))?;
    let failed = state
        .queue
        .clean(JobState::Failed, 0, PURGE_BATCH)
        .await
        .map_err(|err| internal_error("Failed to clean queue", err))?;
    Ok(Json(json!({
        "success": true,
        "message": "Queue cleaned (removed completed and failed jobs)",
        "removed": { "completed": completed, "failed": failed },
    })))
}

/// GET /admin/pause — current pause flag.
pub async fn get_pause(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let is_paused = state
        .queue
        .is_paused()
        .await
        .map_err(|err| internal_error("Failed to check pause status", err))?;
    Ok(Json(json!({ "isPaused": is_paused })))
}

/// POST /admin/pause — pause the queue: workers stop receiving jobs.
pub async fn pause_queue(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .queue
        .pause()
        .await
        .map_err(|err| internal_error("Failed to pause queue", err))?;
    Ok(Json(json!({ "success": true, "message": "Queue paused" })))
}

/// DELETE /admin/pause — resume the queue.
pub async fn resume_queue(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .queue
        .resume()
        .await
        .map_err(|err| internal_error("Failed to resume queue", err))?;
    Ok(Json(json!({ "success": true, "message": "Queue resumed" })))
}
