use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::models::requests::WorkerActionRequest;
use crate::routes::{error_body, internal_error};

/// GET /admin/workers — all workers with derived status and pause flag.
pub async fn list_workers(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let workers = state
        .workers
        .list()
        .await
        .map_err(|err| internal_error("Failed to fetch workers", err))?;
    Ok(Json(json!({ "workers": workers })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveWorkerQuery {
    pub worker_id: Option<String>,
}

/// DELETE /admin/workers?workerId= — drop a worker's heartbeat record.
pub async fn remove_worker(
    State(state): State<AppState>,
    Query(params): Query<RemoveWorkerQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(worker_id) = params.worker_id.filter(|id| !id.is_empty()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            error_body("Invalid request", "Worker ID required"),
        ));
    };
    state
        .workers
        .remove(&worker_id)
        .await
        .map_err(|err| internal_error("Failed to remove worker", err))?;
    Ok(Json(json!({ "success": true, "message": "Worker removed" })))
}

/// POST /admin/workers/pause — tell one worker to stop pulling jobs.
pub async fn pause_worker(
    State(state): State<AppState>,
    Json(request): Json<WorkerActionRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Err(report) = request.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            error_body("Invalid request", &report.to_string()),
        ));
    }
    state
        .workers
        .pause(&request.worker_id)
        .await
        .map_err(|err| internal_error("Failed to pause worker", err))?;
    Ok(Json(json!({
        "success": true,
        "workerId": request.worker_id,
        "paused": true,
    })))
}

/// POST /admin/workers/resume — clear a worker's pause flag.
pub async fn resume_worker(
    State(state): State<AppState>,
    Json(request): Json<WorkerActionRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Err(report) = request.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            error_body("Invalid request", &report.to_string()),
        ));
    }
    state
        .workers
        .resume(&request.worker_id)
        .await
        .map_err(|err| internal_error("Failed to resume worker", err))?;
    Ok(Json(json!({
        "success": true,
        "workerId": request.worker_id,
        "paused": false,
    })))
}

/// POST /admin/workers/clean — sweep workers without a recent heartbeat.
pub async fn clean_workers(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let cleaned = state
        .workers
        .clean_stale()
        .await
        .map_err(|err| internal_error("Failed to clean workers", err))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Cleaned {cleaned} stale workers"),
        "cleaned": cleaned,
    })))
}
