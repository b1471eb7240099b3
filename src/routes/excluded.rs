use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::models::requests::{ExcludedAction, ExcludedImagesRequest};
use crate::routes::internal_error;

/// GET /admin/excluded-images — current exclusion set.
pub async fn get_excluded(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let excluded = state
        .excluded
        .all()
        .await
        .map_err(|err| internal_error("Failed to get excluded images", err))?;
    Ok(Json(json!({ "excluded": excluded })))
}

/// POST /admin/excluded-images — add/remove/clear exclusions.
pub async fn update_excluded(
    State(state): State<AppState>,
    Json(request): Json<ExcludedImagesRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let result = match request.action {
        ExcludedAction::Add => state.excluded.add(&request.image_ids).await,
        ExcludedAction::Remove => state.excluded.remove(&request.image_ids).await,
        ExcludedAction::Clear => state.excluded.clear().await,
    };
    result.map_err(|err| internal_error("Failed to update excluded images", err))?;

    let excluded = state
        .excluded
        .all()
        .await
        .map_err(|err| internal_error("Failed to get excluded images", err))?;
    Ok(Json(json!({
        "success": true,
        "count": excluded.len(),
        "excluded": excluded,
    })))
}
