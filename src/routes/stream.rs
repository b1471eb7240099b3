use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::StreamExt;

use crate::app_state::AppState;

/// GET /stream — persistent SSE feed for the operator dashboard.
///
/// Emits `{type: initial|queue-update|workers-update|pause-update|ping,
/// payload}` messages; every queue/worker/pause change triggers a fresh
/// snapshot push.
pub async fn dashboard_stream(State(state): State<AppState>) -> impl IntoResponse {
    let events = state
        .streams
        .subscribe_dashboard()
        .map(|event| Event::default().json_data(&event));
    Sse::new(events)
}
