mod app_state;
mod config;
mod models;
mod routes;
mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use models::job::JobState;
use services::store::CoordinationStore;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing face-search-queue server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("face_search_jobs_total", "Total face-search jobs admitted");
    metrics::describe_counter!(
        "face_search_jobs_completed",
        "Total face-search jobs completed"
    );
    metrics::describe_counter!("face_search_jobs_failed", "Total face-search jobs that failed");
    metrics::describe_counter!(
        "face_search_admission_rejections_total",
        "Admissions rejected by exclusivity or rate limiting"
    );
    metrics::describe_gauge!(
        "face_search_queue_depth",
        "Current number of waiting jobs in the queue"
    );

    // Initialize the coordination store
    tracing::info!("Connecting to Redis coordination store");
    let store =
        CoordinationStore::new(&config.redis_url).expect("Failed to initialize coordination store");

    // Create shared application state
    let state = AppState::new(config.clone(), store);

    spawn_retention_sweep(state.clone());
    spawn_worker_monitor(state.clone());

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        // Client-facing job API
        .route("/create-job", post(routes::jobs::create_job))
        .route("/get-job", get(routes::jobs::get_job))
        // Dashboard live stream
        .route("/stream", get(routes::stream::dashboard_stream))
        // Admin queue API
        .route(
            "/admin/queue",
            get(routes::admin::get_queue)
                .delete(routes::admin::delete_job)
                .patch(routes::admin::patch_job),
        )
        .route("/admin/bulk", post(routes::admin::bulk_action))
        .route("/admin/clean", post(routes::admin::clean_queue))
        .route(
            "/admin/pause",
            get(routes::admin::get_pause)
                .post(routes::admin::pause_queue)
                .delete(routes::admin::resume_queue),
        )
        // Admin worker API
        .route(
            "/admin/workers",
            get(routes::workers::list_workers).delete(routes::workers::remove_worker),
        )
        .route("/admin/workers/pause", post(routes::workers::pause_worker))
        .route("/admin/workers/resume", post(routes::workers::resume_worker))
        .route("/admin/workers/clean", post(routes::workers::clean_workers))
        // Admin excluded-images API
        .route(
            "/admin/excluded-images",
            get(routes::excluded::get_excluded).post(routes::excluded::update_excluded),
        )
        .with_state(state.clone())
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    let bind_addr = state.config.bind_addr.clone();
    tracing::info!("Starting face-search-queue on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

/// Best-effort retention sweep: age out completed/failed jobs, enforce the
/// completed cap and refresh the queue-depth gauge. Store errors skip the
/// cycle, never crash the process.
fn spawn_retention_sweep(state: AppState) {
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(Duration::from_secs(state.config.retention_sweep_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let completed_ms = state.config.completed_retention_secs as i64 * 1000;
        let failed_ms = state.config.failed_retention_secs as i64 * 1000;
        loop {
            tick.tick().await;
            if let Err(err) = state.queue.clean(JobState::Completed, completed_ms, 1000).await {
                tracing::warn!(error = %err, "Retention sweep of completed jobs failed");
            }
            if let Err(err) = state
                .queue
                .enforce_completed_cap(state.config.completed_retention_cap)
                .await
            {
                tracing::warn!(error = %err, "Completed-cap enforcement failed");
            }
            if let Err(err) = state.queue.clean(JobState::Failed, failed_ms, 1000).await {
                tracing::warn!(error = %err, "Retention sweep of failed jobs failed");
            }
            match state.queue.count(JobState::Waiting).await {
                Ok(depth) => metrics::gauge!("face_search_queue_depth").set(depth as f64),
                Err(err) => tracing::warn!(error = %err, "Queue depth read failed"),
            }
        }
    });
}

/// Periodic worker-list refresh notification so dashboard streams re-derive
/// online/offline status even when no worker state changes hands.
fn spawn_worker_monitor(state: AppState) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(state.config.worker_monitor_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(err) = state.store.publish_worker_update().await {
                tracing::warn!(error = %err, "Worker monitor publish failed");
            }
        }
    });
}
