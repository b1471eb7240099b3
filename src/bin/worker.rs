//! Reference face-search worker.
//!
//! Plays the external-worker role in the pipeline: registers itself in the
//! worker registry, heartbeats every few seconds, honors its pause flag,
//! pulls jobs from the queue and delegates the actual face matching to a
//! remote inference service over HTTP. The production fleet runs GPU
//! processes speaking this same contract.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use face_search_queue::config::AppConfig;
use face_search_queue::models::job::{FaceMatch, JobRecord};
use face_search_queue::services::exclusions::ExcludedImages;
use face_search_queue::services::queue::JobQueue;
use face_search_queue::services::store::{self, CoordinationStore, WORKERS_KEY};

const HEARTBEAT_INTERVAL_SECS: u64 = 5;
const POLL_INTERVAL_MS: u64 = 1000;

/// Mutable slice of the heartbeat record, shared with the heartbeat task.
#[derive(Debug, Default)]
struct WorkerStats {
    jobs_processed: u64,
    jobs_failed: u64,
    current_job: Option<String>,
}

struct WorkerContext {
    id: String,
    hostname: String,
    start_time: f64,
    config: AppConfig,
    store: Arc<CoordinationStore>,
    queue: JobQueue,
    excluded: ExcludedImages,
    stats: Arc<Mutex<WorkerStats>>,
    inference: InferenceClient,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting face-search worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let inference_url = config
        .inference_url
        .clone()
        .expect("INFERENCE_URL is required for the worker");

    let store = Arc::new(
        CoordinationStore::new(&config.redis_url)
            .expect("Failed to initialize coordination store"),
    );
    let queue = JobQueue::new(Arc::clone(&store));
    let excluded = ExcludedImages::new(Arc::clone(&store));

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let device = if config.use_cpu {
        "cpu".to_string()
    } else {
        format!("gpu{}", config.gpu_index)
    };
    let worker_id = format!("{}_{}_{}", hostname, device, std::process::id());

    let ctx = Arc::new(WorkerContext {
        id: worker_id.clone(),
        hostname,
        start_time: Utc::now().timestamp_millis() as f64 / 1000.0,
        config,
        store,
        queue,
        excluded,
        stats: Arc::new(Mutex::new(WorkerStats::default())),
        inference: InferenceClient::new(inference_url),
    });

    // Register immediately so the dashboard sees the worker before its first job.
    if let Err(err) = write_heartbeat(&ctx).await {
        tracing::error!(error = %err, "Initial worker registration failed");
    }
    spawn_heartbeat(Arc::clone(&ctx));

    tracing::info!(worker_id = %worker_id, "Worker ready, starting job processing loop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(worker_id = %ctx.id, "Shutting down, deregistering worker");
                if let Err(err) = deregister(&ctx).await {
                    tracing::warn!(error = %err, "Failed to deregister worker");
                }
                return;
            }
            result = process_next_job(&ctx) => {
                match result {
                    Ok(true) => {
                        tracing::debug!("Job processed, checking for next job");
                    }
                    Ok(false) => {
                        tracing::trace!("No jobs available, sleeping");
                        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "Error processing job, will retry");
                        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                    }
                }
            }
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
async fn process_next_job(ctx: &Arc<WorkerContext>) -> Result<bool, Box<dyn std::error::Error>> {
    // A paused worker keeps heartbeating but pulls nothing.
    if is_paused(ctx).await? {
        tracing::trace!(worker_id = %ctx.id, "Worker paused, not pulling jobs");
        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        return Ok(false);
    }

    let job = match ctx.queue.dequeue().await? {
        Some(job) => job,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = %job.id,
        uid = %job.data.uid,
        stage = %job.data.stage,
        "Processing face-search job"
    );
    {
        let mut stats = ctx.stats.lock().await;
        stats.current_job = Some(job.id.clone());
    }

    let outcome = search_faces(ctx, &job).await;
    let mut stats = ctx.stats.lock().await;
    stats.current_job = None;

    match outcome {
        Ok(matches) => {
            let count = matches.len();
            ctx.queue.complete(&job.id, matches).await?;
            stats.jobs_processed += 1;
            metrics::counter!("face_search_jobs_completed").increment(1);
            tracing::info!(job_id = %job.id, matches = count, "Job completed successfully");
        }
        Err(err) => {
            // Failures are terminal by default; an operator retries explicitly.
            ctx.queue.fail(&job.id, &err.to_string()).await?;
            stats.jobs_failed += 1;
            metrics::counter!("face_search_jobs_failed").increment(1);
            tracing::error!(job_id = %job.id, error = %err, "Job processing failed");
        }
    }

    Ok(true)
}

async fn search_faces(
    ctx: &Arc<WorkerContext>,
    job: &JobRecord,
) -> Result<Vec<FaceMatch>, Box<dyn std::error::Error>> {
    let excluded = ctx.excluded.all().await?;
    let start = std::time::Instant::now();
    let matches = ctx
        .inference
        .search(&job.data.image, &job.data.stage, &excluded)
        .await?;
    tracing::info!(
        job_id = %job.id,
        inference_ms = start.elapsed().as_millis(),
        matches = matches.len(),
        "Inference complete"
    );
    Ok(matches)
}

async fn is_paused(ctx: &Arc<WorkerContext>) -> Result<bool, Box<dyn std::error::Error>> {
    let mut conn = ctx.store.connection().await?;
    let flag: Option<String> = conn.get(store::worker_paused_key(&ctx.id)).await?;
    Ok(flag.as_deref() == Some("1"))
}

fn spawn_heartbeat(ctx: Arc<WorkerContext>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(err) = write_heartbeat(&ctx).await {
                tracing::warn!(error = %err, "Heartbeat write failed");
            }
        }
    });
}

/// Heartbeat shape matching what the GPU fleet reports; the registry parses
/// it tolerantly so the two can evolve independently.
#[derive(Debug, Serialize, Deserialize)]
struct HeartbeatRecord {
    id: String,
    hostname: String,
    gpu_index: Option<u32>,
    gpu_name: Option<String>,
    use_cpu: bool,
    concurrency: u32,
    start_time: f64,
    uptime: f64,
    last_heartbeat: f64,
    jobs_processed: u64,
    jobs_failed: u64,
    current_job: Option<String>,
}

async fn write_heartbeat(ctx: &Arc<WorkerContext>) -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
    let stats = ctx.stats.lock().await;
    let record = HeartbeatRecord {
        id: ctx.id.clone(),
        hostname: ctx.hostname.clone(),
        gpu_index: (!ctx.config.use_cpu).then_some(ctx.config.gpu_index),
        gpu_name: None,
        use_cpu: ctx.config.use_cpu,
        concurrency: ctx.config.worker_concurrency,
        start_time: ctx.start_time,
        uptime: now - ctx.start_time,
        last_heartbeat: now,
        jobs_processed: stats.jobs_processed,
        jobs_failed: stats.jobs_failed,
        current_job: stats.current_job.clone(),
    };
    drop(stats);

    let payload = serde_json::to_string(&record)?;
    let mut conn = ctx.store.connection().await?;
    conn.hset::<_, _, _, ()>(WORKERS_KEY, &ctx.id, payload).await?;
    Ok(())
}

async fn deregister(ctx: &Arc<WorkerContext>) -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ctx.store.connection().await?;
    redis::pipe()
        .hdel(WORKERS_KEY, &ctx.id)
        .ignore()
        .del(store::worker_paused_key(&ctx.id))
        .ignore()
        .query_async::<()>(&mut conn)
        .await?;
    ctx.store.publish_worker_update().await?;
    Ok(())
}

/// HTTP client for the external face-search inference service.
struct InferenceClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    image: &'a str,
    stage: &'a str,
    excluded: &'a [String],
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    matches: Vec<FaceMatch>,
}

impl InferenceClient {
    fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    async fn search(
        &self,
        image: &str,
        stage: &str,
        excluded: &[String],
    ) -> Result<Vec<FaceMatch>, Box<dyn std::error::Error>> {
        let response = self
            .client
            .post(&self.url)
            .json(&InferenceRequest {
                image,
                stage,
                excluded,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<InferenceResponse>()
            .await?;
        Ok(response.matches)
    }
}
