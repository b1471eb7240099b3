use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::models::event::{
    ChangeNotification, DashboardEvent, JobError, JobEvent, JobNotification, JobResult, JobStatus,
};
use crate::models::job::{JobRecord, JobState};
use crate::services::admission::AdmissionController;
use crate::services::queue::JobQueue;
use crate::services::store::{CoordinationStore, JOB_EVENTS_CHANNEL, QUEUE_UPDATES_CHANNEL};
use crate::services::workers::WorkerRegistry;

/// Give up on a stream after this many consecutive store failures; until then
/// a failed poll is logged and retried next cycle.
const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 5;

/// Jobs listed per state in dashboard snapshots.
const SNAPSHOT_JOBS_PER_STATE: isize = 50;

/// A live event stream backed by a spawned task.
///
/// Dropping the subscription (the transport hanging up) aborts the task, so
/// all timers stop and no further store reads happen for that connection.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Deduplication signature for per-job status events: a new `status` event is
/// emitted only when this changes.
#[derive(Debug, Clone, PartialEq)]
struct StatusSignature {
    position: Option<u64>,
    total_size: Option<u64>,
    state: JobState,
    stage: String,
}

/// Maintains one push channel per subscriber, per job or per aggregate view.
/// Emits state-change events with strict dedup and periodic keepalives.
pub struct StreamGateway {
    store: Arc<CoordinationStore>,
    queue: Arc<JobQueue>,
    workers: Arc<WorkerRegistry>,
    admission: Arc<AdmissionController>,
    poll_interval: Duration,
    keepalive: Duration,
}

impl StreamGateway {
    pub fn new(
        store: Arc<CoordinationStore>,
        queue: Arc<JobQueue>,
        workers: Arc<WorkerRegistry>,
        admission: Arc<AdmissionController>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            queue,
            workers,
            admission,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            keepalive: Duration::from_millis(config.keepalive_ms),
        }
    }

    /// Live status stream for one job. Emits `status` on change, `ping` on
    /// the keepalive cadence, then exactly one `result` or `error` and ends.
    pub fn subscribe_job(&self, job_id: String) -> Subscription<JobEvent> {
        let (tx, rx) = mpsc::channel(32);
        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        let admission = Arc::clone(&self.admission);
        let poll_interval = self.poll_interval;
        let keepalive = self.keepalive;
        let task = tokio::spawn(async move {
            run_job_stream(store, queue, admission, job_id, tx, poll_interval, keepalive).await;
        });
        Subscription { rx, task }
    }

    /// Aggregate stream for the operator dashboard: one full snapshot, then a
    /// re-fetched snapshot on every change notification.
    pub fn subscribe_dashboard(&self) -> Subscription<DashboardEvent> {
        let (tx, rx) = mpsc::channel(32);
        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        let workers = Arc::clone(&self.workers);
        let keepalive = self.keepalive;
        let task = tokio::spawn(async move {
            run_dashboard_stream(store, queue, workers, tx, keepalive).await;
        });
        Subscription { rx, task }
    }
}

fn terminal_event(record: &JobRecord) -> JobEvent {
    let finish_time = record.finished_at.unwrap_or_else(|| Utc::now().timestamp_millis());
    match record.state {
        JobState::Completed => JobEvent::Result(JobResult {
            result: record.return_value.clone().unwrap_or_default(),
            start_time: record.data.timestamp,
            finish_time,
            stage: record.data.stage.clone(),
        }),
        _ => JobEvent::Error(JobError {
            error: record
                .failed_reason
                .clone()
                .unwrap_or_else(|| "Job processing failed".to_string()),
            start_time: record.data.timestamp,
            finish_time,
            stage: record.data.stage.clone(),
        }),
    }
}

fn missing_job_event(message: &str) -> JobEvent {
    let now = Utc::now().timestamp_millis();
    JobEvent::Error(JobError {
        error: message.to_string(),
        start_time: now,
        finish_time: now,
        stage: "unknown".to_string(),
    })
}

async fn run_job_stream(
    store: Arc<CoordinationStore>,
    queue: Arc<JobQueue>,
    admission: Arc<AdmissionController>,
    job_id: String,
    tx: mpsc::Sender<JobEvent>,
    poll_interval: Duration,
    keepalive: Duration,
) {
    // Resolve current state before any live tracking: terminal jobs get their
    // single final event and the stream closes immediately.
    let initial = match queue.get(&job_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            let _ = tx.send(missing_job_event("Job not found")).await;
            return;
        }
        Err(err) => {
            tracing::error!(job_id = %job_id, error = %err, "Failed to resolve job for stream");
            let _ = tx.send(missing_job_event("Internal server error")).await;
            return;
        }
    };
    if initial.is_terminal() {
        let _ = tx.send(terminal_event(&initial)).await;
        if let Err(err) = admission.clear_active_job(&initial.data.uid).await {
            tracing::warn!(uid = %initial.data.uid, error = %err, "Failed to clear active-job pointer");
        }
        return;
    }

    // Terminal transitions also arrive out-of-band so subscribers do not wait
    // out a full poll cycle.
    let mut job_events: BoxStream<'static, redis::Msg> =
        match store.subscriber(JOB_EVENTS_CHANNEL).await {
            Ok(pubsub) => pubsub.into_on_message().boxed(),
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Job-event subscription unavailable, falling back to polling");
                futures::stream::pending().boxed()
            }
        };

    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + keepalive,
        keepalive,
    );

    let mut last_signature: Option<StatusSignature> = None;
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            _ = poll.tick() => {
                match poll_job(&queue, &job_id).await {
                    Ok(PollOutcome::Status(record, status)) => {
                        consecutive_errors = 0;
                        let signature = StatusSignature {
                            position: status.position,
                            total_size: status.total_size,
                            state: record.state,
                            stage: record.data.stage.clone(),
                        };
                        if last_signature.as_ref() != Some(&signature) {
                            last_signature = Some(signature);
                            if tx.send(JobEvent::Status(status)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(PollOutcome::Terminal(record)) => {
                        let _ = tx.send(terminal_event(&record)).await;
                        if let Err(err) = admission.clear_active_job(&record.data.uid).await {
                            tracing::warn!(uid = %record.data.uid, error = %err, "Failed to clear active-job pointer");
                        }
                        return;
                    }
                    Ok(PollOutcome::Gone) => {
                        let _ = tx.send(missing_job_event("Job no longer exists")).await;
                        return;
                    }
                    Err(err) => {
                        consecutive_errors += 1;
                        tracing::error!(job_id = %job_id, error = %err, attempt = consecutive_errors, "Status poll failed");
                        if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                            let _ = tx.send(missing_job_event("Status updates unavailable")).await;
                            return;
                        }
                    }
                }
            }
            _ = ping.tick() => {
                if tx.send(JobEvent::Ping {}).await.is_err() {
                    return;
                }
            }
            msg = job_events.next() => {
                let Some(msg) = msg else { continue };
                let Ok(payload) = msg.get_payload::<String>() else { continue };
                let Ok(notification) = serde_json::from_str::<JobNotification>(&payload) else {
                    continue;
                };
                if notification.job_id() != job_id {
                    continue;
                }
                match queue.get(&job_id).await {
                    Ok(Some(record)) if record.is_terminal() => {
                        let _ = tx.send(terminal_event(&record)).await;
                        if let Err(err) = admission.clear_active_job(&record.data.uid).await {
                            tracing::warn!(uid = %record.data.uid, error = %err, "Failed to clear active-job pointer");
                        }
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(job_id = %job_id, error = %err, "Failed to resolve job after terminal notification");
                    }
                }
            }
        }
    }
}

enum PollOutcome {
    Status(JobRecord, JobStatus),
    Terminal(JobRecord),
    Gone,
}

async fn poll_job(queue: &JobQueue, job_id: &str) -> Result<PollOutcome, crate::services::queue::QueueError> {
    let Some(record) = queue.get(job_id).await? else {
        return Ok(PollOutcome::Gone);
    };
    if record.is_terminal() {
        return Ok(PollOutcome::Terminal(record));
    }
    let waiting = queue.count(JobState::Waiting).await?;
    let position = queue.position(job_id).await?;
    let status = JobStatus {
        // An active job is being worked right now: report the head slot.
        position: Some(position.unwrap_or(1)),
        total_size: Some(waiting + 1),
        start_time: record.data.timestamp,
        stage: record.data.stage.clone(),
    };
    Ok(PollOutcome::Status(record, status))
}

async fn queue_snapshot(
    queue: &JobQueue,
) -> Result<serde_json::Map<String, serde_json::Value>, crate::services::queue::QueueError> {
    let counts = queue.counts().await?;
    let mut jobs = serde_json::Map::new();
    for state in JobState::ALL {
        let records = queue.list(state, 0, SNAPSHOT_JOBS_PER_STATE).await?;
        jobs.insert(state.to_string(), serde_json::to_value(records)?);
    }
    let mut snapshot = serde_json::Map::new();
    snapshot.insert("stats".to_string(), serde_json::to_value(counts)?);
    snapshot.insert("jobs".to_string(), serde_json::Value::Object(jobs));
    Ok(snapshot)
}

async fn run_dashboard_stream(
    store: Arc<CoordinationStore>,
    queue: Arc<JobQueue>,
    workers: Arc<WorkerRegistry>,
    tx: mpsc::Sender<DashboardEvent>,
    keepalive: Duration,
) {
    // Full initial snapshot: counts, recent jobs per state, workers, pause flag.
    match initial_snapshot(&queue, &workers).await {
        Ok(payload) => {
            if tx.send(DashboardEvent::Initial(payload)).await.is_err() {
                return;
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to build initial dashboard snapshot");
        }
    }

    let mut updates: BoxStream<'static, redis::Msg> =
        match store.subscriber(QUEUE_UPDATES_CHANNEL).await {
            Ok(pubsub) => pubsub.into_on_message().boxed(),
            Err(err) => {
                tracing::error!(error = %err, "Dashboard update subscription unavailable");
                futures::stream::pending().boxed()
            }
        };

    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + keepalive,
        keepalive,
    );

    loop {
        tokio::select! {
            _ = ping.tick() => {
                let payload = serde_json::json!({ "timestamp": Utc::now().timestamp_millis() });
                if tx.send(DashboardEvent::Ping(payload)).await.is_err() {
                    return;
                }
            }
            msg = updates.next() => {
                let Some(msg) = msg else { continue };
                let Ok(payload) = msg.get_payload::<String>() else { continue };
                let Ok(notification) = serde_json::from_str::<ChangeNotification>(&payload) else {
                    continue;
                };
                // No diffing: every notification triggers a full re-fetch.
                // Admin concurrency is low enough that this stays cheap.
                let event = match notification {
                    ChangeNotification::Queue => match queue_snapshot(&queue).await {
                        Ok(payload) => DashboardEvent::QueueUpdate(serde_json::Value::Object(payload)),
                        Err(err) => {
                            tracing::error!(error = %err, "Failed to refresh queue snapshot");
                            continue;
                        }
                    },
                    ChangeNotification::Workers => match workers.list().await {
                        Ok(list) => DashboardEvent::WorkersUpdate(
                            serde_json::json!({ "workers": list }),
                        ),
                        Err(err) => {
                            tracing::error!(error = %err, "Failed to refresh worker snapshot");
                            continue;
                        }
                    },
                    ChangeNotification::Pause { is_paused } => DashboardEvent::PauseUpdate(
                        serde_json::json!({ "isPaused": is_paused }),
                    ),
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn initial_snapshot(
    queue: &JobQueue,
    workers: &WorkerRegistry,
) -> Result<serde_json::Value, crate::services::queue::QueueError> {
    let mut snapshot = queue_snapshot(queue).await?;
    let is_paused = queue.is_paused().await?;
    let worker_list = workers.list().await?;
    snapshot.insert("isPaused".to_string(), serde_json::json!(is_paused));
    snapshot.insert("workers".to_string(), serde_json::to_value(worker_list)?);
    Ok(serde_json::Value::Object(snapshot))
}
