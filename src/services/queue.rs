use std::sync::Arc;

use chrono::Utc;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::models::event::JobNotification;
use crate::models::job::{FaceMatch, JobData, JobRecord, JobState};
use crate::services::store::{
    self, CoordinationStore, StoreError, ACTIVE_KEY, COMPLETED_KEY, DELAYED_KEY, FAILED_KEY,
    PAUSED_KEY, SEQ_KEY, WAITING_KEY,
};

/// Waiting order is `(priority ascending, insertion sequence ascending)`,
/// packed into one sorted-set score. Priorities get a band wide enough that
/// the insertion counter never crosses into the next one.
const PRIORITY_BAND: f64 = 1e12;
/// Promoted jobs score below every priority band; the most recently promoted
/// job drains first.
const PROMOTED_BASE: f64 = -1e15;
/// Priorities are clamped to this magnitude. Beyond it the packed score
/// leaves f64's exact-integer range and the seq tie-break stops resolving.
const PRIORITY_LIMIT: i32 = 1_000;

fn waiting_score(priority: i32, seq: i64) -> f64 {
    let priority = priority.clamp(-PRIORITY_LIMIT, PRIORITY_LIMIT);
    priority as f64 * PRIORITY_BAND + seq as f64
}

fn promoted_score(seq: i64) -> f64 {
    PROMOTED_BASE - seq as f64
}

fn state_key(state: JobState) -> &'static str {
    match state {
        JobState::Waiting => WAITING_KEY,
        JobState::Active => ACTIVE_KEY,
        JobState::Delayed => DELAYED_KEY,
        JobState::Completed => COMPLETED_KEY,
        JobState::Failed => FAILED_KEY,
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Per-state job counts for the dashboard.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Durable FIFO/priority job queue over the coordination store.
///
/// Job records live at `face_search:job:{id}`; membership in a state is a
/// sorted set per state. Waiting is scored for drain order, terminal sets are
/// scored by finish time so retention can sweep by age.
pub struct JobQueue {
    store: Arc<CoordinationStore>,
}

impl JobQueue {
    pub fn new(store: Arc<CoordinationStore>) -> Self {
        Self { store }
    }

    /// Admit a new job into `waiting` and return its record.
    ///
    /// Ids are `job_{millis}_{suffix}` so bursts cannot collide.
    pub async fn add(&self, data: JobData) -> Result<JobRecord, QueueError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("job_{}_{}", now_ms(), &suffix[..9]);
        let record = JobRecord::new(id, data);
        self.insert_waiting(&record, None).await?;
        self.store.publish_queue_update().await?;
        Ok(record)
    }

    async fn insert_waiting(
        &self,
        record: &JobRecord,
        score_override: Option<f64>,
    ) -> Result<(), QueueError> {
        let mut conn = self.store.connection().await?;
        let seq: i64 = conn.incr(SEQ_KEY, 1).await?;
        let score = score_override.unwrap_or_else(|| waiting_score(record.priority, seq));
        let payload = serde_json::to_string(record)?;
        redis::pipe()
            .set(store::job_key(&record.id), payload)
            .ignore()
            .zadd(WAITING_KEY, &record.id, score)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.store.connection().await?;
        let payload: Option<String> = conn.get(store::job_key(job_id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &JobRecord) -> Result<(), QueueError> {
        let mut conn = self.store.connection().await?;
        let payload = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(store::job_key(&record.id), payload).await?;
        Ok(())
    }

    /// Atomically move the head of `waiting` to `active`, stamping
    /// `processed_at`. Yields nothing while the queue is paused.
    ///
    /// Called by external workers pulling work, not by the control plane.
    pub async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError> {
        if self.is_paused().await? {
            return Ok(None);
        }
        let mut conn = self.store.connection().await?;
        loop {
            let popped: Vec<(String, f64)> = conn.zpopmin(WAITING_KEY, 1).await?;
            let Some((job_id, _score)) = popped.into_iter().next() else {
                return Ok(None);
            };
            // A job removed by an admin can leave a dangling member; skip it.
            let Some(mut record) = self.get(&job_id).await? else {
                continue;
            };
            record.state = JobState::Active;
            record.processed_at = Some(now_ms());
            let payload = serde_json::to_string(&record)?;
            redis::pipe()
                .set(store::job_key(&job_id), payload)
                .ignore()
                .zadd(ACTIVE_KEY, &job_id, record.processed_at.unwrap_or_default() as f64)
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;
            self.store.publish_queue_update().await?;
            return Ok(Some(record));
        }
    }

    /// Worker-invoked terminal transition `active -> completed`.
    pub async fn complete(
        &self,
        job_id: &str,
        matches: Vec<FaceMatch>,
    ) -> Result<JobRecord, QueueError> {
        let record = self
            .finish(job_id, JobState::Completed, Some(matches), None)
            .await?;
        self.store
            .publish_job_event(&JobNotification::Completed {
                job_id: job_id.to_string(),
            })
            .await?;
        Ok(record)
    }

    /// Worker-invoked terminal transition `active -> failed`.
    pub async fn fail(&self, job_id: &str, reason: &str) -> Result<JobRecord, QueueError> {
        let record = self
            .finish(job_id, JobState::Failed, None, Some(reason.to_string()))
            .await?;
        self.store
            .publish_job_event(&JobNotification::Failed {
                job_id: job_id.to_string(),
            })
            .await?;
        Ok(record)
    }

    async fn finish(
        &self,
        job_id: &str,
        terminal: JobState,
        return_value: Option<Vec<FaceMatch>>,
        failed_reason: Option<String>,
    ) -> Result<JobRecord, QueueError> {
        let mut record = self
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        if record.state != JobState::Active {
            return Err(QueueError::Conflict {
                job_id: job_id.to_string(),
                state: record.state,
                action: if terminal == JobState::Completed {
                    "complete"
                } else {
                    "fail"
                },
            });
        }
        record.state = terminal;
        record.finished_at = Some(now_ms());
        record.return_value = return_value;
        record.failed_reason = failed_reason;

        let mut conn = self.store.connection().await?;
        let payload = serde_json::to_string(&record)?;
        redis::pipe()
            .set(store::job_key(job_id), payload)
            .ignore()
            .zrem(ACTIVE_KEY, job_id)
            .ignore()
            .zadd(
                state_key(terminal),
                job_id,
                record.finished_at.unwrap_or_default() as f64,
            )
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        self.store.publish_queue_update().await?;
        Ok(record)
    }

    /// Operator retry: `failed -> waiting`, preserving the original payload.
    pub async fn retry(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        let mut record = self
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        if record.state != JobState::Failed {
            return Err(QueueError::Conflict {
                job_id: job_id.to_string(),
                state: record.state,
                action: "retry",
            });
        }
        record.state = JobState::Waiting;
        record.attempts_made += 1;
        record.processed_at = None;
        record.finished_at = None;
        record.failed_reason = None;
        record.return_value = None;

        let mut conn = self.store.connection().await?;
        conn.zrem::<_, _, ()>(FAILED_KEY, job_id).await?;
        self.insert_waiting(&record, None).await?;
        self.store.publish_queue_update().await?;
        Ok(record)
    }

    /// Operator override: move a waiting job to the front regardless of priority.
    pub async fn promote(&self, job_id: &str) -> Result<(), QueueError> {
        let record = self
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        if record.state != JobState::Waiting {
            return Err(QueueError::Conflict {
                job_id: job_id.to_string(),
                state: record.state,
                action: "promote",
            });
        }
        let mut conn = self.store.connection().await?;
        let seq: i64 = conn.incr(SEQ_KEY, 1).await?;
        conn.zadd::<_, _, _, ()>(WAITING_KEY, job_id, promoted_score(seq))
            .await?;
        self.store.publish_queue_update().await?;
        Ok(())
    }

    /// Update the ordering key of a waiting job. The job re-enters its new
    /// priority band at the current insertion sequence. Priorities beyond
    /// +/-1000 order as if clamped to that range.
    pub async fn set_priority(&self, job_id: &str, priority: i32) -> Result<(), QueueError> {
        let mut record = self
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        if record.state != JobState::Waiting {
            return Err(QueueError::Conflict {
                job_id: job_id.to_string(),
                state: record.state,
                action: "setPriority",
            });
        }
        record.priority = priority;
        let mut conn = self.store.connection().await?;
        let seq: i64 = conn.incr(SEQ_KEY, 1).await?;
        let payload = serde_json::to_string(&record)?;
        redis::pipe()
            .set(store::job_key(job_id), payload)
            .ignore()
            .zadd(WAITING_KEY, job_id, waiting_score(priority, seq))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        self.store.publish_queue_update().await?;
        Ok(())
    }

    /// Delete a job record entirely, whatever its state. Removing an unknown
    /// id reports `NotFound` so bulk loops can carry on.
    pub async fn remove(&self, job_id: &str) -> Result<(), QueueError> {
        let record = self.get(job_id).await?;
        if record.is_none() {
            return Err(QueueError::NotFound(job_id.to_string()));
        }
        let mut conn = self.store.connection().await?;
        let mut pipe = redis::pipe();
        pipe.del(store::job_key(job_id)).ignore();
        for state in JobState::ALL {
            pipe.zrem(state_key(state), job_id).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        self.store.publish_queue_update().await?;
        Ok(())
    }

    /// Snapshot listing of jobs in one state. Waiting lists in drain order,
    /// terminal states in finish order.
    pub async fn list(
        &self,
        state: JobState,
        offset: isize,
        limit: isize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        let mut conn = self.store.connection().await?;
        let stop = if limit <= 0 { -1 } else { offset + limit - 1 };
        let ids: Vec<String> = conn.zrange(state_key(state), offset, stop).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.get(store::job_key(id));
        }
        let payloads: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        let mut records = Vec::with_capacity(ids.len());
        for payload in payloads.into_iter().flatten() {
            records.push(serde_json::from_str(&payload)?);
        }
        Ok(records)
    }

    pub async fn count(&self, state: JobState) -> Result<u64, QueueError> {
        let mut conn = self.store.connection().await?;
        Ok(conn.zcard(state_key(state)).await?)
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut conn = self.store.connection().await?;
        let (waiting, active, completed, failed, delayed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .zcard(WAITING_KEY)
                .zcard(ACTIVE_KEY)
                .zcard(COMPLETED_KEY)
                .zcard(FAILED_KEY)
                .zcard(DELAYED_KEY)
                .query_async(&mut conn)
                .await?;
        Ok(QueueCounts {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    /// 1-based position of a job within `waiting`, if it is still waiting.
    pub async fn position(&self, job_id: &str) -> Result<Option<u64>, QueueError> {
        let mut conn = self.store.connection().await?;
        let rank: Option<u64> = conn.zrank(WAITING_KEY, job_id).await?;
        Ok(rank.map(|r| r + 1))
    }

    /// Global pause flag: while set, `dequeue` yields nothing to workers.
    /// Insertion and reads are unaffected.
    pub async fn pause(&self) -> Result<(), QueueError> {
        let mut conn = self.store.connection().await?;
        conn.set::<_, _, ()>(PAUSED_KEY, "1").await?;
        self.store.publish_pause_update(true).await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), QueueError> {
        let mut conn = self.store.connection().await?;
        conn.del::<_, ()>(PAUSED_KEY).await?;
        self.store.publish_pause_update(false).await?;
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool, QueueError> {
        let mut conn = self.store.connection().await?;
        Ok(conn.exists(PAUSED_KEY).await?)
    }

    /// Remove terminal jobs older than `older_than_ms`, up to `limit` per call.
    /// Returns the number of jobs removed.
    pub async fn clean(
        &self,
        state: JobState,
        older_than_ms: i64,
        limit: usize,
    ) -> Result<u64, QueueError> {
        if !state.is_terminal() {
            return Err(QueueError::Conflict {
                job_id: String::new(),
                state,
                action: "clean",
            });
        }
        let cutoff = (now_ms() - older_than_ms) as f64;
        let mut conn = self.store.connection().await?;
        let ids: Vec<String> = conn
            .zrangebyscore_limit(state_key(state), f64::NEG_INFINITY, cutoff, 0, limit as isize)
            .await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.del(store::job_key(id)).ignore();
            pipe.zrem(state_key(state), id).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        self.store.publish_queue_update().await?;
        Ok(ids.len() as u64)
    }

    /// Drop the oldest completed jobs beyond the retention cap.
    pub async fn enforce_completed_cap(&self, cap: u64) -> Result<u64, QueueError> {
        let mut conn = self.store.connection().await?;
        let total: u64 = conn.zcard(COMPLETED_KEY).await?;
        if total <= cap {
            return Ok(0);
        }
        let excess = (total - cap) as isize;
        let ids: Vec<String> = conn.zrange(COMPLETED_KEY, 0, excess - 1).await?;
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.del(store::job_key(id)).ignore();
            pipe.zrem(COMPLETED_KEY, id).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        self.store.publish_queue_update().await?;
        Ok(ids.len() as u64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} job {job_id} in state {state}")]
    Conflict {
        job_id: String,
        state: JobState,
        action: &'static str,
    },
}
