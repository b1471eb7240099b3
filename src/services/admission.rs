use std::sync::Arc;

use chrono::Utc;
use redis::AsyncCommands;

use crate::config::AppConfig;
use crate::models::job::{ActiveJobPointer, JobData, JobRecord};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::store::{self, CoordinationStore, StoreError};

/// Expected, user-facing rejections. These are not failures and are never
/// logged as such.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("User already has job {job_id} in the queue")]
    AlreadyQueued { job_id: String, stage: String },

    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Enforces per-user rate limiting and single-active-job exclusivity in front
/// of the queue.
///
/// The exclusivity gate is an atomic set-if-absent on the active-job pointer
/// key; the read-side pre-check only exists to give callers the id of the job
/// they are already running and to clear stale pointers. Two near-simultaneous
/// admissions for one user therefore cannot both pass.
pub struct AdmissionController {
    store: Arc<CoordinationStore>,
    queue: Arc<JobQueue>,
    rate_limit_window_secs: u64,
    active_job_ttl_secs: u64,
}

impl AdmissionController {
    pub fn new(store: Arc<CoordinationStore>, queue: Arc<JobQueue>, config: &AppConfig) -> Self {
        Self {
            store,
            queue,
            rate_limit_window_secs: config.rate_limit_window_secs,
            active_job_ttl_secs: config.active_job_ttl_secs,
        }
    }

    /// Admit a face-search job for `uid`, or reject with `AlreadyQueued` /
    /// `RateLimited`. Rejections leave no new state behind.
    pub async fn admit(
        &self,
        uid: &str,
        image: String,
        stage: String,
    ) -> Result<JobRecord, AdmissionError> {
        if let Some(pointer) = self.existing_job(uid).await? {
            return Err(AdmissionError::AlreadyQueued {
                job_id: pointer.job_id,
                stage: pointer.stage,
            });
        }

        if let Some(retry_after_secs) = self.rate_limited(uid).await? {
            return Err(AdmissionError::RateLimited { retry_after_secs });
        }

        let timestamp = Utc::now().timestamp_millis();
        let data = JobData {
            image,
            uid: uid.to_string(),
            stage: stage.clone(),
            timestamp,
        };

        // The pointer is written before the enqueue and acts as the gate:
        // losing the set-if-absent means another admission won the race.
        let placeholder = ActiveJobPointer {
            job_id: String::new(),
            stage: stage.clone(),
        };
        if !self.try_claim(uid, &placeholder).await? {
            let pointer = self.read_pointer(uid).await?;
            return Err(match pointer {
                Some(p) => AdmissionError::AlreadyQueued {
                    job_id: p.job_id,
                    stage: p.stage,
                },
                None => AdmissionError::AlreadyQueued {
                    job_id: String::new(),
                    stage,
                },
            });
        }

        let record = match self.queue.add(data).await {
            Ok(record) => record,
            Err(err) => {
                // Roll the gate back so the user is not locked out by a
                // failed enqueue.
                self.clear_active_job(uid).await.ok();
                return Err(err.into());
            }
        };

        let pointer = ActiveJobPointer {
            job_id: record.id.clone(),
            stage,
        };
        self.write_pointer(uid, &pointer).await?;
        self.write_rate_limit(uid, timestamp).await?;

        Ok(record)
    }

    /// Resolve the user's active-job pointer, clearing it when it references a
    /// job that is already terminal or gone.
    async fn existing_job(&self, uid: &str) -> Result<Option<ActiveJobPointer>, AdmissionError> {
        let Some(pointer) = self.read_pointer(uid).await? else {
            return Ok(None);
        };
        // A pointer claimed mid-admission carries no job id yet; treat it as
        // an in-flight admission.
        if pointer.job_id.is_empty() {
            return Ok(Some(pointer));
        }
        match self.queue.get(&pointer.job_id).await? {
            Some(job) if !job.is_terminal() => Ok(Some(pointer)),
            _ => {
                self.clear_active_job(uid).await?;
                Ok(None)
            }
        }
    }

    /// Seconds the caller must wait, if a rate-limit record is still live.
    async fn rate_limited(&self, uid: &str) -> Result<Option<u64>, AdmissionError> {
        let mut conn = self.store.connection().await?;
        let last_admission: Option<i64> = conn
            .get(store::rate_limit_key(uid))
            .await
            .map_err(StoreError::from)?;
        let Some(last_ms) = last_admission else {
            return Ok(None);
        };
        let window_ms = self.rate_limit_window_secs as i64 * 1000;
        let elapsed = Utc::now().timestamp_millis() - last_ms;
        if elapsed < window_ms {
            let retry_after_secs = ((window_ms - elapsed) as f64 / 1000.0).ceil() as u64;
            Ok(Some(retry_after_secs))
        } else {
            Ok(None)
        }
    }

    async fn try_claim(&self, uid: &str, pointer: &ActiveJobPointer) -> Result<bool, StoreError> {
        let mut conn = self.store.connection().await?;
        let payload = serde_json::to_string(pointer)?;
        let set: Option<String> = redis::cmd("SET")
            .arg(store::active_job_key(uid))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(self.active_job_ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    async fn read_pointer(&self, uid: &str) -> Result<Option<ActiveJobPointer>, StoreError> {
        let mut conn = self.store.connection().await?;
        let payload: Option<String> = conn.get(store::active_job_key(uid)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write_pointer(&self, uid: &str, pointer: &ActiveJobPointer) -> Result<(), StoreError> {
        let mut conn = self.store.connection().await?;
        let payload = serde_json::to_string(pointer)?;
        conn.set_ex::<_, _, ()>(store::active_job_key(uid), payload, self.active_job_ttl_secs)
            .await?;
        Ok(())
    }

    async fn write_rate_limit(&self, uid: &str, timestamp_ms: i64) -> Result<(), StoreError> {
        // A zero window disables rate limiting; SETEX rejects a zero expiry.
        if self.rate_limit_window_secs == 0 {
            return Ok(());
        }
        let mut conn = self.store.connection().await?;
        conn.set_ex::<_, _, ()>(
            store::rate_limit_key(uid),
            timestamp_ms,
            self.rate_limit_window_secs,
        )
        .await?;
        Ok(())
    }

    /// Drop the user's active-job pointer. Idempotent; also invoked by the
    /// streaming gateway when it observes a terminal event.
    pub async fn clear_active_job(&self, uid: &str) -> Result<(), StoreError> {
        let mut conn = self.store.connection().await?;
        conn.del::<_, ()>(store::active_job_key(uid)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_retry_after_rounds_up() {
        // 90.2s remaining in the window must report 91, never 90.
        let window_ms = 120_000i64;
        let elapsed = 29_800i64;
        let retry_after = ((window_ms - elapsed) as f64 / 1000.0).ceil() as u64;
        assert_eq!(retry_after, 91);

        // Exactly at the boundary the caller may retry immediately next call.
        let retry_after = ((window_ms - 119_999) as f64 / 1000.0).ceil() as u64;
        assert_eq!(retry_after, 1);
    }
}
