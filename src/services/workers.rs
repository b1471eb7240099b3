use std::sync::Arc;

use chrono::Utc;
use redis::AsyncCommands;

use crate::config::AppConfig;
use crate::models::worker::{WorkerInfo, WorkerRecord, WorkerStatus};
use crate::services::store::{self, CoordinationStore, StoreError, WORKERS_KEY};

fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Liveness registry over worker heartbeat records.
///
/// Heartbeats are written by the worker processes themselves; this side only
/// reads them, owns the per-worker pause flag, and can delete entries. A
/// paused worker keeps heartbeating — the flag tells it to stop pulling work,
/// it does not deregister it.
pub struct WorkerRegistry {
    store: Arc<CoordinationStore>,
    online_cutoff_secs: f64,
    stale_cutoff_secs: f64,
}

impl WorkerRegistry {
    pub fn new(store: Arc<CoordinationStore>, config: &AppConfig) -> Self {
        Self {
            store,
            online_cutoff_secs: config.worker_online_cutoff_secs as f64,
            stale_cutoff_secs: config.worker_stale_cutoff_secs as f64,
        }
    }

    /// All workers with derived status and pause flag, online first then by
    /// id ascending. Records that fail to parse are logged and skipped rather
    /// than failing the whole listing.
    pub async fn list(&self) -> Result<Vec<WorkerInfo>, StoreError> {
        let mut conn = self.store.connection().await?;
        let entries: std::collections::HashMap<String, String> =
            conn.hgetall(WORKERS_KEY).await?;
        let now = now_secs();

        let mut workers = Vec::with_capacity(entries.len());
        for (id, payload) in entries {
            let record: WorkerRecord = match serde_json::from_str(&payload) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(worker_id = %id, error = %err, "Skipping unparseable worker record");
                    continue;
                }
            };
            let paused: Option<String> = conn.get(store::worker_paused_key(&id)).await?;
            let status = record.derive_status(now, self.online_cutoff_secs);
            workers.push(WorkerInfo {
                record,
                status,
                paused: paused.as_deref() == Some("1"),
            });
        }

        workers.sort_by(|a, b| match (a.status, b.status) {
            (WorkerStatus::Online, WorkerStatus::Offline) => std::cmp::Ordering::Less,
            (WorkerStatus::Offline, WorkerStatus::Online) => std::cmp::Ordering::Greater,
            _ => a.record.id.cmp(&b.record.id),
        });
        Ok(workers)
    }

    /// Tell a worker to stop pulling new jobs. The heartbeat record is untouched.
    pub async fn pause(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut conn = self.store.connection().await?;
        conn.set::<_, _, ()>(store::worker_paused_key(worker_id), "1")
            .await?;
        self.store.publish_worker_update().await?;
        Ok(())
    }

    pub async fn resume(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut conn = self.store.connection().await?;
        conn.del::<_, ()>(store::worker_paused_key(worker_id)).await?;
        self.store.publish_worker_update().await?;
        Ok(())
    }

    /// Drop the worker's heartbeat record and pause flag. Any job it was
    /// mid-processing keeps whatever state it was in.
    pub async fn remove(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut conn = self.store.connection().await?;
        redis::pipe()
            .hdel(WORKERS_KEY, worker_id)
            .ignore()
            .del(store::worker_paused_key(worker_id))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        self.store.publish_worker_update().await?;
        Ok(())
    }

    /// Administrative sweep: remove every worker whose heartbeat age exceeds
    /// the stale cutoff, along with its pause flag. Returns the count cleaned.
    pub async fn clean_stale(&self) -> Result<u64, StoreError> {
        let mut conn = self.store.connection().await?;
        let entries: std::collections::HashMap<String, String> =
            conn.hgetall(WORKERS_KEY).await?;
        let now = now_secs();

        let mut cleaned = 0u64;
        for (id, payload) in entries {
            let stale = match serde_json::from_str::<WorkerRecord>(&payload) {
                Ok(record) => record.heartbeat_age(now) > self.stale_cutoff_secs,
                // An unparseable record has no readable heartbeat; sweep it too.
                Err(_) => true,
            };
            if stale {
                redis::pipe()
                    .hdel(WORKERS_KEY, &id)
                    .ignore()
                    .del(store::worker_paused_key(&id))
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await?;
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            self.store.publish_worker_update().await?;
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::worker::WorkerRecord;

    fn record(id: &str, heartbeat_offset: f64) -> WorkerRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "last_heartbeat": now_secs() + heartbeat_offset,
        }))
        .unwrap()
    }

    #[test]
    fn test_online_before_offline_then_id() {
        let mut infos = vec![
            WorkerInfo {
                record: record("b-offline", -30.0),
                status: WorkerStatus::Offline,
                paused: false,
            },
            WorkerInfo {
                record: record("z-online", -2.0),
                status: WorkerStatus::Online,
                paused: false,
            },
            WorkerInfo {
                record: record("a-online", -3.0),
                status: WorkerStatus::Online,
                paused: true,
            },
        ];
        infos.sort_by(|a, b| match (a.status, b.status) {
            (WorkerStatus::Online, WorkerStatus::Offline) => std::cmp::Ordering::Less,
            (WorkerStatus::Offline, WorkerStatus::Online) => std::cmp::Ordering::Greater,
            _ => a.record.id.cmp(&b.record.id),
        });
        let ids: Vec<&str> = infos.iter().map(|w| w.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a-online", "z-online", "b-offline"]);
    }

    #[test]
    fn test_stale_selection() {
        let now = now_secs();
        assert!(record("w", -61.0).heartbeat_age(now) > 60.0);
        assert!(record("w", -59.0).heartbeat_age(now) <= 60.0);
    }
}
