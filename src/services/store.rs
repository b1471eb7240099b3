use redis::aio::{MultiplexedConnection, PubSub};
use redis::AsyncCommands;

use crate::models::event::{ChangeNotification, JobNotification};

/// Key families in the coordination store. All durable state lives under these;
/// there is no other persistent storage.
pub const JOB_KEY_PREFIX: &str = "face_search:job:";
pub const WAITING_KEY: &str = "face_search:waiting";
pub const ACTIVE_KEY: &str = "face_search:active";
pub const DELAYED_KEY: &str = "face_search:delayed";
pub const COMPLETED_KEY: &str = "face_search:completed";
pub const FAILED_KEY: &str = "face_search:failed";
pub const SEQ_KEY: &str = "face_search:seq";
pub const PAUSED_KEY: &str = "face_search:paused";
pub const WORKERS_KEY: &str = "workers";
pub const EXCLUDED_IMAGES_KEY: &str = "excluded_images";

/// Broadcast channel for queue/worker/pause change notifications.
pub const QUEUE_UPDATES_CHANNEL: &str = "queue:updates";
/// Channel for per-job terminal events.
pub const JOB_EVENTS_CHANNEL: &str = "queue:job-events";

pub fn job_key(job_id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{job_id}")
}

pub fn rate_limit_key(uid: &str) -> String {
    format!("rate_limit:{uid}")
}

pub fn active_job_key(uid: &str) -> String {
    format!("active_job:{uid}")
}

pub fn worker_paused_key(worker_id: &str) -> String {
    format!("worker:{worker_id}:paused")
}

/// Shared coordination store: key-value with TTL, atomic single-key ops and
/// pub/sub, all backed by Redis. Every other service coordinates through this.
pub struct CoordinationStore {
    client: redis::Client,
}

impl CoordinationStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Dedicated pub/sub connection; one per subscriber.
    pub async fn subscriber(&self, channel: &str) -> Result<PubSub, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }

    /// Check store connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn publish_json<T: serde::Serialize>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(message)?;
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    pub async fn publish_queue_update(&self) -> Result<(), StoreError> {
        self.publish_json(QUEUE_UPDATES_CHANNEL, &ChangeNotification::Queue)
            .await
    }

    pub async fn publish_worker_update(&self) -> Result<(), StoreError> {
        self.publish_json(QUEUE_UPDATES_CHANNEL, &ChangeNotification::Workers)
            .await
    }

    pub async fn publish_pause_update(&self, is_paused: bool) -> Result<(), StoreError> {
        self.publish_json(QUEUE_UPDATES_CHANNEL, &ChangeNotification::Pause { is_paused })
            .await
    }

    pub async fn publish_job_event(&self, event: &JobNotification) -> Result<(), StoreError> {
        self.publish_json(JOB_EVENTS_CHANNEL, event).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
