use std::sync::Arc;

use redis::AsyncCommands;

use crate::services::store::{CoordinationStore, StoreError, EXCLUDED_IMAGES_KEY};

/// Set of gallery image ids workers must skip. Plain set semantics, no order.
pub struct ExcludedImages {
    store: Arc<CoordinationStore>,
}

impl ExcludedImages {
    pub fn new(store: Arc<CoordinationStore>) -> Self {
        Self { store }
    }

    pub async fn all(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.store.connection().await?;
        Ok(conn.smembers(EXCLUDED_IMAGES_KEY).await?)
    }

    pub async fn add(&self, image_ids: &[String]) -> Result<(), StoreError> {
        if image_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.store.connection().await?;
        conn.sadd::<_, _, ()>(EXCLUDED_IMAGES_KEY, image_ids).await?;
        Ok(())
    }

    pub async fn remove(&self, image_ids: &[String]) -> Result<(), StoreError> {
        if image_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.store.connection().await?;
        conn.srem::<_, _, ()>(EXCLUDED_IMAGES_KEY, image_ids).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.store.connection().await?;
        conn.del::<_, ()>(EXCLUDED_IMAGES_KEY).await?;
        Ok(())
    }
}
