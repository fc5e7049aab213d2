use std::sync::Arc;

use time::OffsetDateTime;

use crate::configs::Storage;
use crate::errors::QueueError;

pub struct VerifiedHashRepository {
    storage: Arc<Storage>,
}

impl VerifiedHashRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn upsert(
        &self,
        device_id: &str,
        content_hash: &str,
        verified_at: OffsetDateTime,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO verified_hashes (device_id, content_hash, verified_at)
            VALUES ($1, $2, $3)
            ON CONFLICT(device_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                verified_at = excluded.verified_at
            "#,
        )
        .bind(device_id)
        .bind(content_hash)
        .bind(verified_at)
        .execute(self.storage.get_pool())
        .await?;

        Ok(())
    }

    /// The hash the device is known to display, if verified within the
    /// retention window.
    pub async fn current(
        &self,
        device_id: &str,
        cutoff: OffsetDateTime,
    ) -> Result<Option<String>, QueueError> {
        let hash: Option<(String,)> = sqlx::query_as(
            "SELECT content_hash FROM verified_hashes WHERE device_id = $1 AND verified_at > $2",
        )
        .bind(device_id)
        .bind(cutoff)
        .fetch_optional(self.storage.get_pool())
        .await?;

        Ok(hash.map(|(h,)| h))
    }

    /// Forget the verified state so the next dispatch is not suppressed.
    /// Used when a delivery proves undeliverable or an operator flushes.
    pub async fn invalidate(&self, device_id: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM verified_hashes WHERE device_id = $1")
            .bind(device_id)
            .execute(self.storage.get_pool())
            .await?;

        Ok(())
    }

    /// Drop rows older than the retention cutoff.
    pub async fn reap(&self, cutoff: OffsetDateTime) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM verified_hashes WHERE verified_at <= $1")
            .bind(cutoff)
            .execute(self.storage.get_pool())
            .await?;

        Ok(result.rows_affected())
    }
}
