use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::configs::Storage;
use crate::errors::QueueError;
use crate::models::{DeadLetter, QueueEntry, QueueState};

pub struct DeadLetterRepository {
    storage: Arc<Storage>,
}

impl DeadLetterRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Move a queue entry into the dead-letter set. The removal and the
    /// insert run in one transaction so the entry never exists in both
    /// places or in neither.
    pub async fn bury(
        &self,
        entry: &QueueEntry,
        last_error: &str,
        now: OffsetDateTime,
    ) -> Result<(), QueueError> {
        let mut tx = self.storage.get_pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO dead_letters
                (queue_id, device_id, tenant_id, space_id, payload, content_hash,
                 priority, attempts, last_error, enqueued_at, dead_lettered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&entry.queue_id)
        .bind(&entry.device_id)
        .bind(&entry.tenant_id)
        .bind(&entry.space_id)
        .bind(&entry.payload)
        .bind(&entry.content_hash)
        .bind(&entry.priority)
        .bind(entry.attempts)
        .bind(last_error)
        .bind(entry.enqueued_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM command_queue WHERE device_id = $1 AND queue_id = $2")
            .bind(&entry.device_id)
            .bind(&entry.queue_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Newest dead letters first, for operator inspection.
    pub async fn list(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        let letters: Vec<DeadLetter> =
            sqlx::query_as("SELECT * FROM dead_letters ORDER BY id DESC LIMIT $1")
                .bind(limit)
                .fetch_all(self.storage.get_pool())
                .await?;

        Ok(letters)
    }

    pub async fn depth(&self) -> Result<i64, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(self.storage.get_pool())
            .await?;

        Ok(count)
    }

    /// Operator replay: resurrect the most recent dead letter for a device
    /// as a fresh pending entry (attempts reset) and clear its dead letters.
    pub async fn requeue_device(
        &self,
        device_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<String>, QueueError> {
        let mut tx = self.storage.get_pool().begin().await?;

        let letter: Option<DeadLetter> = sqlx::query_as(
            "SELECT * FROM dead_letters WHERE device_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(letter) = letter else {
            return Ok(None);
        };

        let queue_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO command_queue
                (device_id, queue_id, tenant_id, space_id, payload, content_hash,
                 priority, state, attempts, enqueued_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $9)
            ON CONFLICT(device_id) DO UPDATE SET
                queue_id = excluded.queue_id, payload = excluded.payload,
                content_hash = excluded.content_hash, priority = excluded.priority,
                state = excluded.state, attempts = 0, last_error = NULL,
                next_attempt_at = NULL
            "#,
        )
        .bind(&letter.device_id)
        .bind(&queue_id)
        .bind(&letter.tenant_id)
        .bind(&letter.space_id)
        .bind(&letter.payload)
        .bind(&letter.content_hash)
        .bind(&letter.priority)
        .bind(QueueState::Pending)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM dead_letters WHERE device_id = $1")
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(queue_id))
    }

    /// Keep the set bounded: evict oldest rows past `capacity`.
    pub async fn evict_overflow(&self, capacity: i64) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM dead_letters
            WHERE id NOT IN (SELECT id FROM dead_letters ORDER BY id DESC LIMIT $1)
            "#,
        )
        .bind(capacity)
        .execute(self.storage.get_pool())
        .await?;

        Ok(result.rows_affected())
    }
}
