use std::sync::Arc;

use time::OffsetDateTime;

use crate::configs::Storage;
use crate::errors::QueueError;
use crate::models::VerificationRecord;

pub struct VerificationRepository {
    storage: Arc<Storage>,
}

impl VerificationRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Open a verification window for a freshly dispatched command. A
    /// leftover record from an earlier dispatch of the same device is
    /// superseded outright.
    pub async fn create(&self, record: &VerificationRecord) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO verifications
                (device_id, queue_id, expected_content_hash, expected_sequence_floor,
                 deadline, dispatched_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(device_id) DO UPDATE SET
                queue_id = excluded.queue_id,
                expected_content_hash = excluded.expected_content_hash,
                expected_sequence_floor = excluded.expected_sequence_floor,
                deadline = excluded.deadline,
                dispatched_at = excluded.dispatched_at
            "#,
        )
        .bind(&record.device_id)
        .bind(&record.queue_id)
        .bind(&record.expected_content_hash)
        .bind(record.expected_sequence_floor)
        .bind(record.deadline)
        .bind(record.dispatched_at)
        .execute(self.storage.get_pool())
        .await?;

        Ok(())
    }

    pub async fn find(&self, device_id: &str) -> Result<Option<VerificationRecord>, QueueError> {
        let record: Option<VerificationRecord> =
            sqlx::query_as("SELECT * FROM verifications WHERE device_id = $1")
                .bind(device_id)
                .fetch_optional(self.storage.get_pool())
                .await?;

        Ok(record)
    }

    /// Remove the record, guarded by queue id so a record replaced by a
    /// newer dispatch is left alone.
    pub async fn delete(&self, device_id: &str, queue_id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM verifications WHERE device_id = $1 AND queue_id = $2")
            .bind(device_id)
            .bind(queue_id)
            .execute(self.storage.get_pool())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Records whose deadline has passed, oldest first; the retry manager's
    /// work list.
    pub async fn expired(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<VerificationRecord>, QueueError> {
        let records: Vec<VerificationRecord> =
            sqlx::query_as("SELECT * FROM verifications WHERE deadline <= $1 ORDER BY deadline ASC")
                .bind(now)
                .fetch_all(self.storage.get_pool())
                .await?;

        Ok(records)
    }
}
