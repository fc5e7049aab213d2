use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::configs::Storage;
use crate::errors::QueueError;
use crate::models::{DisplayCommand, QueueEntry, QueueState};

/// What happened to an enqueue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No entry existed; a fresh pending entry was created.
    Inserted,
    /// An entry existed; its payload was replaced, attempts preserved.
    Coalesced,
    /// The device already verified this exact state; nothing was queued.
    Deduplicated,
}

pub struct CommandQueueRepository {
    storage: Arc<Storage>,
}

impl CommandQueueRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Enqueue a command under latest-wins semantics.
    ///
    /// At most one non-terminal entry per device exists at any time; the
    /// primary key on `device_id` makes a concurrent double-insert
    /// impossible, and the whole decision runs in one transaction so
    /// concurrent enqueues for the same device serialize to a single winner.
    pub async fn enqueue(
        &self,
        command: &DisplayCommand,
        verified_retention: Duration,
        now: OffsetDateTime,
    ) -> Result<EnqueueOutcome, QueueError> {
        let payload = serde_json::to_string(&command.payload).map_err(|e| {
            QueueError::MalformedPayload {
                device_id: command.device_id.clone(),
                detail: e.to_string(),
            }
        })?;

        let mut tx = self.storage.get_pool().begin().await?;

        let verified: Option<(String,)> = sqlx::query_as(
            "SELECT content_hash FROM verified_hashes WHERE device_id = $1 AND verified_at > $2",
        )
        .bind(&command.device_id)
        .bind(now - verified_retention)
        .fetch_optional(&mut *tx)
        .await?;

        if verified.is_some_and(|(hash,)| hash == command.content_hash) {
            return Ok(EnqueueOutcome::Deduplicated);
        }

        let queue_id = Uuid::new_v4().to_string();
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT queue_id FROM command_queue WHERE device_id = $1")
                .bind(&command.device_id)
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO command_queue
                        (device_id, queue_id, tenant_id, space_id, payload, content_hash,
                         priority, state, attempts, enqueued_at, expires_at, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10, $11)
                    "#,
                )
                .bind(&command.device_id)
                .bind(&queue_id)
                .bind(&command.tenant_id)
                .bind(&command.space_id)
                .bind(&payload)
                .bind(&command.content_hash)
                .bind(command.priority.as_str())
                .bind(QueueState::Pending)
                .bind(now)
                .bind(command.expires_at)
                .bind(command.created_at)
                .execute(&mut *tx)
                .await?;

                EnqueueOutcome::Inserted
            }
            Some(_) => {
                // Coalesce: latest payload wins, the attempt counter and the
                // queue position (enqueued_at) survive state churn.
                sqlx::query(
                    r#"
                    UPDATE command_queue
                    SET queue_id = $1, tenant_id = $2, space_id = $3, payload = $4,
                        content_hash = $5, priority = $6, state = $7,
                        last_error = NULL, next_attempt_at = NULL,
                        expires_at = $8, created_at = $9
                    WHERE device_id = $10
                    "#,
                )
                .bind(&queue_id)
                .bind(&command.tenant_id)
                .bind(&command.space_id)
                .bind(&payload)
                .bind(&command.content_hash)
                .bind(command.priority.as_str())
                .bind(QueueState::Pending)
                .bind(command.expires_at)
                .bind(command.created_at)
                .bind(&command.device_id)
                .execute(&mut *tx)
                .await?;

                EnqueueOutcome::Coalesced
            }
        };

        tx.commit().await?;

        Ok(outcome)
    }

    /// Pending entries whose retry schedule is due, oldest enqueue first.
    /// No ordering guarantee exists across devices beyond this FIFO.
    pub async fn fetch_eligible(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let entries: Vec<QueueEntry> = sqlx::query_as(
            r#"
            SELECT * FROM command_queue
            WHERE state = $1 AND (next_attempt_at IS NULL OR next_attempt_at <= $2)
            ORDER BY enqueued_at ASC
            LIMIT $3
            "#,
        )
        .bind(QueueState::Pending)
        .bind(now)
        .bind(limit)
        .fetch_all(self.storage.get_pool())
        .await?;

        Ok(entries)
    }

    pub async fn find(&self, device_id: &str) -> Result<Option<QueueEntry>, QueueError> {
        let entry: Option<QueueEntry> =
            sqlx::query_as("SELECT * FROM command_queue WHERE device_id = $1")
                .bind(device_id)
                .fetch_optional(self.storage.get_pool())
                .await?;

        Ok(entry)
    }

    /// CAS `pending -> dispatched`, counting the attempt. Returns false when
    /// the entry was coalesced or claimed by another worker in between.
    pub async fn claim_for_dispatch(
        &self,
        device_id: &str,
        queue_id: &str,
        now: OffsetDateTime,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE command_queue
            SET state = $1, attempts = attempts + 1, last_attempt_at = $2
            WHERE device_id = $3 AND queue_id = $4 AND state = $5
            "#,
        )
        .bind(QueueState::Dispatched)
        .bind(now)
        .bind(device_id)
        .bind(queue_id)
        .bind(QueueState::Pending)
        .execute(self.storage.get_pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// CAS `dispatched -> awaiting_verification` once the transport accepted
    /// the frame and the verification record exists.
    pub async fn mark_awaiting_verification(
        &self,
        device_id: &str,
        queue_id: &str,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE command_queue SET state = $1 WHERE device_id = $2 AND queue_id = $3 AND state = $4",
        )
        .bind(QueueState::AwaitingVerification)
        .bind(device_id)
        .bind(queue_id)
        .bind(QueueState::Dispatched)
        .execute(self.storage.get_pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Revert an entry to pending with a retry schedule. Used both for
    /// transport submit failures and for verification deadline expiry.
    pub async fn requeue_for_retry(
        &self,
        device_id: &str,
        queue_id: &str,
        next_attempt_at: OffsetDateTime,
        last_error: &str,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE command_queue
            SET state = $1, next_attempt_at = $2, last_error = $3
            WHERE device_id = $4 AND queue_id = $5
            "#,
        )
        .bind(QueueState::Pending)
        .bind(next_attempt_at)
        .bind(last_error)
        .bind(device_id)
        .bind(queue_id)
        .execute(self.storage.get_pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Push a pending entry's next attempt out without recording an attempt
    /// against it. Used for gateway-offline and no-affinity deferrals.
    pub async fn defer(
        &self,
        device_id: &str,
        queue_id: &str,
        until: OffsetDateTime,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE command_queue SET next_attempt_at = $1 WHERE device_id = $2 AND queue_id = $3 AND state = $4",
        )
        .bind(until)
        .bind(device_id)
        .bind(queue_id)
        .bind(QueueState::Pending)
        .execute(self.storage.get_pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove a verified entry, returning it for latency accounting.
    /// Returns None when the entry was already superseded by coalescing.
    pub async fn take_verified(
        &self,
        device_id: &str,
        queue_id: &str,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let mut tx = self.storage.get_pool().begin().await?;

        let entry: Option<QueueEntry> =
            sqlx::query_as("SELECT * FROM command_queue WHERE device_id = $1 AND queue_id = $2")
                .bind(device_id)
                .bind(queue_id)
                .fetch_optional(&mut *tx)
                .await?;

        if entry.is_some() {
            sqlx::query("DELETE FROM command_queue WHERE device_id = $1 AND queue_id = $2")
                .bind(device_id)
                .bind(queue_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(entry)
    }

    /// Drop an entry without delivering it (TTL expiry).
    pub async fn remove(&self, device_id: &str, queue_id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM command_queue WHERE device_id = $1 AND queue_id = $2")
            .bind(device_id)
            .bind(queue_id)
            .execute(self.storage.get_pool())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn depth(&self) -> Result<i64, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM command_queue")
            .fetch_one(self.storage.get_pool())
            .await?;

        Ok(count)
    }

    /// Entries pinned to the given gateway and enqueued before `cutoff`.
    /// Feeds the janitor's offline-gateway flush.
    pub async fn stale_for_gateway(
        &self,
        gateway_id: &str,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let entries: Vec<QueueEntry> = sqlx::query_as(
            r#"
            SELECT q.* FROM command_queue q
            JOIN device_affinity a ON a.device_id = q.device_id
            WHERE a.current_gateway_id = $1 AND q.enqueued_at <= $2
            "#,
        )
        .bind(gateway_id)
        .bind(cutoff)
        .fetch_all(self.storage.get_pool())
        .await?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use parksync_api::{DisplayColor, DisplayPayload, Priority};

    use crate::configs::{Database, SchemaManager};

    use super::*;

    async fn setup_test_db() -> Arc<Storage> {
        Arc::new(
            Storage::new(
                Database {
                    clean_start: true,
                    url: String::from("sqlite::memory:"),
                },
                SchemaManager::default(),
            )
            .await
            .unwrap(),
        )
    }

    fn command(device_id: &str, color: DisplayColor, blink: bool) -> DisplayCommand {
        DisplayCommand::new(
            device_id.to_string(),
            "tenant-1".to_string(),
            "space-1".to_string(),
            DisplayPayload::new(color, blink),
            Priority::Regular,
            None,
            OffsetDateTime::now_utc(),
        )
    }

    #[tokio::test]
    async fn first_enqueue_inserts_pending_entry() {
        let storage = setup_test_db().await;
        let repo = CommandQueueRepository::new(storage);
        let now = OffsetDateTime::now_utc();

        let outcome = repo
            .enqueue(&command("dev-1", DisplayColor::Red, false), Duration::hours(1), now)
            .await
            .unwrap();

        assert_eq!(outcome, EnqueueOutcome::Inserted);
        let entry = repo.find("dev-1").await.unwrap().unwrap();
        assert_eq!(entry.state, QueueState::Pending);
        assert_eq!(entry.attempts, 0);
    }

    #[tokio::test]
    async fn rapid_enqueues_coalesce_to_latest_payload() {
        let storage = setup_test_db().await;
        let repo = CommandQueueRepository::new(storage);
        let now = OffsetDateTime::now_utc();

        repo.enqueue(&command("dev-1", DisplayColor::Red, false), Duration::hours(1), now)
            .await
            .unwrap();
        repo.enqueue(&command("dev-1", DisplayColor::Amber, true), Duration::hours(1), now)
            .await
            .unwrap();
        let outcome = repo
            .enqueue(&command("dev-1", DisplayColor::Green, false), Duration::hours(1), now)
            .await
            .unwrap();

        assert_eq!(outcome, EnqueueOutcome::Coalesced);
        assert_eq!(repo.depth().await.unwrap(), 1);

        let entry = repo.find("dev-1").await.unwrap().unwrap();
        let payload = entry.display_payload().unwrap();
        assert_eq!(payload.color, DisplayColor::Green);
        assert!(!payload.blink);
    }

    #[tokio::test]
    async fn coalescing_preserves_attempts_and_queue_position() {
        let storage = setup_test_db().await;
        let repo = CommandQueueRepository::new(storage);
        let now = OffsetDateTime::now_utc();

        repo.enqueue(&command("dev-1", DisplayColor::Red, false), Duration::hours(1), now)
            .await
            .unwrap();
        let first = repo.find("dev-1").await.unwrap().unwrap();
        assert!(
            repo.claim_for_dispatch("dev-1", &first.queue_id, now)
                .await
                .unwrap()
        );

        repo.enqueue(&command("dev-1", DisplayColor::Green, false), Duration::hours(1), now)
            .await
            .unwrap();

        let entry = repo.find("dev-1").await.unwrap().unwrap();
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.state, QueueState::Pending);
        assert_eq!(entry.enqueued_at, first.enqueued_at);
        assert_ne!(entry.queue_id, first.queue_id);
    }

    #[tokio::test]
    async fn verified_state_deduplicates_enqueue() {
        let storage = setup_test_db().await;
        let repo = CommandQueueRepository::new(storage.clone());
        let now = OffsetDateTime::now_utc();

        let cmd = command("dev-1", DisplayColor::Red, false);
        sqlx::query(
            "INSERT INTO verified_hashes (device_id, content_hash, verified_at) VALUES ($1, $2, $3)",
        )
        .bind("dev-1")
        .bind(&cmd.content_hash)
        .bind(now)
        .execute(storage.get_pool())
        .await
        .unwrap();

        let outcome = repo.enqueue(&cmd, Duration::hours(1), now).await.unwrap();

        assert_eq!(outcome, EnqueueOutcome::Deduplicated);
        assert_eq!(repo.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_verified_hash_does_not_deduplicate() {
        let storage = setup_test_db().await;
        let repo = CommandQueueRepository::new(storage.clone());
        let now = OffsetDateTime::now_utc();

        let cmd = command("dev-1", DisplayColor::Red, false);
        sqlx::query(
            "INSERT INTO verified_hashes (device_id, content_hash, verified_at) VALUES ($1, $2, $3)",
        )
        .bind("dev-1")
        .bind(&cmd.content_hash)
        .bind(now - Duration::hours(2))
        .execute(storage.get_pool())
        .await
        .unwrap();

        let outcome = repo.enqueue(&cmd, Duration::hours(1), now).await.unwrap();

        assert_eq!(outcome, EnqueueOutcome::Inserted);
    }

    #[tokio::test]
    async fn eligible_entries_come_back_fifo() {
        let storage = setup_test_db().await;
        let repo = CommandQueueRepository::new(storage);
        let base = OffsetDateTime::now_utc();

        for (i, device) in ["dev-a", "dev-b", "dev-c"].iter().enumerate() {
            repo.enqueue(
                &command(device, DisplayColor::Red, false),
                Duration::hours(1),
                base + Duration::seconds(i as i64),
            )
            .await
            .unwrap();
        }

        let eligible = repo
            .fetch_eligible(base + Duration::minutes(1), 10)
            .await
            .unwrap();

        let devices: Vec<&str> = eligible.iter().map(|e| e.device_id.as_str()).collect();
        assert_eq!(devices, vec!["dev-a", "dev-b", "dev-c"]);
    }

    #[tokio::test]
    async fn backoff_schedule_hides_entry_until_due() {
        let storage = setup_test_db().await;
        let repo = CommandQueueRepository::new(storage);
        let now = OffsetDateTime::now_utc();

        repo.enqueue(&command("dev-1", DisplayColor::Red, false), Duration::hours(1), now)
            .await
            .unwrap();
        let entry = repo.find("dev-1").await.unwrap().unwrap();
        repo.claim_for_dispatch("dev-1", &entry.queue_id, now)
            .await
            .unwrap();
        repo.requeue_for_retry(
            "dev-1",
            &entry.queue_id,
            now + Duration::seconds(30),
            "stuck_downlink",
        )
        .await
        .unwrap();

        assert!(repo.fetch_eligible(now, 10).await.unwrap().is_empty());
        let due = repo
            .fetch_eligible(now + Duration::seconds(31), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].last_error.as_deref(), Some("stuck_downlink"));
    }

    #[tokio::test]
    async fn claim_is_a_single_winner_cas() {
        let storage = setup_test_db().await;
        let repo = CommandQueueRepository::new(storage);
        let now = OffsetDateTime::now_utc();

        repo.enqueue(&command("dev-1", DisplayColor::Red, false), Duration::hours(1), now)
            .await
            .unwrap();
        let entry = repo.find("dev-1").await.unwrap().unwrap();

        assert!(
            repo.claim_for_dispatch("dev-1", &entry.queue_id, now)
                .await
                .unwrap()
        );
        assert!(
            !repo
                .claim_for_dispatch("dev-1", &entry.queue_id, now)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn take_verified_returns_none_for_superseded_queue_id() {
        let storage = setup_test_db().await;
        let repo = CommandQueueRepository::new(storage);
        let now = OffsetDateTime::now_utc();

        repo.enqueue(&command("dev-1", DisplayColor::Red, false), Duration::hours(1), now)
            .await
            .unwrap();
        let old = repo.find("dev-1").await.unwrap().unwrap();

        // A newer command replaces the entry before the echo arrives.
        repo.enqueue(&command("dev-1", DisplayColor::Green, false), Duration::hours(1), now)
            .await
            .unwrap();

        assert!(
            repo.take_verified("dev-1", &old.queue_id)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(repo.depth().await.unwrap(), 1);
    }
}
