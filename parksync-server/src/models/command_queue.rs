use parksync_api::{DisplayPayload, Priority};
use time::OffsetDateTime;

use super::Table;
use crate::errors::QueueError;

/// Delivery lifecycle of a queued command.
///
/// `Pending → Dispatched → AwaitingVerification`, then the row is deleted on
/// verification, reverted to `Pending` for a retry, or moved to the
/// dead-letter table. Dead entries never appear here: the primary key on
/// `device_id` is what enforces at most one non-terminal entry per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum QueueState {
    Pending,
    Dispatched,
    AwaitingVerification,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueEntry {
    pub device_id: String,
    pub queue_id: String,
    pub tenant_id: String,
    pub space_id: String,
    pub payload: String,
    pub content_hash: String,
    pub priority: String,
    pub state: QueueState,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub enqueued_at: OffsetDateTime,
    pub last_attempt_at: Option<OffsetDateTime>,
    pub next_attempt_at: Option<OffsetDateTime>,
    pub expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl QueueEntry {
    pub fn display_payload(&self) -> Result<DisplayPayload, QueueError> {
        serde_json::from_str(&self.payload).map_err(|e| QueueError::MalformedPayload {
            device_id: self.device_id.clone(),
            detail: e.to_string(),
        })
    }

    pub fn priority(&self) -> Priority {
        Priority::parse(&self.priority).unwrap_or(Priority::Regular)
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Clone)]
pub struct CommandQueueTable;

impl Table for CommandQueueTable {
    fn name(&self) -> &'static str {
        "command_queue"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS command_queue (
                device_id VARCHAR(64) PRIMARY KEY,
                queue_id VARCHAR(36) NOT NULL,
                tenant_id VARCHAR(64) NOT NULL,
                space_id VARCHAR(64) NOT NULL,
                payload JSON NOT NULL,
                content_hash VARCHAR(32) NOT NULL,
                priority VARCHAR(16) NOT NULL,
                state VARCHAR(32) NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                enqueued_at TIMESTAMP NOT NULL,
                last_attempt_at TIMESTAMP,
                next_attempt_at TIMESTAMP,
                expires_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS command_queue;")
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }
}
