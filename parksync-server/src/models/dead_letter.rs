use time::OffsetDateTime;

use super::Table;

/// Terminal resting place for commands that exhausted delivery. Bounded,
/// FIFO-evictable, inspected and flushed by operators, never auto-retried.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeadLetter {
    pub id: i64,
    pub queue_id: String,
    pub device_id: String,
    pub tenant_id: String,
    pub space_id: String,
    pub payload: String,
    pub content_hash: String,
    pub priority: String,
    pub attempts: i64,
    pub last_error: String,
    pub enqueued_at: OffsetDateTime,
    pub dead_lettered_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct DeadLetterTable;

impl Table for DeadLetterTable {
    fn name(&self) -> &'static str {
        "dead_letters"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_id VARCHAR(36) NOT NULL,
                device_id VARCHAR(64) NOT NULL,
                tenant_id VARCHAR(64) NOT NULL,
                space_id VARCHAR(64) NOT NULL,
                payload JSON NOT NULL,
                content_hash VARCHAR(32) NOT NULL,
                priority VARCHAR(16) NOT NULL,
                attempts INTEGER NOT NULL,
                last_error TEXT NOT NULL,
                enqueued_at TIMESTAMP NOT NULL,
                dead_lettered_at TIMESTAMP NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS dead_letters;")
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }
}
