use time::OffsetDateTime;

use super::Table;

/// Outstanding delivery confirmation for one device.
///
/// Created when a command is dispatched, consumed by the next qualifying
/// uplink, or swept by the retry manager once `deadline` passes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VerificationRecord {
    pub device_id: String,
    pub queue_id: String,
    pub expected_content_hash: String,
    /// The device's apply counter must advance past this value.
    pub expected_sequence_floor: i64,
    pub deadline: OffsetDateTime,
    pub dispatched_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct VerificationTable;

impl Table for VerificationTable {
    fn name(&self) -> &'static str {
        "verifications"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS verifications (
                device_id VARCHAR(64) PRIMARY KEY,
                queue_id VARCHAR(36) NOT NULL,
                expected_content_hash VARCHAR(32) NOT NULL,
                expected_sequence_floor INTEGER NOT NULL,
                deadline TIMESTAMP NOT NULL,
                dispatched_at TIMESTAMP NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS verifications;")
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }
}
