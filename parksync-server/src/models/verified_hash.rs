use time::OffsetDateTime;

use super::Table;

/// Last verified display state per device, used to suppress re-sends of a
/// state the device already shows. Entries expire after a retention window
/// so a long-lived state is still refreshed occasionally.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VerifiedHash {
    pub device_id: String,
    pub content_hash: String,
    pub verified_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct VerifiedHashTable;

impl Table for VerifiedHashTable {
    fn name(&self) -> &'static str {
        "verified_hashes"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS verified_hashes (
                device_id VARCHAR(64) PRIMARY KEY,
                content_hash VARCHAR(32) NOT NULL,
                verified_at TIMESTAMP NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS verified_hashes;")
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }
}
