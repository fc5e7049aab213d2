use time::OffsetDateTime;

use super::Table;

/// Last gateway that heard each device, plus a short rotation history.
///
/// Weak, read-only relation: the network server pins downlink routing to the
/// last-uplink gateway and the application cannot override it. This table is
/// only consulted to reason about delivery risk.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceAffinity {
    pub device_id: String,
    pub current_gateway_id: String,
    pub last_uplink_at: OffsetDateTime,
    /// Most recent apply counter echoed by the device.
    pub last_counter: i64,
    /// Recent gateway ids, newest first, JSON array, bounded.
    pub history: String,
}

impl DeviceAffinity {
    pub fn gateway_history(&self) -> Vec<String> {
        serde_json::from_str(&self.history).unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct DeviceAffinityTable;

impl Table for DeviceAffinityTable {
    fn name(&self) -> &'static str {
        "device_affinity"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS device_affinity (
                device_id VARCHAR(64) PRIMARY KEY,
                current_gateway_id VARCHAR(64) NOT NULL,
                last_uplink_at TIMESTAMP NOT NULL,
                last_counter INTEGER NOT NULL DEFAULT 0,
                history JSON NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS device_affinity;")
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }
}
