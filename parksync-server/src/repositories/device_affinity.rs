use std::sync::Arc;

use time::OffsetDateTime;

use crate::configs::Storage;
use crate::errors::QueueError;
use crate::models::DeviceAffinity;

/// Gateways remembered per device beyond the current one.
const HISTORY_BOUND: usize = 8;

pub struct DeviceAffinityRepository {
    storage: Arc<Storage>,
}

impl DeviceAffinityRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Record which gateway heard the device last. Rotations prepend to the
    /// bounded history; repeat uplinks through the same gateway only bump
    /// the timestamp and counter.
    pub async fn record_uplink(
        &self,
        device_id: &str,
        gateway_id: &str,
        counter: i64,
        at: OffsetDateTime,
    ) -> Result<(), QueueError> {
        let mut tx = self.storage.get_pool().begin().await?;

        let existing: Option<DeviceAffinity> =
            sqlx::query_as("SELECT * FROM device_affinity WHERE device_id = $1")
                .bind(device_id)
                .fetch_optional(&mut *tx)
                .await?;

        let mut history = existing
            .as_ref()
            .map(|a| a.gateway_history())
            .unwrap_or_default();
        if history.first().map(String::as_str) != Some(gateway_id) {
            history.insert(0, gateway_id.to_string());
            history.truncate(HISTORY_BOUND);
        }
        let history_json =
            serde_json::to_string(&history).unwrap_or_else(|_| String::from("[]"));

        sqlx::query(
            r#"
            INSERT INTO device_affinity
                (device_id, current_gateway_id, last_uplink_at, last_counter, history)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(device_id) DO UPDATE SET
                current_gateway_id = excluded.current_gateway_id,
                last_uplink_at = excluded.last_uplink_at,
                last_counter = excluded.last_counter,
                history = excluded.history
            "#,
        )
        .bind(device_id)
        .bind(gateway_id)
        .bind(at)
        .bind(counter)
        .bind(&history_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    pub async fn find(&self, device_id: &str) -> Result<Option<DeviceAffinity>, QueueError> {
        let affinity: Option<DeviceAffinity> =
            sqlx::query_as("SELECT * FROM device_affinity WHERE device_id = $1")
                .bind(device_id)
                .fetch_optional(self.storage.get_pool())
                .await?;

        Ok(affinity)
    }
}
