use parksync_api::DisplayColor;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Table;

/// Per-tenant display configuration. Read-only to the delivery core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayPolicy {
    pub free_color: DisplayColor,
    pub occupied_color: DisplayColor,
    pub reserved_color: DisplayColor,
    pub blocked_color: DisplayColor,
    pub out_of_service_color: DisplayColor,
    /// A reservation starting within this window already shows as reserved.
    pub reserved_soon_threshold_secs: u32,
    pub blink_on_reserved_soon: bool,
    /// Raw readings must agree within this window to flip the sensor state.
    pub debounce_window_secs: u64,
    pub debounce_count: u32,
}

impl DisplayPolicy {
    /// Fallback when a tenant policy is missing or fails to parse: a
    /// conservative free display, no blinking.
    pub fn safe_default() -> Self {
        Self {
            free_color: DisplayColor::Green,
            occupied_color: DisplayColor::Red,
            reserved_color: DisplayColor::Amber,
            blocked_color: DisplayColor::Blue,
            out_of_service_color: DisplayColor::Purple,
            reserved_soon_threshold_secs: 120,
            blink_on_reserved_soon: true,
            debounce_window_secs: 8,
            debounce_count: 2,
        }
    }
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self::safe_default()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DisplayPolicyRow {
    pub tenant_id: String,
    pub policy: String,
    pub updated_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct DisplayPolicyTable;

impl Table for DisplayPolicyTable {
    fn name(&self) -> &'static str {
        "display_policies"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS display_policies (
                tenant_id VARCHAR(64) PRIMARY KEY,
                policy JSON NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS display_policies;")
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }
}
