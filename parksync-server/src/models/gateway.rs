use time::{Duration, OffsetDateTime};

/// Derived gateway liveness, refreshed from the heartbeat feed. Not owned
/// state: there is no table behind it, only the in-process snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct GatewayRecord {
    pub gateway_id: String,
    pub status: GatewayStatus,
    pub last_seen_at: OffsetDateTime,
}

impl GatewayRecord {
    pub fn status_at(&self, now: OffsetDateTime, offline_after: Duration) -> GatewayStatus {
        if now - self.last_seen_at > offline_after {
            GatewayStatus::Offline
        } else {
            GatewayStatus::Online
        }
    }
}
