use std::collections::HashMap;
use std::sync::Arc;

use parksync_api::GatewayHeartbeat;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{GatewayRecord, GatewayStatus};

/// Point-in-time gateway liveness, handed to the dispatcher and janitor
/// instead of letting them read ambient mutable state. Testable with
/// synthetic data.
#[derive(Debug, Clone, Default)]
pub struct GatewayHealthSnapshot {
    statuses: HashMap<String, GatewayStatus>,
}

impl GatewayHealthSnapshot {
    pub fn from_statuses(statuses: HashMap<String, GatewayStatus>) -> Self {
        Self { statuses }
    }

    /// None when the gateway has never been heard from; the dispatcher
    /// treats that optimistically.
    pub fn status(&self, gateway_id: &str) -> Option<GatewayStatus> {
        self.statuses.get(gateway_id).copied()
    }

    pub fn offline_gateways(&self) -> Vec<String> {
        self.statuses
            .iter()
            .filter(|(_, status)| **status == GatewayStatus::Offline)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Tracks gateway liveness from the heartbeat feed.
pub struct GatewayHealthMonitor {
    records: Arc<RwLock<HashMap<String, GatewayRecord>>>,
    offline_after: Duration,
}

impl GatewayHealthMonitor {
    pub fn new(offline_after: Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            offline_after,
        }
    }

    pub async fn observe_heartbeat(&self, heartbeat: &GatewayHeartbeat) {
        let mut records = self.records.write().await;
        let record = records
            .entry(heartbeat.gateway_id.clone())
            .or_insert_with(|| GatewayRecord {
                gateway_id: heartbeat.gateway_id.clone(),
                status: GatewayStatus::Online,
                last_seen_at: heartbeat.last_seen_at,
            });

        if heartbeat.last_seen_at > record.last_seen_at {
            record.last_seen_at = heartbeat.last_seen_at;
        }
    }

    pub async fn snapshot(&self, now: OffsetDateTime) -> GatewayHealthSnapshot {
        let records = self.records.read().await;
        let statuses = records
            .values()
            .map(|r| (r.gateway_id.clone(), r.status_at(now, self.offline_after)))
            .collect();

        GatewayHealthSnapshot { statuses }
    }

    /// Re-derive stored statuses and log transitions. Run on a fixed
    /// refresh interval; returns the gateways that changed state.
    pub async fn refresh(&self, now: OffsetDateTime) -> Vec<(String, GatewayStatus)> {
        let mut transitions = Vec::new();
        let mut records = self.records.write().await;

        for record in records.values_mut() {
            let derived = record.status_at(now, self.offline_after);
            if derived != record.status {
                match derived {
                    GatewayStatus::Offline => warn!(
                        gateway_id = %record.gateway_id,
                        "gateway went offline, downlinks through it will be deferred"
                    ),
                    GatewayStatus::Online => info!(
                        gateway_id = %record.gateway_id,
                        "gateway back online"
                    ),
                }
                record.status = derived;
                transitions.push((record.gateway_id.clone(), derived));
            }
        }

        transitions
    }
}
