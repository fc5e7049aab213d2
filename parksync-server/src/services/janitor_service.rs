use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::configs::Delivery;
use crate::repositories::{
    CommandQueueRepository, DeadLetterRepository, VerificationRepository, VerifiedHashRepository,
};
use crate::services::{DeliveryMetrics, GatewayHealthMonitor};

/// Periodic sweep keeping the queue bounded during prolonged outages.
///
/// Entries pinned to an offline gateway cannot be delivered until the
/// device's next uplink rotates its affinity; once they age past the stale
/// threshold they are flushed to the dead-letter set instead of growing the
/// queue without bound. The same pass reaps expired verified hashes and
/// trims dead-letter overflow.
pub struct QueueJanitor {
    queue: Arc<CommandQueueRepository>,
    dead_letters: Arc<DeadLetterRepository>,
    verifications: Arc<VerificationRepository>,
    verified_hashes: Arc<VerifiedHashRepository>,
    health: Arc<GatewayHealthMonitor>,
    metrics: Arc<DeliveryMetrics>,
    delivery: Delivery,
}

impl QueueJanitor {
    pub fn new(
        queue: Arc<CommandQueueRepository>,
        dead_letters: Arc<DeadLetterRepository>,
        verifications: Arc<VerificationRepository>,
        verified_hashes: Arc<VerifiedHashRepository>,
        health: Arc<GatewayHealthMonitor>,
        metrics: Arc<DeliveryMetrics>,
        delivery: Delivery,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            verifications,
            verified_hashes,
            health,
            metrics,
            delivery,
        }
    }

    pub fn start(self: &Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let janitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                janitor.delivery.janitor_interval_secs,
            ));
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        janitor.run_pass(OffsetDateTime::now_utc()).await;
                    }
                }
            }
        });
    }

    pub async fn run_pass(&self, now: OffsetDateTime) {
        self.flush_offline_gateways(now).await;
        self.reap_verified_hashes(now).await;
        self.trim_dead_letters().await;
    }

    async fn flush_offline_gateways(&self, now: OffsetDateTime) {
        let snapshot = self.health.snapshot(now).await;
        let cutoff = now - Duration::seconds(self.delivery.stale_after_secs as i64);

        for gateway_id in snapshot.offline_gateways() {
            let stale = match self.queue.stale_for_gateway(&gateway_id, cutoff).await {
                Ok(stale) => stale,
                Err(e) => {
                    error!(gateway_id = %gateway_id, "janitor failed to list stale entries: {}", e);
                    continue;
                }
            };

            if stale.is_empty() {
                continue;
            }

            let mut flushed = 0usize;
            for entry in stale {
                match self.dead_letters.bury(&entry, "gateway_offline_stale", now).await {
                    Ok(()) => {
                        if let Err(e) = self
                            .verifications
                            .delete(&entry.device_id, &entry.queue_id)
                            .await
                        {
                            warn!(device_id = %entry.device_id, "janitor cleanup failed: {}", e);
                        }
                        self.metrics.record_dead_lettered();
                        flushed += 1;
                    }
                    Err(e) => {
                        warn!(device_id = %entry.device_id, "janitor flush failed: {}", e);
                    }
                }
            }

            warn!(
                gateway_id = %gateway_id,
                flushed, "flushed stale queue entries behind offline gateway"
            );
        }
    }

    async fn reap_verified_hashes(&self, now: OffsetDateTime) {
        let cutoff = now - Duration::seconds(self.delivery.verified_hash_retention_secs as i64);
        match self.verified_hashes.reap(cutoff).await {
            Ok(0) => {}
            Ok(reaped) => info!(reaped, "expired verified hashes reaped"),
            Err(e) => error!("verified hash reaping failed: {}", e),
        }
    }

    async fn trim_dead_letters(&self) {
        match self
            .dead_letters
            .evict_overflow(self.delivery.dead_letter_capacity)
            .await
        {
            Ok(0) => {}
            Ok(evicted) => warn!(evicted, "dead-letter set overflowed, oldest entries evicted"),
            Err(e) => error!("dead-letter eviction failed: {}", e),
        }
    }
}
