use std::sync::Arc;

use parksync_api::DeviceUplink;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::errors::{DeliveryError, VerifyError};
use crate::repositories::{
    CommandQueueRepository, DeviceAffinityRepository, VerificationRepository,
    VerifiedHashRepository,
};
use crate::services::DeliveryMetrics;

/// Correlates device uplinks with outstanding commands.
///
/// Every uplink refreshes the device-gateway affinity; when a verification
/// window is open for the device, the echoed display state and the apply
/// counter decide between verified, transient miss and mismatch. Deadline
/// expiry is the retry manager's job, not handled here.
pub struct VerificationEngine {
    queue: Arc<CommandQueueRepository>,
    affinity: Arc<DeviceAffinityRepository>,
    verifications: Arc<VerificationRepository>,
    verified_hashes: Arc<VerifiedHashRepository>,
    metrics: Arc<DeliveryMetrics>,
}

impl VerificationEngine {
    pub fn new(
        queue: Arc<CommandQueueRepository>,
        affinity: Arc<DeviceAffinityRepository>,
        verifications: Arc<VerificationRepository>,
        verified_hashes: Arc<VerifiedHashRepository>,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        Self {
            queue,
            affinity,
            verifications,
            verified_hashes,
            metrics,
        }
    }

    /// Consume the inbound uplink channel until shutdown.
    pub fn start(
        self: &Arc<Self>,
        mut uplinks: mpsc::Receiver<DeviceUplink>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    uplink = uplinks.recv() => {
                        let Some(uplink) = uplink else { break };
                        if let Err(e) = engine.handle_uplink(&uplink).await {
                            warn!(device_id = %uplink.device_id, "uplink handling failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    pub async fn handle_uplink(&self, uplink: &DeviceUplink) -> Result<(), DeliveryError> {
        self.affinity
            .record_uplink(
                &uplink.device_id,
                &uplink.gateway_id,
                uplink.applied_counter,
                uplink.timestamp,
            )
            .await?;

        let Some(record) = self.verifications.find(&uplink.device_id).await? else {
            return Ok(());
        };

        let observed_hash = uplink.applied.content_hash();
        let hash_matches = observed_hash == record.expected_content_hash;
        let counter_advanced = uplink.applied_counter > record.expected_sequence_floor;

        if hash_matches && counter_advanced {
            match self
                .queue
                .take_verified(&uplink.device_id, &record.queue_id)
                .await?
            {
                Some(entry) => {
                    self.verified_hashes
                        .upsert(&uplink.device_id, &record.expected_content_hash, uplink.timestamp)
                        .await?;
                    self.verifications
                        .delete(&uplink.device_id, &record.queue_id)
                        .await?;
                    self.metrics.record_verified();
                    self.metrics.record_latency(
                        (uplink.timestamp - entry.enqueued_at).as_seconds_f64().max(0.0),
                    );
                    info!(
                        device_id = %uplink.device_id,
                        "display state verified by device echo"
                    );
                }
                None => {
                    // The queue entry was coalesced away while the echo was in
                    // the air; the verification is stale, drop it silently.
                    self.verifications
                        .delete(&uplink.device_id, &record.queue_id)
                        .await?;
                }
            }
            return Ok(());
        }

        if hash_matches && !counter_advanced {
            // Out-of-order uplinks are expected on this transport; an echo of
            // the right state with a stale counter is a transient miss.
            debug!(
                device_id = %uplink.device_id,
                counter = uplink.applied_counter,
                floor = record.expected_sequence_floor,
                "echo matches but counter has not advanced yet"
            );
            return Ok(());
        }

        // A mismatch never retries on its own; deadline expiry does.
        let mismatch = VerifyError::Mismatch {
            device_id: uplink.device_id.clone(),
            expected: record.expected_content_hash.clone(),
            observed: observed_hash,
        };
        warn!(
            counter = uplink.applied_counter,
            floor = record.expected_sequence_floor,
            "{mismatch}"
        );

        Ok(())
    }
}
