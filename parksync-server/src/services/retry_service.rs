use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::configs::Delivery;
use crate::errors::{DeliveryError, VerifyError};
use crate::models::VerificationRecord;
use crate::repositories::{CommandQueueRepository, DeadLetterRepository, VerificationRepository};
use crate::services::DeliveryMetrics;
use crate::services::dispatch_service::retry_delay;

/// Sweeps expired verification deadlines into retries or dead letters.
pub struct RetryManager {
    queue: Arc<CommandQueueRepository>,
    dead_letters: Arc<DeadLetterRepository>,
    verifications: Arc<VerificationRepository>,
    metrics: Arc<DeliveryMetrics>,
    delivery: Delivery,
}

impl RetryManager {
    pub fn new(
        queue: Arc<CommandQueueRepository>,
        dead_letters: Arc<DeadLetterRepository>,
        verifications: Arc<VerificationRepository>,
        metrics: Arc<DeliveryMetrics>,
        delivery: Delivery,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            verifications,
            metrics,
            delivery,
        }
    }

    pub fn start(self: &Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                manager.delivery.retry_sweep_secs,
            ));
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        manager.sweep(OffsetDateTime::now_utc()).await;
                    }
                }
            }
        });
    }

    /// One sweep over all expired verification windows.
    pub async fn sweep(&self, now: OffsetDateTime) {
        let expired = match self.verifications.expired(now).await {
            Ok(expired) => expired,
            Err(e) => {
                error!("failed to list expired verifications: {}", e);
                return;
            }
        };

        for record in expired {
            if let Err(e) = self.handle_expiry(&record, now).await {
                warn!(device_id = %record.device_id, "retry handling failed: {}", e);
            }
        }
    }

    async fn handle_expiry(
        &self,
        record: &VerificationRecord,
        now: OffsetDateTime,
    ) -> Result<(), DeliveryError> {
        let entry = self.queue.find(&record.device_id).await?;

        // A coalesced replacement already cancelled this delivery's intent;
        // the stale verification is dropped without ceremony.
        let Some(entry) = entry.filter(|e| e.queue_id == record.queue_id) else {
            self.verifications
                .delete(&record.device_id, &record.queue_id)
                .await?;
            return Ok(());
        };

        if entry.attempts <= self.delivery.max_retries {
            let delay = retry_delay(
                Duration::seconds(self.delivery.retry_base_delay_secs as i64),
                entry.attempts,
            );
            self.queue
                .requeue_for_retry(
                    &entry.device_id,
                    &entry.queue_id,
                    now + delay,
                    "stuck_downlink",
                )
                .await?;
            self.verifications
                .delete(&record.device_id, &record.queue_id)
                .await?;
            self.metrics.record_retried();
            let stuck = VerifyError::StuckDownlink {
                device_id: entry.device_id.clone(),
            };
            debug!(
                attempts = entry.attempts,
                delay_secs = delay.whole_seconds(),
                "{stuck}, retry scheduled"
            );
        } else {
            self.dead_letters
                .bury(&entry, "max_retries_exceeded", now)
                .await?;
            self.verifications
                .delete(&record.device_id, &record.queue_id)
                .await?;
            self.metrics.record_dead_lettered();
            let exhausted = VerifyError::MaxRetriesExceeded {
                device_id: entry.device_id.clone(),
            };
            error!(
                attempts = entry.attempts,
                "{exhausted}, moved to dead letters"
            );
        }

        Ok(())
    }
}
