use std::collections::HashSet;
use std::sync::Arc;

use parksync_api::DownlinkFrame;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::configs::Delivery;
use crate::errors::{DeliveryError, DispatchError, QueueError};
use crate::models::{GatewayStatus, QueueEntry, VerificationRecord};
use crate::repositories::{
    CommandQueueRepository, DeadLetterRepository, DeviceAffinityRepository, RateBucketRepository,
    VerificationRepository,
};
use crate::services::{DeliveryMetrics, DownlinkTransport, GatewayHealthMonitor};

/// Entries pulled per worker pass.
const BATCH_SIZE: i64 = 16;
/// How long a no-affinity or offline-gateway entry waits before the next look.
const GATEWAY_DEFER: Duration = Duration::seconds(30);

/// Worker pool draining the command queue under rate-limit, affinity and
/// gateway-health constraints.
pub struct DispatchService {
    queue: Arc<CommandQueueRepository>,
    dead_letters: Arc<DeadLetterRepository>,
    affinity: Arc<DeviceAffinityRepository>,
    verifications: Arc<VerificationRepository>,
    rate: Arc<RateBucketRepository>,
    health: Arc<GatewayHealthMonitor>,
    transport: Arc<dyn DownlinkTransport>,
    metrics: Arc<DeliveryMetrics>,
    delivery: Delivery,
    /// Per-device mutual exclusion across workers: a coalesced replacement
    /// must never race an in-progress transmission for the same device.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl DispatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<CommandQueueRepository>,
        dead_letters: Arc<DeadLetterRepository>,
        affinity: Arc<DeviceAffinityRepository>,
        verifications: Arc<VerificationRepository>,
        rate: Arc<RateBucketRepository>,
        health: Arc<GatewayHealthMonitor>,
        transport: Arc<dyn DownlinkTransport>,
        metrics: Arc<DeliveryMetrics>,
        delivery: Delivery,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            affinity,
            verifications,
            rate,
            health,
            transport,
            metrics,
            delivery,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Spawn the worker pool. Workers stop when `stop_rx` flips to true.
    pub fn start(self: &Arc<Self>, stop_rx: watch::Receiver<bool>) {
        for worker in 0..self.delivery.worker_count {
            let service = self.clone();
            let mut stop_rx = stop_rx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_millis(
                    service.delivery.poll_interval_ms,
                ));
                loop {
                    tokio::select! {
                        _ = stop_rx.changed() => {
                            debug!(worker, "dispatch worker stopping");
                            break;
                        }
                        _ = interval.tick() => {
                            service.run_pass().await;
                        }
                    }
                }
            });
        }
    }

    /// One dispatcher pass: pull eligible entries and try each one. Every
    /// per-command failure is isolated to that entry.
    pub async fn run_pass(&self) {
        let now = OffsetDateTime::now_utc();
        let entries = match self.queue.fetch_eligible(now, BATCH_SIZE).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("failed to fetch eligible queue entries: {}", e);
                return;
            }
        };

        for entry in entries {
            let device_id = entry.device_id.clone();

            {
                let mut in_flight = self.in_flight.lock().await;
                if !in_flight.insert(device_id.clone()) {
                    continue;
                }
            }

            if let Err(e) = self.process_entry(entry).await {
                warn!(device_id = %device_id, "dispatch attempt failed: {}", e);
            }

            let mut in_flight = self.in_flight.lock().await;
            in_flight.remove(&device_id);
        }
    }

    async fn process_entry(&self, entry: QueueEntry) -> Result<(), DeliveryError> {
        let now = OffsetDateTime::now_utc();

        if entry.is_expired(now) {
            debug!(device_id = %entry.device_id, "dropping expired command");
            self.queue.remove(&entry.device_id, &entry.queue_id).await?;
            return Ok(());
        }

        let payload = match entry.display_payload() {
            Ok(payload) => payload,
            Err(QueueError::MalformedPayload { detail, .. }) => {
                error!(device_id = %entry.device_id, "queued payload is malformed: {detail}");
                self.dead_letters.bury(&entry, "malformed_payload", now).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Downlink rides whichever gateway heard the device last; without an
        // uplink on record there is nothing to route through.
        let Some(affinity) = self.affinity.find(&entry.device_id).await? else {
            let deferral = DispatchError::GatewayUnavailable {
                device_id: entry.device_id.clone(),
            };
            debug!(device_id = %entry.device_id, "{deferral}, deferring");
            self.metrics.record_gateway_deferral();
            self.queue
                .defer(&entry.device_id, &entry.queue_id, now + GATEWAY_DEFER)
                .await?;
            return Ok(());
        };

        let snapshot = self.health.snapshot(now).await;
        if snapshot.status(&affinity.current_gateway_id) == Some(GatewayStatus::Offline) {
            let deferral = DispatchError::GatewayOffline {
                gateway_id: affinity.current_gateway_id.clone(),
            };
            warn!(
                device_id = %entry.device_id,
                "{deferral}, downlink deferred (degraded redundancy)"
            );
            self.metrics.record_gateway_deferral();
            self.queue
                .defer(&entry.device_id, &entry.queue_id, now + GATEWAY_DEFER)
                .await?;
            return Ok(());
        }

        if let Some(limited) = self
            .acquire_rate_tokens(&affinity.current_gateway_id, &entry.tenant_id, now)
            .await?
        {
            // Advisory throttling: the entry stays pending, no attempt is
            // recorded, the next pass picks it up again.
            debug!(device_id = %entry.device_id, "{limited}, dispatch deferred");
            self.metrics.record_rate_limited();
            return Ok(());
        }

        if !self
            .queue
            .claim_for_dispatch(&entry.device_id, &entry.queue_id, now)
            .await?
        {
            // Coalesced or claimed elsewhere between fetch and claim.
            self.refund_rate_tokens(&affinity.current_gateway_id, &entry.tenant_id).await;
            return Ok(());
        }
        let attempts_now = entry.attempts + 1;

        let frame = DownlinkFrame {
            command_id: Uuid::parse_str(&entry.queue_id).unwrap_or_else(|_| Uuid::new_v4()),
            device_id: entry.device_id.clone(),
            payload,
            priority: entry.priority(),
            issued_at: now,
        };

        match self.transport.send(&affinity.current_gateway_id, &frame).await {
            Ok(()) => {
                let deadline =
                    now + Duration::seconds(self.delivery.verification_timeout_secs as i64);
                self.verifications
                    .create(&VerificationRecord {
                        device_id: entry.device_id.clone(),
                        queue_id: entry.queue_id.clone(),
                        expected_content_hash: entry.content_hash.clone(),
                        expected_sequence_floor: affinity.last_counter,
                        deadline,
                        dispatched_at: now,
                    })
                    .await?;
                self.queue
                    .mark_awaiting_verification(&entry.device_id, &entry.queue_id)
                    .await?;
                self.metrics.record_dispatched();
                debug!(
                    device_id = %entry.device_id,
                    gateway_id = %affinity.current_gateway_id,
                    attempt = attempts_now,
                    "downlink submitted"
                );
                Ok(())
            }
            Err(DispatchError::Transport(detail)) => {
                self.handle_transport_failure(&entry, attempts_now, &detail, now)
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_transport_failure(
        &self,
        entry: &QueueEntry,
        attempts_now: i64,
        detail: &str,
        now: OffsetDateTime,
    ) -> Result<(), DeliveryError> {
        warn!(
            device_id = %entry.device_id,
            attempt = attempts_now,
            "transport submit failed: {detail}"
        );

        if attempts_now > self.delivery.max_retries {
            // Re-read so the buried row carries the final attempt count.
            if let Some(fresh) = self.queue.find(&entry.device_id).await? {
                if fresh.queue_id == entry.queue_id {
                    self.dead_letters.bury(&fresh, "max_retries_exceeded", now).await?;
                    self.metrics.record_dead_lettered();
                    error!(
                        device_id = %entry.device_id,
                        "command dead-lettered after repeated transport failures"
                    );
                }
            }
            return Ok(());
        }

        let delay = retry_delay(
            Duration::seconds(self.delivery.retry_base_delay_secs as i64),
            attempts_now,
        );
        self.queue
            .requeue_for_retry(
                &entry.device_id,
                &entry.queue_id,
                now + delay,
                &format!("transport: {detail}"),
            )
            .await?;
        self.metrics.record_retried();
        Ok(())
    }

    /// Both scopes must yield a token; a half-acquired pair is refunded.
    /// Returns the blocking scope as a `RateLimited` deferral, if any.
    async fn acquire_rate_tokens(
        &self,
        gateway_id: &str,
        tenant_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<DispatchError>, QueueError> {
        let gateway_scope = format!("gateway:{gateway_id}");
        let tenant_scope = format!("tenant:{tenant_id}");

        self.rate
            .ensure(
                &gateway_scope,
                self.delivery.gateway_rate_per_min,
                self.delivery.gateway_rate_per_min / 60.0,
                now,
            )
            .await?;
        self.rate
            .ensure(
                &tenant_scope,
                self.delivery.tenant_rate_per_min,
                self.delivery.tenant_rate_per_min / 60.0,
                now,
            )
            .await?;

        if !self.rate.try_acquire(&gateway_scope, now).await? {
            return Ok(Some(DispatchError::RateLimited {
                scope: gateway_scope,
            }));
        }
        if !self.rate.try_acquire(&tenant_scope, now).await? {
            self.rate.refund(&gateway_scope).await?;
            return Ok(Some(DispatchError::RateLimited {
                scope: tenant_scope,
            }));
        }

        Ok(None)
    }

    async fn refund_rate_tokens(&self, gateway_id: &str, tenant_id: &str) {
        for scope in [format!("gateway:{gateway_id}"), format!("tenant:{tenant_id}")] {
            if let Err(e) = self.rate.refund(&scope).await {
                warn!(scope = %scope, "failed to refund rate token: {}", e);
            }
        }
    }
}

/// Delay before the next attempt: `base * 2^(attempts - 1)`, so attempts
/// 1, 2, 3 wait 30s, 60s, 120s at the default base.
pub fn retry_delay(base: Duration, attempts_completed: i64) -> Duration {
    let exponent = (attempts_completed - 1).clamp(0, 16) as u32;
    base * 2i32.pow(exponent)
}
