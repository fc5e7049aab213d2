use std::sync::Arc;

use parksync_api::DeviceUplink;
use time::{Duration, OffsetDateTime};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::configs::{Delivery, Storage};
use crate::errors::QueueError;
use crate::models::{DeadLetter, DisplayCommand};
use crate::repositories::{
    CommandQueueRepository, DeadLetterRepository, DeviceAffinityRepository,
    DisplayPolicyRepository, EnqueueOutcome, RateBucketRepository, VerificationRepository,
    VerifiedHashRepository,
};
use crate::services::{
    DeliveryMetrics, DispatchService, DisplayPolicyStore, DisplayStateService, DownlinkTransport,
    GatewayHealthMonitor, QueueJanitor, QueueMetrics, RetryManager, VerificationEngine,
};

/// Buffered uplinks between the broker loop and the verification engine.
const UPLINK_CHANNEL_CAPACITY: usize = 256;

/// The assembled delivery subsystem plus the surface exposed to
/// collaborators: enqueue, metrics, dead-letter inspection and flushing.
pub struct DeliveryApp {
    state: Arc<DisplayStateService>,
    queue: Arc<CommandQueueRepository>,
    dead_letters: Arc<DeadLetterRepository>,
    verifications: Arc<VerificationRepository>,
    verified_hashes: Arc<VerifiedHashRepository>,
    dispatcher: Arc<DispatchService>,
    retry: Arc<RetryManager>,
    janitor: Arc<QueueJanitor>,
    verification_engine: Arc<VerificationEngine>,
    health: Arc<GatewayHealthMonitor>,
    metrics: Arc<DeliveryMetrics>,
    delivery: Delivery,
    uplink_tx: mpsc::Sender<DeviceUplink>,
    uplink_rx: Option<mpsc::Receiver<DeviceUplink>>,
    stop_tx: watch::Sender<bool>,
}

impl DeliveryApp {
    pub fn new(
        storage: Arc<Storage>,
        transport: Arc<dyn DownlinkTransport>,
        delivery: Delivery,
    ) -> Self {
        let queue = Arc::new(CommandQueueRepository::new(storage.clone()));
        let dead_letters = Arc::new(DeadLetterRepository::new(storage.clone()));
        let affinity = Arc::new(DeviceAffinityRepository::new(storage.clone()));
        let verifications = Arc::new(VerificationRepository::new(storage.clone()));
        let verified_hashes = Arc::new(VerifiedHashRepository::new(storage.clone()));
        let rate = Arc::new(RateBucketRepository::new(storage.clone()));
        let metrics = Arc::new(DeliveryMetrics::new());
        let health = Arc::new(GatewayHealthMonitor::new(Duration::seconds(
            delivery.offline_after_secs as i64,
        )));

        let policies = Arc::new(DisplayPolicyStore::new(DisplayPolicyRepository::new(
            storage.clone(),
        )));
        let state = Arc::new(DisplayStateService::new(
            policies,
            queue.clone(),
            metrics.clone(),
            Duration::seconds(delivery.command_ttl_secs as i64),
            Duration::seconds(delivery.verified_hash_retention_secs as i64),
        ));

        let dispatcher = Arc::new(DispatchService::new(
            queue.clone(),
            dead_letters.clone(),
            affinity.clone(),
            verifications.clone(),
            rate,
            health.clone(),
            transport,
            metrics.clone(),
            delivery.clone(),
        ));
        let retry = Arc::new(RetryManager::new(
            queue.clone(),
            dead_letters.clone(),
            verifications.clone(),
            metrics.clone(),
            delivery.clone(),
        ));
        let janitor = Arc::new(QueueJanitor::new(
            queue.clone(),
            dead_letters.clone(),
            verifications.clone(),
            verified_hashes.clone(),
            health.clone(),
            metrics.clone(),
            delivery.clone(),
        ));
        let verification_engine = Arc::new(VerificationEngine::new(
            queue.clone(),
            affinity,
            verifications.clone(),
            verified_hashes.clone(),
            metrics.clone(),
        ));

        let (uplink_tx, uplink_rx) = mpsc::channel(UPLINK_CHANNEL_CAPACITY);
        let (stop_tx, _) = watch::channel(false);

        Self {
            state,
            queue,
            dead_letters,
            verifications,
            verified_hashes,
            dispatcher,
            retry,
            janitor,
            verification_engine,
            health,
            metrics,
            delivery,
            uplink_tx,
            uplink_rx: Some(uplink_rx),
            stop_tx,
        }
    }

    /// Spawn the worker pool and the periodic tasks. Idempotent only in the
    /// sense that a second call finds the uplink channel already taken.
    pub fn start(&mut self) {
        let stop_rx = self.stop_tx.subscribe();

        self.dispatcher.start(stop_rx.clone());
        self.retry.start(stop_rx.clone());
        self.janitor.start(stop_rx.clone());

        if let Some(uplink_rx) = self.uplink_rx.take() {
            self.verification_engine.start(uplink_rx, stop_rx.clone());
        }

        // Gateway health refresh: re-derive statuses and log transitions.
        let health = self.health.clone();
        let mut health_stop = stop_rx.clone();
        let refresh_secs = self.delivery.health_refresh_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(refresh_secs));
            loop {
                tokio::select! {
                    _ = health_stop.changed() => break,
                    _ = interval.tick() => {
                        health.refresh(OffsetDateTime::now_utc()).await;
                    }
                }
            }
        });

        // Periodic recompute: unknown-hold expiry and reserved-soon
        // thresholds fire without a fresh input event.
        let state = self.state.clone();
        let mut recompute_stop = stop_rx;
        let recompute_secs = self.delivery.recompute_interval_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(recompute_secs));
            loop {
                tokio::select! {
                    _ = recompute_stop.changed() => break,
                    _ = interval.tick() => {
                        state.recompute_all(OffsetDateTime::now_utc()).await;
                    }
                }
            }
        });

        info!(
            workers = self.delivery.worker_count,
            "command delivery pipeline started"
        );
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn state(&self) -> Arc<DisplayStateService> {
        self.state.clone()
    }

    pub fn health(&self) -> Arc<GatewayHealthMonitor> {
        self.health.clone()
    }

    pub fn uplink_sender(&self) -> mpsc::Sender<DeviceUplink> {
        self.uplink_tx.clone()
    }

    pub fn stop_subscriber(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Idempotent enqueue for collaborators that computed a display state
    /// themselves (the state machine uses the same path internally).
    pub async fn enqueue(&self, command: &DisplayCommand) -> Result<EnqueueOutcome, QueueError> {
        let outcome = self
            .queue
            .enqueue(
                command,
                Duration::seconds(self.delivery.verified_hash_retention_secs as i64),
                OffsetDateTime::now_utc(),
            )
            .await?;

        if outcome == EnqueueOutcome::Deduplicated {
            self.metrics.record_deduplicated();
        }

        Ok(outcome)
    }

    pub async fn queue_metrics(&self) -> Result<QueueMetrics, QueueError> {
        let pending = self.queue.depth().await?;
        let dead = self.dead_letters.depth().await?;

        Ok(self.metrics.snapshot(pending, dead))
    }

    /// Operator remediation for a stuck device: dead-letter whatever is
    /// queued and forget the verified state so the next command flows.
    pub async fn flush_device(&self, device_id: &str) -> Result<bool, QueueError> {
        let now = OffsetDateTime::now_utc();

        let Some(entry) = self.queue.find(device_id).await? else {
            self.verified_hashes.invalidate(device_id).await?;
            return Ok(false);
        };

        self.dead_letters.bury(&entry, "operator_flush", now).await?;
        self.verifications.delete(device_id, &entry.queue_id).await?;
        self.verified_hashes.invalidate(device_id).await?;
        self.metrics.record_dead_lettered();
        info!(device_id, "operator flushed queued command to dead letters");

        Ok(true)
    }

    /// Dead-letter listing for operator review.
    pub async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        self.dead_letters.list(limit).await
    }

    /// Operator replay of the most recent dead letter for a device.
    pub async fn requeue_dead_letter(
        &self,
        device_id: &str,
    ) -> Result<Option<String>, QueueError> {
        self.dead_letters
            .requeue_device(device_id, OffsetDateTime::now_utc())
            .await
    }
}
