use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use parksync_api::{DownlinkFrame, GatewayHeartbeat};
use parksync_server::app::DeliveryApp;
use parksync_server::configs::schema::SchemaManager;
use parksync_server::configs::settings::{Database, Delivery};
use parksync_server::configs::storage::Storage;
use parksync_server::errors::DispatchError;
use parksync_server::repositories::{
    CommandQueueRepository, DeadLetterRepository, DeviceAffinityRepository,
    DisplayPolicyRepository, RateBucketRepository, VerificationRepository,
    VerifiedHashRepository,
};
use parksync_server::services::{
    DeliveryMetrics, DispatchService, DisplayPolicyStore, DisplayStateService, DownlinkTransport,
    GatewayHealthMonitor, QueueJanitor, RetryManager, SpaceBinding, VerificationEngine,
};

/// Transport double that records every frame instead of talking to a broker.
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, DownlinkFrame)>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<(String, DownlinkFrame)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl DownlinkTransport for RecordingTransport {
    async fn send(&self, gateway_id: &str, frame: &DownlinkFrame) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Transport("connection refused".to_string()));
        }

        let mut sent = self.sent.lock().await;
        sent.push((gateway_id.to_string(), frame.clone()));
        Ok(())
    }
}

/// Fully wired delivery pipeline over in-memory storage, with the periodic
/// tasks left unstarted so tests step each stage deterministically.
pub struct MockApp {
    pub storage: Arc<Storage>,
    pub delivery: Delivery,
    pub transport: Arc<RecordingTransport>,
    pub metrics: Arc<DeliveryMetrics>,
    pub health: Arc<GatewayHealthMonitor>,
    pub queue: Arc<CommandQueueRepository>,
    pub dead_letters: Arc<DeadLetterRepository>,
    pub affinity: Arc<DeviceAffinityRepository>,
    pub verifications: Arc<VerificationRepository>,
    pub verified_hashes: Arc<VerifiedHashRepository>,
    pub state: Arc<DisplayStateService>,
    pub dispatcher: Arc<DispatchService>,
    pub retry: Arc<RetryManager>,
    pub janitor: Arc<QueueJanitor>,
    pub verification_engine: Arc<VerificationEngine>,
}

impl MockApp {
    pub async fn new() -> Self {
        Self::with_delivery(Delivery::default()).await
    }

    pub async fn with_delivery(delivery: Delivery) -> Self {
        let storage = Arc::new(
            Storage::new(
                Database {
                    clean_start: true,
                    url: String::from("sqlite::memory:"),
                },
                SchemaManager::default(),
            )
            .await
            .unwrap(),
        );

        let transport = Arc::new(RecordingTransport::new());
        let metrics = Arc::new(DeliveryMetrics::new());
        let health = Arc::new(GatewayHealthMonitor::new(Duration::seconds(
            delivery.offline_after_secs as i64,
        )));

        let queue = Arc::new(CommandQueueRepository::new(storage.clone()));
        let dead_letters = Arc::new(DeadLetterRepository::new(storage.clone()));
        let affinity = Arc::new(DeviceAffinityRepository::new(storage.clone()));
        let verifications = Arc::new(VerificationRepository::new(storage.clone()));
        let verified_hashes = Arc::new(VerifiedHashRepository::new(storage.clone()));
        let rate = Arc::new(RateBucketRepository::new(storage.clone()));

        let state = Arc::new(DisplayStateService::new(
            Arc::new(DisplayPolicyStore::new(DisplayPolicyRepository::new(
                storage.clone(),
            ))),
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
            transport.clone(),
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
            affinity.clone(),
            verifications.clone(),
            verified_hashes.clone(),
            metrics.clone(),
        ));

        Self {
            storage,
            delivery,
            transport,
            metrics,
            health,
            queue,
            dead_letters,
            affinity,
            verifications,
            verified_hashes,
            state,
            dispatcher,
            retry,
            janitor,
            verification_engine,
        }
    }

    /// The collaborator-facing facade over the same storage.
    pub fn facade(&self) -> DeliveryApp {
        DeliveryApp::new(
            self.storage.clone(),
            self.transport.clone(),
            self.delivery.clone(),
        )
    }

    pub async fn bind_space(&self, space_id: &str, tenant_id: &str, display_device_id: &str) {
        self.state
            .bind_space(
                space_id.to_string(),
                SpaceBinding {
                    tenant_id: tenant_id.to_string(),
                    display_device_id: display_device_id.to_string(),
                },
            )
            .await;
    }

    /// Pin a device to a gateway and mark that gateway recently heard.
    pub async fn pin_device(&self, device_id: &str, gateway_id: &str, counter: i64) {
        let now = OffsetDateTime::now_utc();
        self.affinity
            .record_uplink(device_id, gateway_id, counter, now)
            .await
            .unwrap();
        self.health
            .observe_heartbeat(&GatewayHeartbeat {
                gateway_id: gateway_id.to_string(),
                last_seen_at: now,
            })
            .await;
    }
}
