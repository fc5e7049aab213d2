use std::collections::HashMap;
use std::sync::Arc;

use parksync_api::{
    AdminFlag, DeviceId, DisplayPayload, Occupancy, Priority, ReservationStatus, SensorEvent,
    SpaceId, TenantId,
};
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::models::{DisplayCommand, DisplayPolicy};
use crate::repositories::{CommandQueueRepository, EnqueueOutcome};
use crate::services::{DeliveryMetrics, DisplayPolicyStore};

/// How long an `unknown` sensor reading keeps showing the last stable color
/// before falling back to the free color.
const UNKNOWN_HOLD: Duration = Duration::seconds(60);

/// Which display device serves a space. The device-to-space mapping is
/// owned elsewhere; this service only consumes it.
#[derive(Debug, Clone)]
pub struct SpaceBinding {
    pub tenant_id: TenantId,
    pub display_device_id: DeviceId,
}

/// Reservation state with the start instant made absolute, so recomputation
/// can notice the reserved-soon threshold without a fresh update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reservation {
    Now,
    From(OffsetDateTime),
    Free,
}

#[derive(Debug, Clone)]
struct PendingFlip {
    reading: Occupancy,
    count: u32,
    first_at: OffsetDateTime,
}

struct SpaceContext {
    accepted: Occupancy,
    pending: Option<PendingFlip>,
    reservation: Reservation,
    admin: AdminFlag,
    /// Last color derived from a known (occupied/vacant) reading.
    last_stable_color: Option<parksync_api::DisplayColor>,
    unknown_since: Option<OffsetDateTime>,
    last_output: Option<DisplayPayload>,
}

impl SpaceContext {
    fn new() -> Self {
        Self {
            accepted: Occupancy::Unknown,
            pending: None,
            reservation: Reservation::Free,
            admin: AdminFlag::Normal,
            last_stable_color: None,
            unknown_since: None,
            last_output: None,
        }
    }

    /// Fixed priority resolution, top-down, first match wins.
    fn resolve(&mut self, policy: &DisplayPolicy, now: OffsetDateTime) -> DisplayPayload {
        if self.admin == AdminFlag::OutOfService {
            return DisplayPayload::new(policy.out_of_service_color, false);
        }
        if self.admin == AdminFlag::Blocked {
            return DisplayPayload::new(policy.blocked_color, false);
        }

        match self.reservation {
            Reservation::Now => return DisplayPayload::new(policy.reserved_color, false),
            Reservation::From(starts_at) => {
                let starts_in = starts_at - now;
                if starts_in <= Duration::seconds(i64::from(policy.reserved_soon_threshold_secs)) {
                    return DisplayPayload::new(
                        policy.reserved_color,
                        policy.blink_on_reserved_soon,
                    );
                }
            }
            Reservation::Free => {}
        }

        match self.accepted {
            Occupancy::Occupied => {
                self.last_stable_color = Some(policy.occupied_color);
                DisplayPayload::new(policy.occupied_color, false)
            }
            Occupancy::Vacant => {
                self.last_stable_color = Some(policy.free_color);
                DisplayPayload::new(policy.free_color, false)
            }
            Occupancy::Unknown => {
                let held = self.unknown_since.is_some_and(|since| now - since <= UNKNOWN_HOLD);
                match self.last_stable_color {
                    Some(color) if held => DisplayPayload::new(color, false),
                    _ => DisplayPayload::new(policy.free_color, false),
                }
            }
        }
    }

    /// Debounce a raw reading; returns true when the accepted state flipped.
    fn observe(&mut self, reading: Occupancy, at: OffsetDateTime, policy: &DisplayPolicy) -> bool {
        if reading == self.accepted {
            self.pending = None;
            return false;
        }

        let window = Duration::seconds(policy.debounce_window_secs as i64);
        let count = match &self.pending {
            Some(flip) if flip.reading == reading && at - flip.first_at <= window => flip.count + 1,
            _ => 1,
        };

        if count >= policy.debounce_count {
            self.accepted = reading;
            self.pending = None;
            self.unknown_since = (reading == Occupancy::Unknown).then_some(at);
            true
        } else {
            let first_at = match &self.pending {
                Some(flip) if flip.reading == reading && at - flip.first_at <= window => {
                    flip.first_at
                }
                _ => at,
            };
            self.pending = Some(PendingFlip {
                reading,
                count,
                first_at,
            });
            false
        }
    }
}

/// Turns sensor, reservation and admin inputs into display commands.
///
/// A command is produced only when the resolved `{color, blink}` differs
/// from the last computed output for the space; recomputation itself is
/// idempotent and side-effect-free.
pub struct DisplayStateService {
    bindings: Arc<RwLock<HashMap<SpaceId, SpaceBinding>>>,
    contexts: Mutex<HashMap<SpaceId, SpaceContext>>,
    policies: Arc<DisplayPolicyStore>,
    queue: Arc<CommandQueueRepository>,
    metrics: Arc<DeliveryMetrics>,
    command_ttl: Duration,
    verified_retention: Duration,
}

impl DisplayStateService {
    pub fn new(
        policies: Arc<DisplayPolicyStore>,
        queue: Arc<CommandQueueRepository>,
        metrics: Arc<DeliveryMetrics>,
        command_ttl: Duration,
        verified_retention: Duration,
    ) -> Self {
        Self {
            bindings: Arc::new(RwLock::new(HashMap::new())),
            contexts: Mutex::new(HashMap::new()),
            policies,
            queue,
            metrics,
            command_ttl,
            verified_retention,
        }
    }

    pub async fn bind_space(&self, space_id: SpaceId, binding: SpaceBinding) {
        let mut bindings = self.bindings.write().await;
        bindings.insert(space_id, binding);
    }

    pub async fn observe_sensor(&self, event: &SensorEvent) {
        let policy = self
            .policies
            .policy_for(&event.tenant_id, event.timestamp)
            .await;

        {
            let mut contexts = self.contexts.lock().await;
            let context = contexts
                .entry(event.space_id.clone())
                .or_insert_with(SpaceContext::new);
            context.observe(event.occupancy, event.timestamp, &policy);
        }

        self.recompute_space(&event.space_id, event.timestamp).await;
    }

    pub async fn update_reservation(
        &self,
        space_id: &str,
        status: ReservationStatus,
        now: OffsetDateTime,
    ) {
        {
            let mut contexts = self.contexts.lock().await;
            let context = contexts
                .entry(space_id.to_string())
                .or_insert_with(SpaceContext::new);
            context.reservation = match status {
                ReservationStatus::ReservedNow => Reservation::Now,
                ReservationStatus::ReservedSoon { starts_in_secs } => {
                    Reservation::From(now + Duration::seconds(i64::from(starts_in_secs)))
                }
                ReservationStatus::Free => Reservation::Free,
            };
        }

        self.recompute_space(space_id, now).await;
    }

    pub async fn update_admin(&self, space_id: &str, flag: AdminFlag, now: OffsetDateTime) {
        {
            let mut contexts = self.contexts.lock().await;
            let context = contexts
                .entry(space_id.to_string())
                .or_insert_with(SpaceContext::new);
            context.admin = flag;
        }

        self.recompute_space(space_id, now).await;
    }

    /// Recompute every tracked space. Run periodically so time-driven
    /// transitions (unknown-hold expiry, reserved-soon drawing near) fire
    /// without a fresh input event.
    pub async fn recompute_all(&self, now: OffsetDateTime) {
        let spaces: Vec<SpaceId> = {
            let contexts = self.contexts.lock().await;
            contexts.keys().cloned().collect()
        };

        for space_id in spaces {
            self.recompute_space(&space_id, now).await;
        }
    }

    async fn recompute_space(&self, space_id: &str, now: OffsetDateTime) {
        let binding = {
            let bindings = self.bindings.read().await;
            bindings.get(space_id).cloned()
        };
        let Some(binding) = binding else {
            debug!(space_id, "no display bound to space, skipping recompute");
            return;
        };

        let policy = self.policies.policy_for(&binding.tenant_id, now).await;

        let (payload, priority) = {
            let mut contexts = self.contexts.lock().await;
            let Some(context) = contexts.get_mut(space_id) else {
                return;
            };

            let payload = context.resolve(&policy, now);
            if context.last_output == Some(payload) {
                return;
            }
            context.last_output = Some(payload);

            // Admin overrides jump the network server's downlink queue.
            let priority = if context.admin == AdminFlag::Normal {
                Priority::Regular
            } else {
                Priority::Emergency
            };

            (payload, priority)
        };

        let command = DisplayCommand::new(
            binding.display_device_id.clone(),
            binding.tenant_id.clone(),
            space_id.to_string(),
            payload,
            priority,
            Some(now + self.command_ttl),
            now,
        );

        match self.queue.enqueue(&command, self.verified_retention, now).await {
            Ok(EnqueueOutcome::Deduplicated) => {
                self.metrics.record_deduplicated();
                debug!(
                    device_id = %command.device_id,
                    "device already shows this state, enqueue suppressed"
                );
            }
            Ok(_) => {
                debug!(
                    device_id = %command.device_id,
                    space_id,
                    color = command.payload.color.as_str(),
                    blink = command.payload.blink,
                    "display command enqueued"
                );
            }
            Err(e) => {
                warn!(space_id, "failed to enqueue display command: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parksync_api::DisplayColor;

    use crate::configs::{Database, SchemaManager, Storage};
    use crate::repositories::DisplayPolicyRepository;

    use super::*;

    async fn setup_service() -> (Arc<Storage>, DisplayStateService) {
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

        let service = DisplayStateService::new(
            Arc::new(DisplayPolicyStore::new(DisplayPolicyRepository::new(
                storage.clone(),
            ))),
            Arc::new(CommandQueueRepository::new(storage.clone())),
            Arc::new(DeliveryMetrics::new()),
            Duration::minutes(30),
            Duration::hours(1),
        );
        service
            .bind_space(
                "space-1".to_string(),
                SpaceBinding {
                    tenant_id: "tenant-1".to_string(),
                    display_device_id: "disp-1".to_string(),
                },
            )
            .await;

        (storage, service)
    }

    fn sensor(occupancy: Occupancy, at: OffsetDateTime) -> SensorEvent {
        SensorEvent {
            device_id: "sensor-1".to_string(),
            space_id: "space-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            occupancy,
            timestamp: at,
        }
    }

    async fn queued_payload(storage: &Arc<Storage>) -> Option<DisplayPayload> {
        let queue = CommandQueueRepository::new(storage.clone());
        match queue.find("disp-1").await.unwrap() {
            Some(entry) => Some(entry.display_payload().unwrap()),
            None => None,
        }
    }

    #[tokio::test]
    async fn debounced_occupied_reading_enqueues_occupied_color() {
        let (storage, service) = setup_service().await;
        let start = OffsetDateTime::now_utc();

        // A space seen for the first time baselines on the free color; one
        // occupied reading is below debounce_count and must not flip it.
        service.observe_sensor(&sensor(Occupancy::Occupied, start)).await;
        let payload = queued_payload(&storage).await.unwrap();
        assert_eq!(payload.color, DisplayColor::Green);

        service
            .observe_sensor(&sensor(Occupancy::Occupied, start + Duration::seconds(2)))
            .await;

        let payload = queued_payload(&storage).await.unwrap();
        assert_eq!(payload.color, DisplayColor::Red);
        assert!(!payload.blink);
    }

    #[tokio::test]
    async fn noisy_flicker_produces_no_output_change() {
        let (storage, service) = setup_service().await;
        let start = OffsetDateTime::now_utc();

        // Settle on occupied first.
        service.observe_sensor(&sensor(Occupancy::Occupied, start)).await;
        service
            .observe_sensor(&sensor(Occupancy::Occupied, start + Duration::seconds(1)))
            .await;
        let queue = CommandQueueRepository::new(storage.clone());
        let settled = queue.find("disp-1").await.unwrap().unwrap();

        // A single vacant blip, then occupied again: below debounce_count.
        service
            .observe_sensor(&sensor(Occupancy::Vacant, start + Duration::seconds(2)))
            .await;
        service
            .observe_sensor(&sensor(Occupancy::Occupied, start + Duration::seconds(3)))
            .await;

        let entry = queue.find("disp-1").await.unwrap().unwrap();
        assert_eq!(entry.queue_id, settled.queue_id);
        assert_eq!(
            entry.display_payload().unwrap().color,
            DisplayColor::Red
        );
    }

    #[tokio::test]
    async fn readings_outside_the_window_reset_the_counter() {
        let (storage, service) = setup_service().await;
        let start = OffsetDateTime::now_utc();

        service.observe_sensor(&sensor(Occupancy::Occupied, start)).await;
        // Second agreeing reading arrives past the 8s default window, so the
        // flip is still not accepted and the display stays on the baseline.
        service
            .observe_sensor(&sensor(Occupancy::Occupied, start + Duration::seconds(20)))
            .await;
        assert_eq!(
            queued_payload(&storage).await.unwrap().color,
            DisplayColor::Green
        );

        // Two agreeing readings inside the window flip it.
        service
            .observe_sensor(&sensor(Occupancy::Occupied, start + Duration::seconds(22)))
            .await;
        assert_eq!(
            queued_payload(&storage).await.unwrap().color,
            DisplayColor::Red
        );
    }

    #[tokio::test]
    async fn priority_table_puts_out_of_service_on_top() {
        let (storage, service) = setup_service().await;
        let start = OffsetDateTime::now_utc();

        service.observe_sensor(&sensor(Occupancy::Occupied, start)).await;
        service
            .observe_sensor(&sensor(Occupancy::Occupied, start + Duration::seconds(1)))
            .await;
        service
            .update_reservation("space-1", ReservationStatus::ReservedNow, start)
            .await;
        service
            .update_admin("space-1", AdminFlag::Blocked, start)
            .await;
        service
            .update_admin("space-1", AdminFlag::OutOfService, start)
            .await;

        let payload = queued_payload(&storage).await.unwrap();
        assert_eq!(payload.color, DisplayColor::Purple);
        assert!(!payload.blink);
    }

    #[tokio::test]
    async fn reserved_soon_blinks_within_threshold_then_frees() {
        let (storage, service) = setup_service().await;
        let start = OffsetDateTime::now_utc();

        service.observe_sensor(&sensor(Occupancy::Vacant, start)).await;
        service
            .observe_sensor(&sensor(Occupancy::Vacant, start + Duration::seconds(1)))
            .await;

        // Reservation 90s out, threshold 120s: reserved color, blinking.
        service
            .update_reservation(
                "space-1",
                ReservationStatus::ReservedSoon { starts_in_secs: 90 },
                start,
            )
            .await;
        let payload = queued_payload(&storage).await.unwrap();
        assert_eq!(payload.color, DisplayColor::Amber);
        assert!(payload.blink);

        // Reservation rescheduled 10 minutes out: back to free.
        service
            .update_reservation(
                "space-1",
                ReservationStatus::ReservedSoon {
                    starts_in_secs: 600,
                },
                start + Duration::seconds(5),
            )
            .await;
        let payload = queued_payload(&storage).await.unwrap();
        assert_eq!(payload.color, DisplayColor::Green);
        assert!(!payload.blink);
    }

    #[tokio::test]
    async fn reserved_soon_fires_later_via_periodic_recompute() {
        let (storage, service) = setup_service().await;
        let start = OffsetDateTime::now_utc();

        service.observe_sensor(&sensor(Occupancy::Vacant, start)).await;
        service
            .observe_sensor(&sensor(Occupancy::Vacant, start + Duration::seconds(1)))
            .await;
        service
            .update_reservation(
                "space-1",
                ReservationStatus::ReservedSoon {
                    starts_in_secs: 600,
                },
                start,
            )
            .await;
        assert_eq!(
            queued_payload(&storage).await.unwrap().color,
            DisplayColor::Green
        );

        // Nine minutes later the start moved inside the threshold.
        service.recompute_all(start + Duration::minutes(9)).await;
        let payload = queued_payload(&storage).await.unwrap();
        assert_eq!(payload.color, DisplayColor::Amber);
        assert!(payload.blink);
    }

    #[tokio::test]
    async fn unknown_holds_last_stable_color_then_falls_back_to_free() {
        let (storage, service) = setup_service().await;
        let start = OffsetDateTime::now_utc();

        service.observe_sensor(&sensor(Occupancy::Occupied, start)).await;
        service
            .observe_sensor(&sensor(Occupancy::Occupied, start + Duration::seconds(1)))
            .await;

        service
            .observe_sensor(&sensor(Occupancy::Unknown, start + Duration::seconds(10)))
            .await;
        service
            .observe_sensor(&sensor(Occupancy::Unknown, start + Duration::seconds(12)))
            .await;

        // Within the hold the display keeps showing occupied.
        let payload = queued_payload(&storage).await.unwrap();
        assert_eq!(payload.color, DisplayColor::Red);

        // Past the hold it falls back to the free color.
        service.recompute_all(start + Duration::seconds(80)).await;
        let payload = queued_payload(&storage).await.unwrap();
        assert_eq!(payload.color, DisplayColor::Green);
    }

    #[tokio::test]
    async fn unbound_space_never_enqueues() {
        let (storage, service) = setup_service().await;
        let start = OffsetDateTime::now_utc();

        let mut event = sensor(Occupancy::Occupied, start);
        event.space_id = "space-unbound".to_string();
        service.observe_sensor(&event).await;
        let mut event = sensor(Occupancy::Occupied, start + Duration::seconds(1));
        event.space_id = "space-unbound".to_string();
        service.observe_sensor(&event).await;

        let queue = CommandQueueRepository::new(storage);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }
}
