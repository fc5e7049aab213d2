use std::sync::Arc;

use parksync_api::{
    AdminUpdate, DeviceUplink, GatewayHeartbeat, ReservationUpdate, SensorEvent,
};
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::services::{DisplayStateService, GatewayHealthMonitor};

/// Consumes the broker-side feeds: device uplinks, gateway heartbeats,
/// normalized sensor events, reservation and admin streams.
///
/// Uplinks are forwarded over a channel to the verification engine so the
/// inbound path stays decoupled from the dispatcher's outbound path; the
/// other feeds go straight to their owning service.
pub struct UplinkService {
    client: AsyncClient,
    topic_prefix: String,
    state: Arc<DisplayStateService>,
    health: Arc<GatewayHealthMonitor>,
    uplink_tx: mpsc::Sender<DeviceUplink>,
}

impl UplinkService {
    pub fn new(
        client: AsyncClient,
        topic_prefix: String,
        state: Arc<DisplayStateService>,
        health: Arc<GatewayHealthMonitor>,
        uplink_tx: mpsc::Sender<DeviceUplink>,
    ) -> Self {
        Self {
            client,
            topic_prefix,
            state,
            health,
            uplink_tx,
        }
    }

    pub async fn subscribe_feeds(&self) -> Result<(), rumqttc::ClientError> {
        for suffix in ["uplinks", "heartbeats", "sensors", "reservations", "admin"] {
            let topic = format!("{}/{}/#", self.topic_prefix, suffix);
            self.client.subscribe(&topic, QoS::AtLeastOnce).await?;
            debug!("subscribed to {topic}");
        }

        Ok(())
    }

    /// Drive the shared MQTT event loop until shutdown. rumqttc reconnects
    /// on poll, so errors only get logged and paced.
    pub fn start(self: Arc<Self>, mut event_loop: EventLoop, mut stop_rx: watch::Receiver<bool>) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    polled = event_loop.poll() => match polled {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.route(&publish.topic, &publish.payload).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT error: {}", e);
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        });
    }

    async fn route(&self, topic: &str, payload: &[u8]) {
        let Some(channel) = topic
            .strip_prefix(self.topic_prefix.as_str())
            .and_then(|rest| rest.trim_start_matches('/').split('/').next())
        else {
            return;
        };

        match channel {
            "uplinks" => match serde_json::from_slice::<DeviceUplink>(payload) {
                Ok(uplink) => {
                    if self.uplink_tx.send(uplink).await.is_err() {
                        warn!("verification engine channel closed, dropping uplink");
                    }
                }
                Err(e) => warn!("undecodable uplink on {topic}: {}", e),
            },
            "heartbeats" => match serde_json::from_slice::<GatewayHeartbeat>(payload) {
                Ok(heartbeat) => self.health.observe_heartbeat(&heartbeat).await,
                Err(e) => warn!("undecodable heartbeat on {topic}: {}", e),
            },
            "sensors" => match serde_json::from_slice::<SensorEvent>(payload) {
                Ok(event) => self.state.observe_sensor(&event).await,
                Err(e) => warn!("undecodable sensor event on {topic}: {}", e),
            },
            "reservations" => match serde_json::from_slice::<ReservationUpdate>(payload) {
                Ok(update) => {
                    self.state
                        .update_reservation(
                            &update.space_id,
                            update.status,
                            OffsetDateTime::now_utc(),
                        )
                        .await
                }
                Err(e) => warn!("undecodable reservation update on {topic}: {}", e),
            },
            "admin" => match serde_json::from_slice::<AdminUpdate>(payload) {
                Ok(update) => {
                    self.state
                        .update_admin(&update.space_id, update.flag, OffsetDateTime::now_utc())
                        .await
                }
                Err(e) => warn!("undecodable admin update on {topic}: {}", e),
            },
            other => debug!("ignoring message on unknown channel {other}"),
        }
    }
}
