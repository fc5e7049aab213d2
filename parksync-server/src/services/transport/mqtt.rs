use std::time::Duration;

use async_trait::async_trait;
use parksync_api::DownlinkFrame;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};

use crate::configs::Broker;
use crate::errors::DispatchError;
use crate::services::DownlinkTransport;

/// Downlink publisher over the network server's MQTT bridge.
pub struct MqttDownlink {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttDownlink {
    /// Returns the publisher and the event loop; the caller owns polling
    /// (the uplink service drives the same connection).
    pub fn connect(broker: &Broker) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(&broker.client_id, &broker.host, broker.port);
        options.set_keep_alive(Duration::from_secs(5));

        let (client, event_loop) = AsyncClient::new(options, 10);

        (
            Self {
                client,
                topic_prefix: broker.topic_prefix.clone(),
            },
            event_loop,
        )
    }

    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }
}

#[async_trait]
impl DownlinkTransport for MqttDownlink {
    async fn send(&self, gateway_id: &str, frame: &DownlinkFrame) -> Result<(), DispatchError> {
        let topic = format!("{}/gateways/{}/down", self.topic_prefix, gateway_id);
        let payload =
            serde_json::to_vec(frame).map_err(|e| DispatchError::Transport(e.to_string()))?;

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))
    }
}
