mod mqtt;

pub use mqtt::MqttDownlink;

use async_trait::async_trait;
use parksync_api::DownlinkFrame;

use crate::errors::DispatchError;

/// Hand-off point to the LoRaWAN network server.
///
/// The transport only enqueues the frame with the network server; actual
/// radio routing is pinned to the device's last-uplink gateway and cannot
/// be influenced here. The gateway id is advisory context for the broker
/// topic layout.
#[async_trait]
pub trait DownlinkTransport: Send + Sync {
    async fn send(&self, gateway_id: &str, frame: &DownlinkFrame) -> Result<(), DispatchError>;
}
