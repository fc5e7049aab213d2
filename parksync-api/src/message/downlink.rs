use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{DisplayPayload, Priority};
use crate::DeviceId;

/// Downlink frame handed to the network server for delivery to one display.
///
/// Routing to a gateway is decided by the network server (last-uplink
/// pinning); the frame itself only names the target device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownlinkFrame {
    /// Command identity, carried through the queue.
    pub command_id: Uuid,
    /// Target display device.
    pub device_id: DeviceId,
    /// Display state to apply.
    pub payload: DisplayPayload,
    /// Scheduling hint for the network server.
    pub priority: Priority,
    /// Frame creation time.
    pub issued_at: OffsetDateTime,
}
