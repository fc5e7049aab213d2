use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::DisplayPayload;
use crate::{DeviceId, GatewayId};

/// Decoded status uplink from a display device.
///
/// The device echoes the last display state it applied together with its
/// internal apply counter; both feed closed-loop delivery verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUplink {
    /// Reporting device.
    pub device_id: DeviceId,
    /// Last display state the firmware applied.
    pub applied: DisplayPayload,
    /// Monotonic apply counter maintained by the firmware.
    pub applied_counter: i64,
    /// Gateway that received this uplink.
    pub gateway_id: GatewayId,
    /// Receive time.
    pub timestamp: OffsetDateTime,
}
