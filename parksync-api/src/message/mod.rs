mod display;
mod downlink;
mod event;
mod uplink;

pub use display::{DisplayColor, DisplayPayload};
pub use downlink::DownlinkFrame;
pub use event::{
    AdminFlag, AdminUpdate, GatewayHeartbeat, Occupancy, ReservationStatus, ReservationUpdate,
    SensorEvent,
};
pub use uplink::DeviceUplink;

use serde::{Deserialize, Serialize};

/// Message Priority Levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Follow the normal lifecycle
    Regular,
    /// Emergency operations that override all others
    Emergency,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Regular => "regular",
            Priority::Emergency => "emergency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "regular" => Some(Priority::Regular),
            "emergency" => Some(Priority::Emergency),
            _ => None,
        }
    }
}
