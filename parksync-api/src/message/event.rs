use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{DeviceId, GatewayId, SpaceId, TenantId};

/// Raw occupancy reading reported by a space sensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    Occupied,
    Vacant,
    Unknown,
}

/// Normalized sensor event, deduplicated upstream by device and frame counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEvent {
    /// Reporting sensor device.
    pub device_id: DeviceId,
    /// Space the sensor watches.
    pub space_id: SpaceId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Raw occupancy reading.
    pub occupancy: Occupancy,
    /// Reading time.
    pub timestamp: OffsetDateTime,
}

/// Reservation state of a space, as computed by the reservation engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// A reservation is active right now.
    ReservedNow,
    /// A reservation starts within the given number of seconds.
    ReservedSoon { starts_in_secs: u32 },
    /// No upcoming reservation.
    Free,
}

/// Administrative override on a space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminFlag {
    Normal,
    Blocked,
    OutOfService,
}

/// Reservation stream message for one space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationUpdate {
    pub space_id: SpaceId,
    pub status: ReservationStatus,
}

/// Admin override stream message for one space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUpdate {
    pub space_id: SpaceId,
    pub flag: AdminFlag,
}

/// Periodic gateway liveness report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayHeartbeat {
    pub gateway_id: GatewayId,
    pub last_seen_at: OffsetDateTime,
}
