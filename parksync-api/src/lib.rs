pub mod message;

pub use message::*;

/// LoRaWAN device EUI, hex-encoded.
pub type DeviceId = String;
/// Gateway EUI, hex-encoded.
pub type GatewayId = String;
/// Tenant identifier.
pub type TenantId = String;
/// Parking space identifier.
pub type SpaceId = String;
