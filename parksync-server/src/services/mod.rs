mod dispatch_service;
mod display_state_service;
mod gateway_health_service;
mod janitor_service;
mod metrics_service;
mod policy_service;
mod retry_service;
mod transport;
mod uplink_service;
mod verification_service;

pub use dispatch_service::DispatchService;
pub use display_state_service::{DisplayStateService, SpaceBinding};
pub use gateway_health_service::{GatewayHealthMonitor, GatewayHealthSnapshot};
pub use janitor_service::QueueJanitor;
pub use metrics_service::{DeliveryMetrics, QueueMetrics};
pub use policy_service::DisplayPolicyStore;
pub use retry_service::RetryManager;
pub use transport::{DownlinkTransport, MqttDownlink};
pub use uplink_service::UplinkService;
pub use verification_service::VerificationEngine;
