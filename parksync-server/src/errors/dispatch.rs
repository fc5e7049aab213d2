/// Conditions hit while trying to move a queue entry onto the radio path.
///
/// `GatewayUnavailable` and `RateLimited` are deferrals, not failures: the
/// entry stays pending and no attempt is recorded against it.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no eligible gateway for device {device_id}")]
    GatewayUnavailable { device_id: String },

    #[error("gateway {gateway_id} is offline")]
    GatewayOffline { gateway_id: String },

    #[error("rate limited on scope {scope}")]
    RateLimited { scope: String },

    #[error("transport rejected downlink: {0}")]
    Transport(String),
}
