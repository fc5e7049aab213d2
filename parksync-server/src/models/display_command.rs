use parksync_api::{DeviceId, DisplayPayload, Priority, SpaceId, TenantId};
use time::OffsetDateTime;

/// One desired display state for one device, produced by the state machine.
///
/// Immutable once created: a newer command for the same device supersedes
/// it in the queue rather than mutating it.
#[derive(Debug, Clone)]
pub struct DisplayCommand {
    pub device_id: DeviceId,
    pub tenant_id: TenantId,
    pub space_id: SpaceId,
    pub payload: DisplayPayload,
    pub content_hash: String,
    pub priority: Priority,
    pub expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl DisplayCommand {
    pub fn new(
        device_id: DeviceId,
        tenant_id: TenantId,
        space_id: SpaceId,
        payload: DisplayPayload,
        priority: Priority,
        expires_at: Option<OffsetDateTime>,
        created_at: OffsetDateTime,
    ) -> Self {
        let content_hash = payload.content_hash();

        Self {
            device_id,
            tenant_id,
            space_id,
            payload,
            content_hash,
            priority,
            expires_at,
            created_at,
        }
    }
}
