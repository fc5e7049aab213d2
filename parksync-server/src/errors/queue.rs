#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue storage failure")]
    Database(#[from] sqlx::Error),

    #[error("malformed queued payload for device {device_id}: {detail}")]
    MalformedPayload { device_id: String, detail: String },
}
