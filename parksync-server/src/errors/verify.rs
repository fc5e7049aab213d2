/// Closed-loop verification outcomes that are not a clean match.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("device {device_id} echoed {observed}, expected {expected}")]
    Mismatch {
        device_id: String,
        expected: String,
        observed: String,
    },

    #[error("no uplink for device {device_id} before the verification deadline")]
    StuckDownlink { device_id: String },

    #[error("device {device_id} exhausted its delivery attempts")]
    MaxRetriesExceeded { device_id: String },
}
