/// Display policy problems. Never fatal: the state machine falls back to
/// the safe default policy and keeps the pipeline moving.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("no display policy configured for tenant {tenant_id}")]
    NotFound { tenant_id: String },

    #[error("display policy for tenant {tenant_id} failed to parse: {detail}")]
    Malformed { tenant_id: String, detail: String },

    #[error("policy storage failure")]
    Database(#[from] sqlx::Error),
}
