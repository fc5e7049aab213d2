use time::OffsetDateTime;

use super::Table;

/// Token bucket guarding one dispatch scope (a gateway or a tenant).
///
/// Refill is continuous-rate from `last_refill_at`, never a fixed-interval
/// top-up, and `tokens` never exceeds `capacity`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RateBucket {
    pub scope_key: String,
    pub capacity: f64,
    pub tokens: f64,
    pub refill_per_sec: f64,
    pub last_refill_at: OffsetDateTime,
}

impl RateBucket {
    /// Token balance at `now`, capped at capacity.
    pub fn refilled_tokens(&self, now: OffsetDateTime) -> f64 {
        let elapsed = (now - self.last_refill_at).as_seconds_f64().max(0.0);
        (self.tokens + elapsed * self.refill_per_sec).min(self.capacity)
    }
}

#[derive(Clone)]
pub struct RateBucketTable;

impl Table for RateBucketTable {
    fn name(&self) -> &'static str {
        "rate_buckets"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS rate_buckets (
                scope_key VARCHAR(80) PRIMARY KEY,
                capacity REAL NOT NULL,
                tokens REAL NOT NULL,
                refill_per_sec REAL NOT NULL,
                last_refill_at TIMESTAMP NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS rate_buckets;")
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }
}
