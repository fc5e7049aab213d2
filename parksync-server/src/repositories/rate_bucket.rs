use std::sync::Arc;

use time::OffsetDateTime;

use crate::configs::Storage;
use crate::errors::QueueError;
use crate::models::RateBucket;

/// Optimistic-concurrency attempts before giving a token up for this pass.
const CAS_RETRIES: usize = 3;

pub struct RateBucketRepository {
    storage: Arc<Storage>,
}

impl RateBucketRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Create the bucket for a scope if it does not exist, starting full.
    pub async fn ensure(
        &self,
        scope_key: &str,
        capacity: f64,
        refill_per_sec: f64,
        now: OffsetDateTime,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO rate_buckets (scope_key, capacity, tokens, refill_per_sec, last_refill_at)
            VALUES ($1, $2, $2, $3, $4)
            ON CONFLICT(scope_key) DO NOTHING
            "#,
        )
        .bind(scope_key)
        .bind(capacity)
        .bind(refill_per_sec)
        .bind(now)
        .execute(self.storage.get_pool())
        .await?;

        Ok(())
    }

    /// Take one token from the scope's bucket.
    ///
    /// Refill-then-take runs as a compare-and-swap against the previously
    /// read token balance, retried a few times under contention; losing the
    /// race repeatedly counts as not having a token this pass.
    pub async fn try_acquire(
        &self,
        scope_key: &str,
        now: OffsetDateTime,
    ) -> Result<bool, QueueError> {
        for _ in 0..CAS_RETRIES {
            let bucket: Option<RateBucket> =
                sqlx::query_as("SELECT * FROM rate_buckets WHERE scope_key = $1")
                    .bind(scope_key)
                    .fetch_optional(self.storage.get_pool())
                    .await?;

            let Some(bucket) = bucket else {
                // Unconfigured scope is unthrottled.
                return Ok(true);
            };

            let refilled = bucket.refilled_tokens(now);
            let (next_tokens, acquired) = if refilled >= 1.0 {
                (refilled - 1.0, true)
            } else {
                (refilled, false)
            };

            let result = sqlx::query(
                r#"
                UPDATE rate_buckets
                SET tokens = $1, last_refill_at = $2
                WHERE scope_key = $3 AND tokens = $4 AND last_refill_at = $5
                "#,
            )
            .bind(next_tokens)
            .bind(now)
            .bind(scope_key)
            .bind(bucket.tokens)
            .bind(bucket.last_refill_at)
            .execute(self.storage.get_pool())
            .await?;

            if result.rows_affected() == 1 {
                return Ok(acquired);
            }
        }

        Ok(false)
    }

    /// Return a token taken for a dispatch that was abandoned before any
    /// transmission (e.g. the second scope's bucket was empty).
    pub async fn refund(&self, scope_key: &str) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE rate_buckets SET tokens = MIN(capacity, tokens + 1) WHERE scope_key = $1",
        )
        .bind(scope_key)
        .execute(self.storage.get_pool())
        .await?;

        Ok(())
    }
}
