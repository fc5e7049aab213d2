use std::sync::Arc;

use time::OffsetDateTime;

use crate::configs::Storage;
use crate::errors::PolicyError;
use crate::models::{DisplayPolicy, DisplayPolicyRow};

pub struct DisplayPolicyRepository {
    storage: Arc<Storage>,
}

impl DisplayPolicyRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn find(&self, tenant_id: &str) -> Result<Option<DisplayPolicyRow>, PolicyError> {
        let row: Option<DisplayPolicyRow> =
            sqlx::query_as("SELECT * FROM display_policies WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(self.storage.get_pool())
                .await?;

        Ok(row)
    }

    /// Seed or replace a tenant policy. The delivery core itself never
    /// calls this; it exists for deployment tooling and tests.
    pub async fn upsert(
        &self,
        tenant_id: &str,
        policy: &DisplayPolicy,
        now: OffsetDateTime,
    ) -> Result<(), PolicyError> {
        let blob = serde_json::to_string(policy).map_err(|e| PolicyError::Malformed {
            tenant_id: tenant_id.to_string(),
            detail: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO display_policies (tenant_id, policy, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT(tenant_id) DO UPDATE SET
                policy = excluded.policy,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(&blob)
        .bind(now)
        .execute(self.storage.get_pool())
        .await?;

        Ok(())
    }
}
