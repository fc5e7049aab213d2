use std::collections::HashMap;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::error;

use crate::errors::PolicyError;
use crate::models::DisplayPolicy;
use crate::repositories::DisplayPolicyRepository;

/// How long a loaded (or defaulted) policy is served before re-reading.
const CACHE_TTL: Duration = Duration::seconds(60);

struct CachedPolicy {
    policy: DisplayPolicy,
    fetched_at: OffsetDateTime,
}

/// Read-only view over per-tenant display policies.
///
/// A missing or malformed policy never blocks the pipeline: the safe
/// default is served instead and the configuration error is logged once
/// per cache period.
pub struct DisplayPolicyStore {
    repository: DisplayPolicyRepository,
    cache: Arc<RwLock<HashMap<String, CachedPolicy>>>,
}

impl DisplayPolicyStore {
    pub fn new(repository: DisplayPolicyRepository) -> Self {
        Self {
            repository,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn policy_for(&self, tenant_id: &str, now: OffsetDateTime) -> DisplayPolicy {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(tenant_id) {
                if now - cached.fetched_at < CACHE_TTL {
                    return cached.policy.clone();
                }
            }
        }

        let policy = self.load(tenant_id).await;

        let mut cache = self.cache.write().await;
        cache.insert(
            tenant_id.to_string(),
            CachedPolicy {
                policy: policy.clone(),
                fetched_at: now,
            },
        );

        policy
    }

    async fn load(&self, tenant_id: &str) -> DisplayPolicy {
        match self.repository.find(tenant_id).await {
            Ok(Some(row)) => match serde_json::from_str::<DisplayPolicy>(&row.policy) {
                Ok(policy) => policy,
                Err(e) => {
                    let config_error = PolicyError::Malformed {
                        tenant_id: tenant_id.to_string(),
                        detail: e.to_string(),
                    };
                    error!("{config_error}, serving safe default");
                    DisplayPolicy::safe_default()
                }
            },
            Ok(None) => {
                let config_error = PolicyError::NotFound {
                    tenant_id: tenant_id.to_string(),
                };
                error!("{config_error}, serving safe default");
                DisplayPolicy::safe_default()
            }
            Err(e) => {
                error!(tenant_id, "display policy lookup failed, serving safe default: {}", e);
                DisplayPolicy::safe_default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parksync_api::DisplayColor;

    use crate::configs::{Database, SchemaManager, Storage};

    use super::*;

    async fn setup_test_db() -> Arc<Storage> {
        Arc::new(
            Storage::new(
                Database {
                    clean_start: true,
                    url: String::from("sqlite::memory:"),
                },
                SchemaManager::default(),
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn configured_policy_is_served() {
        let storage = setup_test_db().await;
        let repo = DisplayPolicyRepository::new(storage.clone());

        let mut policy = DisplayPolicy::safe_default();
        policy.occupied_color = DisplayColor::Purple;
        repo.upsert("tenant-1", &policy, OffsetDateTime::now_utc())
            .await
            .unwrap();

        let store = DisplayPolicyStore::new(DisplayPolicyRepository::new(storage));
        let served = store.policy_for("tenant-1", OffsetDateTime::now_utc()).await;

        assert_eq!(served.occupied_color, DisplayColor::Purple);
    }

    #[tokio::test]
    async fn missing_policy_falls_back_to_safe_default() {
        let storage = setup_test_db().await;
        let store = DisplayPolicyStore::new(DisplayPolicyRepository::new(storage));

        let served = store
            .policy_for("tenant-unconfigured", OffsetDateTime::now_utc())
            .await;

        assert_eq!(served, DisplayPolicy::safe_default());
    }

    #[tokio::test]
    async fn malformed_policy_falls_back_to_safe_default() {
        let storage = setup_test_db().await;

        sqlx::query(
            "INSERT INTO display_policies (tenant_id, policy, updated_at) VALUES ($1, $2, $3)",
        )
        .bind("tenant-1")
        .bind("{not json")
        .bind(OffsetDateTime::now_utc())
        .execute(storage.get_pool())
        .await
        .unwrap();

        let store = DisplayPolicyStore::new(DisplayPolicyRepository::new(storage));
        let served = store.policy_for("tenant-1", OffsetDateTime::now_utc()).await;

        assert_eq!(served, DisplayPolicy::safe_default());
    }
}
