use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

/// MQTT broker fronting the LoRaWAN network server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broker {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic namespace, e.g. `parksync/v1`.
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub clean_start: bool,
    pub url: String,
}

/// Tuning knobs for the command delivery pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Parallel dispatch workers.
    #[serde(default = "Delivery::default_worker_count")]
    pub worker_count: usize,
    /// Idle wait between dispatcher passes, in milliseconds.
    #[serde(default = "Delivery::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a dispatched command may wait for its uplink echo.
    #[serde(default = "Delivery::default_verification_timeout_secs")]
    pub verification_timeout_secs: u64,
    /// Retries after the initial attempt before dead-lettering.
    #[serde(default = "Delivery::default_max_retries")]
    pub max_retries: i64,
    /// First retry delay; doubles on every further retry.
    #[serde(default = "Delivery::default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
    /// Sweep interval for expired verification deadlines.
    #[serde(default = "Delivery::default_retry_sweep_secs")]
    pub retry_sweep_secs: u64,
    /// Per-gateway downlink budget, tokens per minute.
    #[serde(default = "Delivery::default_gateway_rate_per_min")]
    pub gateway_rate_per_min: f64,
    /// Per-tenant downlink budget, tokens per minute.
    #[serde(default = "Delivery::default_tenant_rate_per_min")]
    pub tenant_rate_per_min: f64,
    /// Gateway is considered offline after this much heartbeat silence.
    #[serde(default = "Delivery::default_offline_after_secs")]
    pub offline_after_secs: u64,
    /// Gateway health log sweep interval.
    #[serde(default = "Delivery::default_health_refresh_secs")]
    pub health_refresh_secs: u64,
    /// Janitor pass interval.
    #[serde(default = "Delivery::default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
    /// Queue entries older than this behind an offline gateway get flushed.
    #[serde(default = "Delivery::default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Upper bound on retained dead letters; oldest evicted first.
    #[serde(default = "Delivery::default_dead_letter_capacity")]
    pub dead_letter_capacity: i64,
    /// Verified-hash retention; identical commands re-send after this window.
    #[serde(default = "Delivery::default_verified_hash_retention_secs")]
    pub verified_hash_retention_secs: u64,
    /// Commands not dispatched within this window are dropped as stale.
    #[serde(default = "Delivery::default_command_ttl_secs")]
    pub command_ttl_secs: u64,
    /// Recompute cadence for held/expiring space states.
    #[serde(default = "Delivery::default_recompute_interval_secs")]
    pub recompute_interval_secs: u64,
}

impl Delivery {
    fn default_worker_count() -> usize {
        4
    }

    fn default_poll_interval_ms() -> u64 {
        500
    }

    fn default_verification_timeout_secs() -> u64 {
        15
    }

    fn default_max_retries() -> i64 {
        3
    }

    fn default_retry_base_delay_secs() -> u64 {
        30
    }

    fn default_retry_sweep_secs() -> u64 {
        5
    }

    fn default_gateway_rate_per_min() -> f64 {
        30.0
    }

    fn default_tenant_rate_per_min() -> f64 {
        10.0
    }

    fn default_offline_after_secs() -> u64 {
        300
    }

    fn default_health_refresh_secs() -> u64 {
        30
    }

    fn default_janitor_interval_secs() -> u64 {
        300
    }

    fn default_stale_after_secs() -> u64 {
        600
    }

    fn default_dead_letter_capacity() -> i64 {
        1000
    }

    fn default_verified_hash_retention_secs() -> u64 {
        3600
    }

    fn default_command_ttl_secs() -> u64 {
        1800
    }

    fn default_recompute_interval_secs() -> u64 {
        20
    }
}

impl Default for Delivery {
    fn default() -> Self {
        Self {
            worker_count: Self::default_worker_count(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            verification_timeout_secs: Self::default_verification_timeout_secs(),
            max_retries: Self::default_max_retries(),
            retry_base_delay_secs: Self::default_retry_base_delay_secs(),
            retry_sweep_secs: Self::default_retry_sweep_secs(),
            gateway_rate_per_min: Self::default_gateway_rate_per_min(),
            tenant_rate_per_min: Self::default_tenant_rate_per_min(),
            offline_after_secs: Self::default_offline_after_secs(),
            health_refresh_secs: Self::default_health_refresh_secs(),
            janitor_interval_secs: Self::default_janitor_interval_secs(),
            stale_after_secs: Self::default_stale_after_secs(),
            dead_letter_capacity: Self::default_dead_letter_capacity(),
            verified_hash_retention_secs: Self::default_verified_hash_retention_secs(),
            command_ttl_secs: Self::default_command_ttl_secs(),
            recompute_interval_secs: Self::default_recompute_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub broker: Broker,
    pub database: Database,
    #[serde(default)]
    pub delivery: Delivery,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or("development".into());

        Config::builder()
            .add_source(File::with_name("configs/default"))
            .add_source(File::with_name(&format!("configs/{run_mode}")).required(false))
            .add_source(Environment::default().separator("_"))
            .build()?
            .try_deserialize()
    }
}
