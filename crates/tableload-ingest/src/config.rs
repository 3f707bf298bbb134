//! Load configuration
//!
//! Values come from the environment (and a `.env` file when present); the
//! binary layers command line flags on top before calling `validate`.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tableload_common::{LoadError, Result};

// ============================================================================
// Load Constants
// ============================================================================

/// Partition key prefix used when none is given.
pub const DEFAULT_PARTITION_KEY_PREFIX: &str = "Batch";

/// Default number of units allowed to run at once.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Upper bound on `max_workers`: the permit ceiling of the scheduler's semaphore.
pub const MAX_WORKERS_LIMIT: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Largest number of entities the store accepts in one transaction.
pub const MAX_TRANSACTION_SIZE: usize = 100;

/// Records synthesized per unit. Always equal to the transaction ceiling.
pub const DEFAULT_BATCH_SIZE: usize = MAX_TRANSACTION_SIZE;

/// Default number of units in a run.
pub const DEFAULT_NUM_BATCHES: usize = 100;

/// Consecutive unit indexes sharing one partition key.
pub const PARTITION_GROUP_SIZE: usize = 50;

/// Attempts per unit before a throttled unit is given up.
pub const MAX_RETRIES: u32 = 30;

/// Linear backoff step: the wait before retry `n` is `n * RETRY_STEP_SECS`.
pub const RETRY_STEP_SECS: u64 = 2;

// ============================================================================
// Store Constants
// ============================================================================

/// Default table the records land in.
pub const DEFAULT_TABLE_NAME: &str = "orders";

/// Default gateway URL for the HTTP store.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:10002";

/// Default per-request timeout for the HTTP store, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Resolved parameters of one load run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Prefix of every partition key (`{prefix}_{index / 50}`)
    pub partition_key_prefix: String,

    /// Concurrency cap on running units
    pub max_workers: usize,

    /// Records per unit
    pub batch_size: usize,

    /// Number of units
    pub num_batches: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            partition_key_prefix: DEFAULT_PARTITION_KEY_PREFIX.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            num_batches: DEFAULT_NUM_BATCHES,
        }
    }
}

impl LoadConfig {
    /// Load from `TABLELOAD_PARTITION_PREFIX`, `TABLELOAD_MAX_WORKERS` and
    /// `TABLELOAD_NUM_BATCHES`, falling back to the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            partition_key_prefix: std::env::var("TABLELOAD_PARTITION_PREFIX")
                .unwrap_or_else(|_| DEFAULT_PARTITION_KEY_PREFIX.to_string()),
            max_workers: env_or("TABLELOAD_MAX_WORKERS", DEFAULT_MAX_WORKERS)?,
            batch_size: DEFAULT_BATCH_SIZE,
            num_batches: env_or("TABLELOAD_NUM_BATCHES", DEFAULT_NUM_BATCHES)?,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.partition_key_prefix.trim().is_empty() {
            return Err(LoadError::config("partition key prefix must not be empty"));
        }
        if self.max_workers == 0 {
            return Err(LoadError::config("max workers must be greater than 0"));
        }
        if self.max_workers > MAX_WORKERS_LIMIT {
            return Err(LoadError::config(format!(
                "max workers must not exceed {}, got {}",
                MAX_WORKERS_LIMIT, self.max_workers
            )));
        }
        if self.num_batches == 0 {
            return Err(LoadError::config("number of batches must be greater than 0"));
        }
        if self.batch_size != MAX_TRANSACTION_SIZE {
            return Err(LoadError::config(format!(
                "batch size must equal the store transaction ceiling ({}), got {}",
                MAX_TRANSACTION_SIZE, self.batch_size
            )));
        }
        Ok(())
    }

    /// Total records the run is expected to write
    pub fn expected_records(&self) -> u64 {
        (self.batch_size as u64) * (self.num_batches as u64)
    }
}

/// Which store implementation backs the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process table, optionally with simulated throttling
    #[default]
    Memory,
    /// Table gateway reached over HTTP
    Http,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreKind::Memory),
            "http" => Ok(StoreKind::Http),
            _ => Err(anyhow::anyhow!("Invalid store kind: {}", s)),
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "memory"),
            StoreKind::Http => write!(f, "http"),
        }
    }
}

/// Store connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub endpoint: String,
    pub table_name: String,
    /// Bearer token sent by the HTTP store
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    /// Probability in `[0, 1]` that the memory store answers with backpressure
    pub throttle_rate: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            api_token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            throttle_rate: 0.0,
        }
    }
}

impl StoreConfig {
    /// Load from the `TABLELOAD_STORE`, `TABLELOAD_ENDPOINT`, `TABLELOAD_TABLE`,
    /// `TABLELOAD_API_TOKEN`, `TABLELOAD_TIMEOUT_SECS` and
    /// `TABLELOAD_THROTTLE_RATE` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let kind = match std::env::var("TABLELOAD_STORE") {
            Ok(raw) => raw.parse()?,
            Err(_) => StoreKind::default(),
        };

        Ok(Self {
            kind,
            endpoint: std::env::var("TABLELOAD_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            table_name: std::env::var("TABLELOAD_TABLE")
                .unwrap_or_else(|_| DEFAULT_TABLE_NAME.to_string()),
            api_token: std::env::var("TABLELOAD_API_TOKEN").ok(),
            request_timeout_secs: env_or("TABLELOAD_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            throttle_rate: env_or("TABLELOAD_THROTTLE_RATE", 0.0)?,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(LoadError::config("table name must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.throttle_rate) {
            return Err(LoadError::config(format!(
                "throttle rate must be within [0, 1], got {}",
                self.throttle_rate
            )));
        }
        if self.kind == StoreKind::Http {
            if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
                return Err(LoadError::config(format!(
                    "endpoint must be an http(s) URL, got '{}'",
                    self.endpoint
                )));
            }
            if self.request_timeout_secs == 0 {
                return Err(LoadError::config("request timeout must be greater than 0"));
            }
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}
