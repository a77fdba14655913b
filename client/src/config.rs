//! Configuration management for the client.

use ferry_engine::Backoff;
use std::env;
use std::time::Duration;

/// Tunables of the sync engine and its durable components.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between periodic sync cycles
    pub sync_interval: Duration,
    /// Operations handed to the remote per drain batch
    pub batch_size: usize,
    /// Live queue bound; the oldest operations are dropped beyond it
    pub queue_capacity: usize,
    /// Byte budget for the blob cache
    pub cache_budget_bytes: u64,
    /// Upper bound for one remote call
    pub request_timeout: Duration,
    /// Delay policy between retries of the same operation
    pub backoff: Backoff,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            batch_size: 50,
            queue_capacity: 1000,
            cache_budget_bytes: 50 * 1024 * 1024,
            request_timeout: Duration::from_secs(15),
            backoff: Backoff::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_cache_budget(mut self, bytes: u64) -> Self {
        self.cache_budget_bytes = bytes;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file
    pub database_path: String,
    /// Base URL of the backend
    pub remote_url: String,
    /// Bearer token for the backend, if any
    pub auth_token: Option<String>,
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_path =
            lookup("FERRY_DATABASE_PATH").unwrap_or_else(|| "ferry.db".to_string());

        let remote_url = lookup("FERRY_REMOTE_URL").ok_or(ConfigError::MissingRemoteUrl)?;

        let auth_token = lookup("FERRY_AUTH_TOKEN");

        let defaults = SyncConfig::default();

        let sync_interval = parse(&lookup, "FERRY_SYNC_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sync_interval);
        let batch_size = parse(&lookup, "FERRY_BATCH_SIZE")?.unwrap_or(defaults.batch_size);
        let queue_capacity =
            parse(&lookup, "FERRY_QUEUE_CAPACITY")?.unwrap_or(defaults.queue_capacity);
        let cache_budget_bytes =
            parse(&lookup, "FERRY_CACHE_BUDGET_BYTES")?.unwrap_or(defaults.cache_budget_bytes);
        let request_timeout = parse(&lookup, "FERRY_REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        let backoff_base = parse(&lookup, "FERRY_BACKOFF_BASE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff.base());
        let backoff_cap = parse(&lookup, "FERRY_BACKOFF_CAP_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff.cap());

        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "FERRY_BATCH_SIZE",
                value: "0".into(),
            });
        }
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "FERRY_QUEUE_CAPACITY",
                value: "0".into(),
            });
        }

        Ok(Self {
            database_path,
            remote_url,
            auth_token,
            sync: SyncConfig {
                sync_interval,
                batch_size,
                queue_capacity,
                cache_budget_bytes,
                request_timeout,
                backoff: Backoff::new(backoff_base, backoff_cap),
            },
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("FERRY_REMOTE_URL environment variable is required")]
    MissingRemoteUrl,

    #[error("Invalid {key} value: {value:?}")]
    Invalid { key: &'static str, value: String },
}
