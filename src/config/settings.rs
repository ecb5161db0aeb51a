use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub consume: ConsumeConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// "redis" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_redis_url")]
    pub url: String,
}

/// Connection-level behavior shared by every queue opened on it.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Prefix of the connection name; a random token is appended
    #[serde(default = "default_connection_tag")]
    pub tag: String,
    /// How often the heartbeat key is rewritten (ms)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Expiry of the heartbeat key (ms), must exceed the interval
    #[serde(default = "default_heartbeat_ttl_ms")]
    pub heartbeat_ttl_ms: u64,
    /// Consecutive heartbeat failures after which consuming stops
    #[serde(default = "default_heartbeat_error_limit")]
    pub heartbeat_error_limit: u32,
    /// Delay between attempts of a failing store operation (ms)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Capacity of the diagnostics channel created by the binary
    #[serde(default = "default_error_channel_capacity")]
    pub error_channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumeConfig {
    #[serde(default = "default_prefetch_limit")]
    pub prefetch_limit: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Interval between liveness sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,
}

fn default_store_backend() -> String {
    "redis".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_connection_tag() -> String {
    "cleaner".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    1_000 // 1 second
}

fn default_heartbeat_ttl_ms() -> u64 {
    60_000 // 1 minute
}

fn default_heartbeat_error_limit() -> u32 {
    45 // stop consuming 15 seconds before the heartbeat expires
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

fn default_error_channel_capacity() -> usize {
    10
}

fn default_prefetch_limit() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_sweep_interval() -> u64 {
    60
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("store.backend", "redis")?
            .set_default("store.url", "redis://localhost:6379")?
            .set_default("connection.tag", "cleaner")?
            .set_default("sweep.interval_seconds", 60)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // MQR__STORE__URL, MQR__CONNECTION__HEARTBEAT_TTL_MS, etc.
            .add_source(
                Environment::with_prefix("MQR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl ConnectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl ConsumeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: default_redis_url(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            tag: default_connection_tag(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_ttl_ms: default_heartbeat_ttl_ms(),
            heartbeat_error_limit: default_heartbeat_error_limit(),
            retry_interval_ms: default_retry_interval_ms(),
            error_channel_capacity: default_error_channel_capacity(),
        }
    }
}

impl Default for ConsumeConfig {
    fn default() -> Self {
        Self {
            prefetch_limit: default_prefetch_limit(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_sweep_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let connection = ConnectionConfig::default();
        assert_eq!(connection.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(connection.heartbeat_ttl(), Duration::from_secs(60));
        assert!(connection.heartbeat_ttl() > connection.heartbeat_interval());
        assert_eq!(connection.retry_interval(), Duration::from_secs(1));
        assert_eq!(connection.error_channel_capacity, 10);

        let store = StoreConfig::default();
        assert_eq!(store.backend, "redis");
        assert_eq!(store.url, "redis://localhost:6379");
    }

    #[test]
    fn test_consume_defaults() {
        let consume = ConsumeConfig::default();
        assert_eq!(consume.prefetch_limit, 10);
        assert_eq!(consume.poll_interval(), Duration::from_millis(100));
    }
}
