use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub cache: CacheConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Directory holding the local `Date=YYYY-MM-DD` partitions.
    pub root: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// Mount point of the filesystem-backed remote store.
    pub root_path: String,
    /// Id of the dataset root folder. May point at a shortcut, which is
    /// resolved once at startup.
    #[serde(default = "default_root_id")]
    pub root_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Small on purpose, flaky links drop long transfers.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_percentiles")]
    pub default_percentiles: Vec<u8>,
}

fn default_api_port() -> u16 {
    3000
}

fn default_root_id() -> String {
    String::new()
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    4
}

fn default_chunk_size() -> u64 {
    256 * 1024
}

fn default_percentiles() -> Vec<u8> {
    vec![95, 90, 85]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_percentiles: default_percentiles(),
        }
    }
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APP"));

        // Build the configuration
        let config = builder.build()?;

        // Try to deserialize the entire configuration
        let settings: Settings = config.try_deserialize()?;

        debug!(
            cache_root = %settings.cache.root,
            remote_root = %settings.remote.root_path,
            "Loaded settings"
        );

        Ok(settings)
    }
}
