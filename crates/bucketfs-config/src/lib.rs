//! Gateway configuration: the recognized option set, TOML loading with
//! serde defaults, validation, and a hot-swappable shared handle.

mod manager;

pub use manager::ConfigManager;

use bucketfs_logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The full set of options the gateway recognizes.
///
/// Unset fields take the defaults below; unknown keys are rejected so a
/// typo in a config file fails loudly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Bucket to project as the filesystem root.
    #[serde(default)]
    pub bucket: String,

    /// Zone/region the bucket lives in.
    #[serde(default)]
    pub zone: String,

    /// Backend host name.
    #[serde(default = "default_host")]
    pub host: String,

    /// `http` or `https`.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the credentials file handed to the backend SDK.
    #[serde(default = "default_credentials")]
    pub credentials_file: String,

    /// Number of worker threads serving backend calls.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Base per-transaction timeout in milliseconds; transfer and list
    /// timeouts are scaled from this value.
    #[serde(default = "default_transaction_time_ms")]
    pub transaction_time_ms: u64,

    /// Maximum retry attempts for a retriable failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Cap on objects listed per directory; 0 lists everything.
    #[serde(default)]
    pub max_list_count: u64,

    /// Bound on cached stat entries.
    #[serde(default = "default_max_stat_entries")]
    pub max_stat_entries: usize,

    /// Extra token appended to the SDK user-agent string.
    #[serde(default)]
    pub additional_agent: String,

    /// Mode bits for synthesized directory entries.
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,

    /// Mode bits for file entries the backend reports no mode for.
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_host() -> String {
    "object.storage.local".into()
}

fn default_protocol() -> String {
    "https".into()
}

fn default_port() -> u16 {
    443
}

fn default_credentials() -> String {
    "/etc/bucketfs/credentials".into()
}

fn default_pool_size() -> usize {
    5
}

fn default_transaction_time_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_stat_entries() -> usize {
    20_000
}

fn default_dir_mode() -> u32 {
    0o755
}

fn default_file_mode() -> u32 {
    0o644
}

impl Default for GatewayConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config must deserialize from defaults")
    }
}

impl GatewayConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() {
            return Err(ConfigError::Invalid("bucket must be set".into()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.transaction_time_ms == 0 {
            return Err(ConfigError::Invalid(
                "transaction_time_ms must be positive".into(),
            ));
        }
        if self.max_stat_entries == 0 {
            return Err(ConfigError::Invalid(
                "max_stat_entries must be positive".into(),
            ));
        }
        match self.protocol.as_str() {
            "http" | "https" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "unsupported protocol {other:?}"
            ))),
        }
    }
}
