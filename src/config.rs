//! Engine-wide configuration for the transfer engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// In-flight part cap for block/multi-part PUT transfers.
    #[serde(default = "default_block_max_concurrency")]
    pub block_max_concurrency: usize,

    /// In-flight asset cap for the form/POST create-asset servlet — the
    /// protocol is sequential per Open Questions (§9): default 1.
    #[serde(default = "default_form_max_concurrency")]
    pub form_max_concurrency: usize,

    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Buffer pool aggregate byte budget.
    #[serde(default = "default_buffer_pool_bytes")]
    pub buffer_pool_bytes: u64,

    /// Buffer pool block size.
    #[serde(default = "default_buffer_block_size")]
    pub buffer_block_size: u64,

    /// Socket timeout applied to every HTTP call.
    #[serde(default = "default_socket_timeout", with = "humantime_serde")]
    pub socket_timeout: Duration,

    /// Default part size used for file-URL random-access writes when no
    /// multipart target is present (§4.3).
    #[serde(default = "default_preferred_part_size")]
    pub preferred_part_size: u64,

    /// Characters the DAM rejects in filenames (`FailUnsupportedAssets`).
    #[serde(default = "default_forbidden_filename_chars")]
    pub forbidden_filename_chars: String,
}

/// Retry engine parameters (§4.4, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Retry any error, not just 5xx/connect/stream errors.
    #[serde(default)]
    pub retry_all_errors: bool,

    /// Maximum elapsed retry budget.
    #[serde(default = "default_retry_max", with = "humantime_serde")]
    pub retry_max: Duration,

    /// Base back-off interval (exponential, full jitter).
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Optional cap on retry attempts, in addition to the elapsed budget.
    #[serde(default = "default_retry_max_count")]
    pub retry_max_count: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            retry_all_errors: false,
            retry_max: default_retry_max(),
            retry_interval: default_retry_interval(),
            retry_max_count: default_retry_max_count(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_block_max_concurrency() -> usize {
    8
}
fn default_form_max_concurrency() -> usize {
    1
}
fn default_buffer_pool_bytes() -> u64 {
    256 * 1024 * 1024
}
fn default_buffer_block_size() -> u64 {
    1024 * 1024
}
fn default_socket_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_preferred_part_size() -> u64 {
    10 * 1024 * 1024
}
fn default_forbidden_filename_chars() -> String {
    ":[]*?\"<>|#%&{}".to_string()
}
fn default_retry_max() -> Duration {
    Duration::from_secs(60)
}
fn default_retry_interval() -> Duration {
    Duration::from_millis(100)
}
fn default_retry_max_count() -> Option<u32> {
    Some(5)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_max_concurrency: default_block_max_concurrency(),
            form_max_concurrency: default_form_max_concurrency(),
            retry: RetryConfig::default(),
            buffer_pool_bytes: default_buffer_pool_bytes(),
            buffer_block_size: default_buffer_block_size(),
            socket_timeout: default_socket_timeout(),
            preferred_part_size: default_preferred_part_size(),
            forbidden_filename_chars: default_forbidden_filename_chars(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: EngineConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables (legacy support).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("TRANSFER_ENGINE_BLOCK_MAX_CONCURRENCY") {
            if let Ok(parsed) = v.parse() {
                config.block_max_concurrency = parsed;
            }
        }
        if let Ok(v) = std::env::var("TRANSFER_ENGINE_FORM_MAX_CONCURRENCY") {
            if let Ok(parsed) = v.parse() {
                config.form_max_concurrency = parsed;
            }
        }
        if let Ok(v) = std::env::var("TRANSFER_ENGINE_BUFFER_POOL_BYTES") {
            if let Ok(parsed) = v.parse() {
                config.buffer_pool_bytes = parsed;
            }
        }
        if let Ok(v) = std::env::var("TRANSFER_ENGINE_RETRY_MAX_COUNT") {
            config.retry.retry_max_count = v.parse().ok();
        }
        if let Ok(v) = std::env::var("TRANSFER_ENGINE_RETRY_ALL_ERRORS") {
            config.retry.retry_all_errors = v == "true" || v == "1";
        }

        config
    }

    /// Load configuration from file if present, otherwise from environment.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("TRANSFER_ENGINE_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["transferengine.toml", "/etc/transferengine/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Thin `serde_with`-style shim so `Duration` fields can use `humantime`
/// strings ("15m", "100ms") in TOML/env without pulling in `serde_with`.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
