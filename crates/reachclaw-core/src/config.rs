//! ReachClaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ReachClawError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReachClawConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

impl ReachClawConfig {
    /// Load config from the default path (~/.reachclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReachClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ReachClawError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ReachClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the ReachClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reachclaw")
    }

    /// Default SQLite database path (~/.reachclaw/reachclaw.db).
    pub fn default_db_path() -> PathBuf {
        Self::home_dir().join("reachclaw.db")
    }
}

/// Gateway (dashboard API) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Control-loop and retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between control-loop ticks.
    #[serde(default = "default_tick_secs")]
    pub tick_interval_secs: u64,
    /// Max tasks pulled from the scheduler per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// An in_flight task older than this reverts to pending.
    #[serde(default = "default_lease_secs")]
    pub lease_timeout_secs: u64,
    /// Max execution attempts before a task is failed terminally.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff (doubles per attempt).
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    /// Cap on the backoff delay.
    #[serde(default = "default_retry_cap_secs")]
    pub retry_cap_secs: u64,
    /// Jitter as a fraction of the capped delay (0.0..=1.0).
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,
    /// Timeout for a single external platform or content call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Outer-loop backoff when the store is unavailable.
    #[serde(default = "default_storage_backoff")]
    pub storage_backoff_secs: u64,
}

fn default_tick_secs() -> u64 {
    30
}
fn default_batch_size() -> usize {
    10
}
fn default_lease_secs() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_base_secs() -> u64 {
    60
}
fn default_retry_cap_secs() -> u64 {
    3600
}
fn default_jitter() -> f64 {
    0.2
}
fn default_call_timeout() -> u64 {
    30
}
fn default_storage_backoff() -> u64 {
    15
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_secs(),
            batch_size: default_batch_size(),
            lease_timeout_secs: default_lease_secs(),
            max_attempts: default_max_attempts(),
            retry_base_secs: default_retry_base_secs(),
            retry_cap_secs: default_retry_cap_secs(),
            jitter_factor: default_jitter(),
            call_timeout_secs: default_call_timeout(),
            storage_backoff_secs: default_storage_backoff(),
        }
    }
}

/// Rate-limit ceilings. A value of 0 means "no limit" for that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections_per_day: u32,
    #[serde(default = "default_max_interactions")]
    pub max_interactions_per_day: u32,
    #[serde(default = "default_max_messages")]
    pub max_messages_per_day: u32,
    #[serde(default = "default_max_requests_hour")]
    pub max_requests_per_hour: u32,
    /// Minimum minutes between consecutive actions against one target.
    #[serde(default = "default_interaction_interval")]
    pub interaction_interval_minutes: u32,
}

fn default_max_connections() -> u32 {
    39
}
fn default_max_interactions() -> u32 {
    100
}
fn default_max_messages() -> u32 {
    50
}
fn default_max_requests_hour() -> u32 {
    60
}
fn default_interaction_interval() -> u32 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_connections_per_day: default_max_connections(),
            max_interactions_per_day: default_max_interactions(),
            max_messages_per_day: default_max_messages(),
            max_requests_per_hour: default_max_requests_hour(),
            interaction_interval_minutes: default_interaction_interval(),
        }
    }
}

/// Content collaborator (AI generation) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_content_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_content_model")]
    pub model: String,
    #[serde(default = "default_content_temperature")]
    pub temperature: f32,
    #[serde(default = "default_content_timeout")]
    pub timeout_secs: u64,
}

fn default_content_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn default_content_model() -> String {
    "gpt-4o-mini".into()
}
fn default_content_temperature() -> f32 {
    0.7
}
fn default_content_timeout() -> u64 {
    45
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_content_endpoint(),
            api_key: String::new(),
            model: default_content_model(),
            temperature: default_content_temperature(),
            timeout_secs: default_content_timeout(),
        }
    }
}

/// External platform automation bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the browser-automation bridge service.
    #[serde(default = "default_platform_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_platform_timeout")]
    pub timeout_secs: u64,
}

fn default_platform_url() -> String {
    "http://localhost:8900".into()
}
fn default_platform_timeout() -> u64 {
    30
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            api_key: String::new(),
            timeout_secs: default_platform_timeout(),
        }
    }
}
