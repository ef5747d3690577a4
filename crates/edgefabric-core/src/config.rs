//! fabric.toml configuration parser.
//!
//! Durations are written as human strings (`"30s"`, `"500ms"`, `"2m"`)
//! and parsed into [`Duration`] at load time.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub sync: SyncConfig,
    /// Nodes registered at daemon start.
    pub nodes: Vec<NodeDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Failed attempts that are re-enqueued before a task fails terminally.
    pub max_retries: u32,
    #[serde(with = "duration_str")]
    pub execution_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            execution_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// TTL applied when `set` is called without one.
    #[serde(with = "duration_str")]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            default_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Silence longer than this marks a node offline.
    #[serde(with = "duration_str")]
    pub heartbeat_timeout: Duration,
    /// Period of the offline sweep.
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
    /// Reported load above this marks a node degraded.
    pub degraded_threshold: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            degraded_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(with = "duration_str")]
    pub interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDeclaration {
    pub compute_units: u32,
    pub memory_mb: u64,
    pub location: Option<String>,
}

impl FabricConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let config: FabricConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that would stall or disable a subsystem.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.execution_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "scheduler.execution_timeout must be non-zero".into(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be > 0".into()));
        }
        if self.health.heartbeat_timeout.is_zero() || self.health.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "health timeouts must be non-zero".into(),
            ));
        }
        if !(self.health.degraded_threshold > 0.0 && self.health.degraded_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "health.degraded_threshold must be in (0, 1], got {}",
                self.health.degraded_threshold
            )));
        }
        if self.sync.interval.is_zero() {
            return Err(ConfigError::Invalid("sync.interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parse a duration string like `"5s"`, `"500ms"` or `"2m"`.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        let m = mins.trim().parse::<u64>().map_err(|_| invalid())?;
        m.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid)
    } else if let Some(hours) = s.strip_suffix('h') {
        let h = hours.trim().parse::<u64>().map_err(|_| invalid())?;
        h.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid)
    } else {
        Err(invalid())
    }
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
