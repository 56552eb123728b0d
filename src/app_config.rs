use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_HEALTH_PATH, DEFAULT_MAX_ATTEMPTS, DEFAULT_UNIT,
    HEALTH_INTERVAL_SECS, HEALTH_TIMEOUT_SECS,
};
use crate::health::HealthSettings;

pub const APP_CONFIG_PATH: &str = ".formulate/config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub pipeline: PipelineSettings,
}

impl AppConfig {
    /// Load from `.formulate/config.json`; a missing file gives defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new(APP_CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn health_settings(&self, base_url: &str) -> HealthSettings {
        HealthSettings {
            path: self.health.path.clone(),
            timeout: Duration::from_secs(self.health.timeout_secs),
            interval: Duration::from_secs(self.health.interval_secs),
            ..HealthSettings::new(base_url)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: HEALTH_INTERVAL_SECS,
            timeout_secs: HEALTH_TIMEOUT_SECS,
            path: DEFAULT_HEALTH_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Directory for the JSONL run journal; no journal when unset.
    pub log_dir: Option<PathBuf>,
    pub default_batch_size: f64,
    pub default_unit: String,
    /// Bound on every completion call made by a stage.
    pub stage_deadline_secs: Option<u64>,
}

impl PipelineSettings {
    pub fn stage_deadline(&self) -> Option<Duration> {
        self.stage_deadline_secs.map(Duration::from_secs)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            log_dir: None,
            default_batch_size: DEFAULT_BATCH_SIZE,
            default_unit: DEFAULT_UNIT.to_string(),
            stage_deadline_secs: None,
        }
    }
}
