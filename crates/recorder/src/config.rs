//! Recorder configuration

use anyhow::{bail, Context, Result};
use recorder_lib::config::RecordingConfig;
use recorder_lib::latency::{IntervalTuning, DEFAULT_LATENCY_MULTIPLIER, DEFAULT_LATENCY_SAMPLES};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "RECORDER_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/recorder.toml";

/// Recorder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecorderConfig {
    /// Name reported in logs and alerts
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// SQLite database holding trigger events and samples
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    #[serde(default = "default_sys_root")]
    pub sys_root: PathBuf,

    /// Alertmanager endpoint; alerts are only logged when unset
    #[serde(default)]
    pub alertmanager_url: Option<String>,

    #[serde(default)]
    pub auto_interval: AutoIntervalConfig,

    #[serde(default)]
    pub recording: RecordingConfig,
}

/// Latency based interval tuning at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AutoIntervalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default)]
    pub set_lowest: bool,
}

impl Default for AutoIntervalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            multiplier: default_multiplier(),
            samples: default_samples(),
            set_lowest: false,
        }
    }
}

impl AutoIntervalConfig {
    pub fn tuning(&self) -> Result<IntervalTuning> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            bail!(
                "auto_interval.multiplier must be a positive finite number, got {}",
                self.multiplier
            );
        }
        Ok(IntervalTuning {
            samples: self.samples,
            multiplier: self.multiplier,
            set_lowest: self.set_lowest,
        })
    }
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_database_path() -> PathBuf {
    PathBuf::from("recordings.sqlite3")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_sys_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_multiplier() -> f64 {
    DEFAULT_LATENCY_MULTIPLIER
}

fn default_samples() -> usize {
    DEFAULT_LATENCY_SAMPLES
}

impl RecorderConfig {
    /// Load configuration from the file named by `RECORDER_CONFIG` (if it
    /// exists) and `RECORDER__*` environment overrides
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("RECORDER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("invalid recorder configuration")
    }
}
