use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::MONITOR_NAMES;

/// Percentage loss of each counter that is still considered noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub mac_percent: f64,
    pub arp_percent: f64,
    pub routes_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            mac_percent: 30.0,
            arp_percent: 30.0,
            routes_percent: 5.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub thresholds: Thresholds,
    pub output_dir: PathBuf,
    /// Previously captured baseline to import instead of learning one.
    pub baseline_dir: Option<PathBuf>,
    pub reconnect_delay: Duration,
    pub query_timeout: Duration,
    /// Upper bound on monitors querying the device at the same time.
    pub parallelism: usize,
    /// Monitor names to run; empty means all of them.
    pub monitors: Vec<String>,
    pub detailed: bool,
    /// Stop after this many reported cycles.
    pub max_cycles: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            output_dir: PathBuf::from("."),
            baseline_dir: None,
            reconnect_delay: Duration::from_secs(30),
            query_timeout: Duration::from_secs(120),
            parallelism: 8,
            monitors: Vec::new(),
            detailed: false,
            max_cycles: None,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            ("mac_percent", self.thresholds.mac_percent),
            ("arp_percent", self.thresholds.arp_percent),
            ("routes_percent", self.thresholds.routes_percent),
        ];
        for (name, value) in thresholds {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be within 0..=100, got {value}")));
            }
        }
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid("parallelism must be at least 1".to_string()));
        }
        if let Some(unknown) = self.monitors.iter().find(|name| !MONITOR_NAMES.contains(&name.as_str())) {
            return Err(ConfigError::Invalid(format!(
                "unknown monitor `{unknown}` (known: {})",
                MONITOR_NAMES.join(", ")
            )));
        }
        Ok(())
    }

    pub fn is_enabled(&self, monitor: &str) -> bool {
        self.monitors.is_empty() || self.monitors.iter().any(|name| name == monitor)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// On-disk TOML configuration. Every table is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub device: DeviceSection,
    pub thresholds: Thresholds,
    pub output: OutputSection,
    pub monitoring: MonitoringSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub host: Option<String>,
    pub helper: Option<PathBuf>,
    pub helper_args: Vec<String>,
    pub fixture_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub dir: Option<PathBuf>,
    pub baseline_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    pub reconnect_delay_secs: Option<u64>,
    pub query_timeout_secs: Option<u64>,
    pub parallelism: Option<usize>,
    pub monitors: Vec<String>,
    pub detailed: bool,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        let defaults = MonitorConfig::default();
        MonitorConfig {
            thresholds: self.thresholds,
            output_dir: self.output.dir.clone().unwrap_or(defaults.output_dir),
            baseline_dir: self.output.baseline_dir.clone(),
            reconnect_delay: self
                .monitoring
                .reconnect_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_delay),
            query_timeout: self
                .monitoring
                .query_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.query_timeout),
            parallelism: self.monitoring.parallelism.unwrap_or(defaults.parallelism),
            monitors: self.monitoring.monitors.clone(),
            detailed: self.monitoring.detailed,
            max_cycles: None,
        }
    }
}
