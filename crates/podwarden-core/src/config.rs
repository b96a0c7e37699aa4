//! podwarden.toml configuration parser.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults the agents have always shipped with. Command-line flags are
//! layered on top by the daemon.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodwardenConfig {
    pub portal: PortalConfig,
    pub cleaner: CleanerConfig,
    pub scaler: ScalerConfig,
    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// `host:port` of the portal. Takes precedence over `file`.
    pub address: Option<String>,
    /// File whose first line holds the portal coordinate.
    pub file: PathBuf,
    /// Per-request timeout in seconds.
    pub timeout: f64,
    /// Window in seconds during which transport failures are retried.
    pub retry_window: f64,
    /// Initial pause in seconds between retries (doubles up to 2s).
    pub retry_pause: f64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            address: None,
            file: PathBuf::from("/opt/podwarden/.portal"),
            timeout: 10.0,
            retry_window: 5.0,
            retry_pause: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Cluster globs to clean.
    pub clusters: Vec<String>,
    /// Use the globs as-is instead of resolving them through the portal.
    pub literal: bool,
    pub period: f64,
    pub wait: f64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            literal: false,
            period: 60.0,
            wait: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    pub clusters: Vec<String>,
    pub literal: bool,
    /// Desired per-pod metric value.
    pub target: f64,
    /// Dead band around `target` inside which nothing happens.
    pub band: f64,
    pub k_p: f64,
    pub k_i: f64,
    pub k_d: f64,
    /// Upper bound on the instance count.
    pub limit: u32,
    pub period: f64,
    /// One-second metric samples per cycle.
    pub sample_reps: u32,
    /// Metric field read from `poll` records.
    pub metric: String,
    /// Port of the admin HTTP surface.
    pub listen_port: u16,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            literal: false,
            target: 5.0,
            band: 0.5,
            k_p: 1.0,
            k_i: 0.0,
            k_d: 0.0,
            limit: 35,
            period: 30.0,
            sample_reps: 4,
            metric: "threads".to_string(),
            listen_port: 9001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub clusters: Vec<String>,
    pub literal: bool,
    pub period: f64,
    pub wait: f64,
    /// Failed checks tolerated before a stagnant cluster is reported.
    pub checks: u32,
    pub alert_log: PathBuf,
    pub alert_log_max_bytes: u64,
    pub alert_log_backups: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            clusters: vec!["*".to_string()],
            literal: false,
            period: 60.0,
            wait: 10.0,
            checks: 3,
            alert_log: PathBuf::from("/var/log/podwarden/alerts.log"),
            alert_log_max_bytes: 32764,
            alert_log_backups: 3,
        }
    }
}

impl PodwardenConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
