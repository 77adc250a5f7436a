//! Configuration
//!
//! Runtime tunables, read from an optional JSON file. Every field has a
//! default so a partial file (or none at all) is valid.

use crate::core::constants::{
    DEFAULT_EVENT_BUS_CAPACITY, DEFAULT_SCAN_WINDOW, DEFAULT_WATCHDOG_POLL_INTERVAL,
    DEFAULT_WATCHDOG_TIMEOUT,
};
use crate::model::device::DeviceSelector;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "HR_WATCH_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Seconds without a reading before the watchdog reconnects.
    pub watchdog_timeout_secs: u64,
    /// Seconds between two watchdog checks.
    pub watchdog_poll_secs: u64,
    /// Seconds the adapter scans before devices are enumerated.
    pub scan_secs: u64,
    /// Only connect to a device advertising exactly this name.
    pub device_name: Option<String>,
    pub event_bus_capacity: usize,
    /// Append reading lines to this file instead of the log output.
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watchdog_timeout_secs: DEFAULT_WATCHDOG_TIMEOUT.as_secs(),
            watchdog_poll_secs: DEFAULT_WATCHDOG_POLL_INTERVAL.as_secs(),
            scan_secs: DEFAULT_SCAN_WINDOW.as_secs(),
            device_name: None,
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
            log_file: None,
        }
    }
}

impl Config {
    /// Loads the configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&json)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `HR_WATCH_CONFIG`, or the defaults if unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.watchdog_poll_secs == 0 {
            return Err(anyhow!("watchdog_poll_secs must be greater than zero"));
        }
        if self.watchdog_timeout_secs == 0 {
            return Err(anyhow!("watchdog_timeout_secs must be greater than zero"));
        }
        if self.event_bus_capacity == 0 {
            return Err(anyhow!("event_bus_capacity must be greater than zero"));
        }
        Ok(())
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    pub fn watchdog_poll_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_poll_secs)
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn device_selector(&self) -> DeviceSelector {
        DeviceSelector::from_name(self.device_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempdir::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.watchdog_timeout(), Duration::from_secs(60));
        assert_eq!(config.watchdog_poll_interval(), Duration::from_secs(10));
        assert_eq!(config.device_selector(), DeviceSelector::First);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_partial_config_file() {
        let dir = TempDir::new("hr-watch").unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"watchdog_timeout_secs": 30, "device_name": "Polar H10"}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.watchdog_timeout_secs, 30);
        assert_eq!(config.watchdog_poll_secs, 10);
        assert!(config.log_file.is_none());
        assert_eq!(
            config.device_selector(),
            DeviceSelector::ByName("Polar H10".to_string())
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new("hr-watch").unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"watchdog_poll_secs": 0}"#).unwrap();
        assert!(Config::from_file(&path).is_err());

        std::fs::write(&path, "not json").unwrap();
        assert!(Config::from_file(&path).is_err());
        assert!(Config::from_file(&dir.path().join("missing.json")).is_err());
    }
}
