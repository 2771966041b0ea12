//! Bus timing configuration
//!
//! Every interval the bus and the facade wait on lives here so a slow host
//! stack can be accommodated without rebuilding. Stored as TOML; missing
//! keys take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Wait after kicking off discovery for a device with no services
    pub discovery_barrier_ms: u64,
    /// Back-off of the notification task after an empty or transient read
    pub notify_retry_ms: u64,
    /// How long one READ_NOTIFICATION request blocks before IO_TIMEOUT
    pub notification_read_timeout_ms: u64,
    /// Bound on waiting for a notification task to exit
    pub notify_stop_timeout_ms: u64,
    /// BluetoothLEDevice connection-status sampling interval
    pub connection_poll_ms: u64,
    /// Advertisement watcher namespace scan interval
    pub watcher_poll_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            discovery_barrier_ms: 500,
            notify_retry_ms: 50,
            notification_read_timeout_ms: 1000,
            notify_stop_timeout_ms: 5000,
            connection_poll_ms: 100,
            watcher_poll_ms: 1000,
        }
    }
}

impl BusConfig {
    pub fn discovery_barrier(&self) -> Duration {
        Duration::from_millis(self.discovery_barrier_ms)
    }

    pub fn notify_retry(&self) -> Duration {
        Duration::from_millis(self.notify_retry_ms)
    }

    pub fn notification_read_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_read_timeout_ms)
    }

    pub fn notify_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_stop_timeout_ms)
    }

    pub fn connection_poll(&self) -> Duration {
        Duration::from_millis(self.connection_poll_ms)
    }

    pub fn watcher_poll(&self) -> Duration {
        Duration::from_millis(self.watcher_poll_ms)
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bthle")
            .join("bus.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> Result<Self, BusError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| BusError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| BusError::Config(format!("{}: {e}", path.display())))
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> Result<(), BusError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BusError::Config(format!("{}: {e}", parent.display())))?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| BusError::Config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| BusError::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.discovery_barrier(), Duration::from_millis(500));
        assert_eq!(config.notify_retry(), Duration::from_millis(50));
        assert_eq!(config.notify_stop_timeout(), Duration::from_secs(5));
        assert_eq!(config.connection_poll(), Duration::from_millis(100));
        assert_eq!(config.watcher_poll(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config: BusConfig = toml::from_str("discovery_barrier_ms = 20\n").unwrap();
        assert_eq!(config.discovery_barrier_ms, 20);
        assert_eq!(config.notify_retry_ms, 50);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bus.toml");
        assert_eq!(BusConfig::load(&path).unwrap(), BusConfig::default());

        let config = BusConfig {
            watcher_poll_ms: 250,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(BusConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_default_path_ends_with_bus_toml() {
        assert!(BusConfig::default_path().ends_with("bthle/bus.toml"));
    }
}
