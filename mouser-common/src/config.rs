//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variable consulted for the root folder
pub const ROOT_FOLDER_ENV: &str = "MOUSER_ROOT_FOLDER";

/// Contents of `config.toml`
///
/// Every table is optional; missing keys take the compiled defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding experiment files
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub listener: ListenerConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. "info" or "mouser_cohort=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Scan listener timing
///
/// The read timeout bounds one blocking read; the poll interval is the
/// back-off after a read that returned nothing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Bound of the notification queue handed to the presentation layer
    pub notification_capacity: usize,
    /// Scanner device path (serial device node or FIFO)
    pub device_path: Option<PathBuf>,
    /// Line settings applied when the device is a serial port
    pub serial: SerialConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 250,
            poll_interval_ms: 50,
            notification_capacity: 64,
            device_path: None,
            serial: SerialConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// `software` is XON/XOFF, `hardware` is RTS/CTS
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

/// `[listener.serial]` table
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// 5 to 8
    pub data_bits: u8,
    pub parity: Parity,
    /// 1 or 2
    pub stop_bits: u8,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::Config("listener.serial.baud_rate must be > 0".to_string()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(Error::Config(format!(
                "listener.serial.data_bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(Error::Config(format!(
                "listener.serial.stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

impl ListenerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject values that would make the listener spin or never read
    pub fn validate(&self) -> Result<()> {
        if self.read_timeout_ms == 0 {
            return Err(Error::Config("listener.read_timeout_ms must be > 0".to_string()));
        }
        if self.notification_capacity == 0 {
            return Err(Error::Config(
                "listener.notification_capacity must be > 0".to_string(),
            ));
        }
        self.serial.validate()
    }
}

/// SQLite connection settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            max_connections: 5,
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config.toml: {}", e)))?;
        config.listener.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit path or the platform default location
    ///
    /// A missing file is not an error: a warning is logged and defaults are used.
    /// A file that exists but does not parse is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => {
                    warn!("Could not determine config directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }
}

/// `<config_dir>/mouser/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mouser").join("config.toml"))
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable `MOUSER_ROOT_FOLDER`
/// 3. TOML config `root_folder`
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mouser"))
        .unwrap_or_else(|| PathBuf::from("./mouser_data"))
}

/// Path of an experiment file inside the root folder
pub fn experiment_file(root_folder: &Path, experiment: &str) -> PathBuf {
    let file_name = if experiment.ends_with(".mouser") {
        experiment.to_string()
    } else {
        format!("{}.mouser", experiment)
    };
    root_folder.join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_durations() {
        let listener = ListenerConfig::default();
        assert_eq!(listener.read_timeout(), Duration::from_millis(250));
        assert_eq!(listener.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_serial_defaults_are_9600_8n1() {
        let serial = SerialConfig::default();
        assert_eq!(serial.baud_rate, 9600);
        assert_eq!(serial.data_bits, 8);
        assert_eq!(serial.parity, Parity::None);
        assert_eq!(serial.stop_bits, 1);
        assert!(serial.validate().is_ok());
    }

    #[test]
    fn test_experiment_file_extension() {
        let root = Path::new("/data");
        assert_eq!(experiment_file(root, "trial"), PathBuf::from("/data/trial.mouser"));
        assert_eq!(
            experiment_file(root, "trial.mouser"),
            PathBuf::from("/data/trial.mouser")
        );
    }
}
