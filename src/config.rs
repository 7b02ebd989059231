//! Configuration for sensor-window.

use crate::source::{BaudRate, Mode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "sensor-window";

/// Longest horizon accepted for retention, the window or a query (one year).
pub const MAX_HORIZON_MINUTES: i64 = 365 * 24 * 60;

/// Main configuration for the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding retained readings
    pub db_path: PathBuf,

    /// Directory for persisted statistics
    pub data_path: PathBuf,

    /// Age after which stored readings are purged
    pub retention_minutes: i64,

    /// Width of the in-memory display window
    pub window_minutes: i64,

    /// Producer selected at startup
    pub mode: Mode,

    /// Live link settings
    pub serial: SerialConfig,

    /// How often the live link is polled
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Time between synthetic readings
    #[serde(with = "duration_serde")]
    pub generate_interval: Duration,

    /// How often the retention sweep runs
    #[serde(with = "duration_serde")]
    pub purge_interval: Duration,

    /// Refuse to run when the store cannot be opened
    pub storage_required: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            db_path: data_dir.join("sensor_data.db"),
            data_path: data_dir,
            retention_minutes: 60,
            window_minutes: 10,
            mode: Mode::Hardware,
            serial: SerialConfig::default(),
            poll_interval: Duration::from_millis(100),
            generate_interval: Duration::from_millis(1000),
            purge_interval: Duration::from_secs(60),
            storage_required: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Where ingest statistics are persisted.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("ingest_stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        horizon("retention_minutes", self.retention_minutes)?;
        horizon("window_minutes", self.window_minutes)?;
        for (name, interval) in [
            ("poll_interval", self.poll_interval),
            ("generate_interval", self.generate_interval),
            ("purge_interval", self.purge_interval),
        ] {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Retention horizon, clamped to the accepted range.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.retention_minutes.clamp(1, MAX_HORIZON_MINUTES))
    }
}

/// Convert a horizon given in minutes, rejecting values outside
/// `1..=MAX_HORIZON_MINUTES`.
pub fn horizon(name: &str, minutes: i64) -> Result<chrono::Duration, ConfigError> {
    if !(1..=MAX_HORIZON_MINUTES).contains(&minutes) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be between 1 and {MAX_HORIZON_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(chrono::Duration::minutes(minutes))
}

/// Live link settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port to connect on startup, if any
    pub port: Option<String>,
    pub baud_rate: BaudRate,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as integer milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.retention_minutes, 60);
        assert_eq!(config.window_minutes, 10);
        assert_eq!(config.mode, Mode::Hardware);
        assert_eq!(config.serial.baud_rate, BaudRate::B115200);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.purge_interval, Duration::from_secs(60));
        assert!(!config.storage_required);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["poll_interval"], 100);
        assert_eq!(json["generate_interval"], 1000);
        assert_eq!(json["purge_interval"], 60_000);
        assert_eq!(json["serial"]["baud_rate"], 115200);
        assert_eq!(json["mode"], "hardware");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"mode": "simulation", "serial": {"port": "/dev/ttyUSB0", "baud_rate": 9600}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.mode, Mode::Simulation);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.serial.baud_rate, BaudRate::B9600);
        assert_eq!(config.window_minutes, 10);
    }

    #[test]
    fn test_unsupported_baud_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"serial": {"baud_rate": 1200}}"#).unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.window_minutes = 5;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = Config::default();
        config.window_minutes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_horizons() {
        let mut config = Config::default();
        config.retention_minutes = i64::MAX / 1000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(
            config.retention(),
            chrono::Duration::minutes(MAX_HORIZON_MINUTES)
        );

        let mut config = Config::default();
        config.window_minutes = MAX_HORIZON_MINUTES + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.window_minutes = MAX_HORIZON_MINUTES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_horizon_in_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"retention_minutes": 9223372036854775}"#).unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_horizon_bounds() {
        assert_eq!(horizon("minutes", 10).unwrap(), chrono::Duration::minutes(10));
        assert!(horizon("minutes", 0).is_err());
        assert!(horizon("minutes", -5).is_err());
        assert!(horizon("minutes", i64::MAX).is_err());
    }
}
