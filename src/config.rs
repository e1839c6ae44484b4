//! Bridge configuration.
//!
//! Loaded once from YAML; per-device options (fan level counts, linked
//! climate sensors) are resolved at entity construction and never re-read
//! afterwards. Range errors are rejected here, at the boundary; nothing
//! downstream re-validates.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_FAN_SPEED_LEVELS: u32 = 3;

const MIN_SCAN_INTERVAL_SECS: u64 = 1;
const MAX_SCAN_INTERVAL_SECS: u64 = 60;
const MIN_FAN_SPEED_LEVELS: u32 = 1;
const MAX_FAN_SPEED_LEVELS: u32 = 5;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("user id must not be empty")]
    EmptyUser,
    #[error("scan_interval {0}s out of range 1-60")]
    ScanIntervalOutOfRange(u64),
    #[error("fan_levels for topic {topic} is {levels}, out of range 1-5")]
    FanLevelsOutOfRange { topic: String, levels: u32 },
}

/// Account-level configuration plus per-device options.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Bemfa account identifier (the private key the cloud calls `user`).
    pub user: String,

    /// Poll period in seconds, 1-60.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Discrete speed steps per fan topic, 1-5. Unlisted fans get
    /// [`DEFAULT_FAN_SPEED_LEVELS`].
    #[serde(default)]
    pub fan_levels: HashMap<String, u32>,

    /// Linked current-temperature sensor entity id per air-conditioner
    /// topic. Unlisted air conditioners fall back to their target
    /// temperature.
    #[serde(default)]
    pub climate_sensors: HashMap<String, String>,
}

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

impl BridgeConfig {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            fan_levels: HashMap::new(),
            climate_sensors: HashMap::new(),
        }
    }

    /// Reject out-of-range values at the configuration boundary.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user.trim().is_empty() {
            return Err(ConfigError::EmptyUser);
        }
        if !(MIN_SCAN_INTERVAL_SECS..=MAX_SCAN_INTERVAL_SECS).contains(&self.scan_interval_secs) {
            return Err(ConfigError::ScanIntervalOutOfRange(self.scan_interval_secs));
        }
        for (topic, &levels) in &self.fan_levels {
            if !(MIN_FAN_SPEED_LEVELS..=MAX_FAN_SPEED_LEVELS).contains(&levels) {
                return Err(ConfigError::FanLevelsOutOfRange {
                    topic: topic.clone(),
                    levels,
                });
            }
        }
        Ok(())
    }

    /// Speed steps for one fan, defaulted when unconfigured.
    pub fn fan_levels_for(&self, topic: &str) -> u32 {
        self.fan_levels
            .get(topic)
            .copied()
            .unwrap_or(DEFAULT_FAN_SPEED_LEVELS)
    }

    /// Linked temperature sensor for one air conditioner, if configured.
    pub fn climate_sensor_for(&self, topic: &str) -> Option<&str> {
        self.climate_sensors.get(topic).map(String::as_str)
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: BridgeConfig = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::new("abc123");
        assert_eq!(config.scan_interval_secs, DEFAULT_SCAN_INTERVAL_SECS);
        assert_eq!(config.fan_levels_for("any"), DEFAULT_FAN_SPEED_LEVELS);
        assert_eq!(config.climate_sensor_for("any"), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_user() {
        let config = BridgeConfig::new("  ");
        assert_eq!(config.validate(), Err(ConfigError::EmptyUser));
    }

    #[test]
    fn test_rejects_out_of_range_interval() {
        let mut config = BridgeConfig::new("abc123");
        config.scan_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ScanIntervalOutOfRange(0))
        ));

        config.scan_interval_secs = 61;
        assert!(config.validate().is_err());

        config.scan_interval_secs = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_fan_levels() {
        let mut config = BridgeConfig::new("abc123");
        config.fan_levels.insert("fan002".to_string(), 6);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FanLevelsOutOfRange { .. })
        ));

        config.fan_levels.insert("fan002".to_string(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_from_yaml() {
        let yaml = r#"
user: abc123def456
scan_interval_secs: 10
fan_levels:
  fan002: 5
climate_sensors:
  ac001: sensor.bedroom_temperature
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.user, "abc123def456");
        assert_eq!(config.scan_interval_secs, 10);
        assert_eq!(config.fan_levels_for("fan002"), 5);
        assert_eq!(config.fan_levels_for("fan003"), DEFAULT_FAN_SPEED_LEVELS);
        assert_eq!(
            config.climate_sensor_for("ac001"),
            Some("sensor.bedroom_temperature")
        );
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let yaml = "user: abc\nscan_interval_secs: 600\n";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
