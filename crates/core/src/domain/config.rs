//! Engine configuration
//!
//! TOML-backed settings read at startup: state-change timeouts, preferred
//! devices, and initial audio defaults. A missing config file yields the
//! defaults; a malformed one is an error the embedding application
//! surfaces.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout for an ordinary synchronous state change, in milliseconds
    pub state_change_timeout_ms: u64,

    /// Timeout for a full pipeline stop, in milliseconds
    pub stop_timeout_ms: u64,

    /// Preferred devices
    #[serde(default)]
    pub devices: DevicePreferences,

    /// Initial audio defaults
    #[serde(default)]
    pub audio: AudioDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_change_timeout_ms: 1_000,
            stop_timeout_ms: 5_000,
            devices: DevicePreferences::default(),
            audio: AudioDefaults::default(),
        }
    }
}

/// Preferred device keys (bus paths); empty means use the system default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DevicePreferences {
    #[serde(default)]
    pub input_device: String,

    #[serde(default)]
    pub output_device: String,
}

/// Initial volume and mute state applied to the audio graphs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDefaults {
    pub volume: f32,
    pub muted: bool,
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
        }
    }
}

impl EngineConfig {
    pub fn state_change_timeout(&self) -> Duration {
        Duration::from_millis(self.state_change_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.state_change_timeout_ms == 0 || self.stop_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.audio.volume) {
            return Err(ConfigError::Invalid(format!(
                "volume {} out of range 0..=1",
                self.audio.volume
            )));
        }
        Ok(())
    }

    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<EngineConfig> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = toml::from_str(&raw)?;
        config.validate()?;
        debug!(path = %path.as_ref().display(), "loaded engine config");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), toml::to_string_pretty(self)?)?;
        info!(path = %path.as_ref().display(), "saved engine config");
        Ok(())
    }

    /// The per-user config location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jongleur")
            .join("config.toml")
    }

    /// Load from the default location; a missing file is the defaults.
    pub fn load_default() -> Result<EngineConfig> {
        let path = EngineConfig::default_path();
        if path.exists() {
            EngineConfig::load(path)
        } else {
            debug!("no config file, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.state_change_timeout(), Duration::from_secs(1));
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn round_trip_through_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = EngineConfig::default();
        config.devices.output_device = "bus/speakers".to_string();
        config.audio.volume = 0.5;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.devices.output_device, "bus/speakers");
        assert_eq!(loaded.audio.volume, 0.5);
        assert_eq!(loaded.stop_timeout_ms, 5_000);
    }

    #[test]
    fn out_of_range_volume_is_rejected() {
        let mut config = EngineConfig::default();
        config.audio.volume = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "state_change_timeout_ms = 250\nstop_timeout_ms = 2000\n",
        )
        .unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.state_change_timeout_ms, 250);
        assert_eq!(loaded.audio.volume, 1.0);
        assert!(loaded.devices.input_device.is_empty());
    }
}
