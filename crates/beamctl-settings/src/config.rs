//! Configuration management for beamctl
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats, stored in the platform configuration directory unless
//! a path is given.
//!
//! Configuration is organized into sections:
//! - Connection settings (host, port, timeouts)
//! - Framing preferences (feedrate, low-power preview, job origin, rotary)
//! - Device profiles

use crate::device::DeviceProfile;
use crate::error::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Device hostname or IP address
    pub host: String,
    /// Control port
    pub port: u16,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Default inactivity timeout of a request in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 23,
            connect_timeout_ms: 5000,
            request_timeout_ms: 30_000,
        }
    }
}

/// Job origin in mm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobOrigin {
    pub x: f64,
    pub y: f64,
}

/// Framing preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingSettings {
    /// Feedrate of framing moves in mm/min
    pub movement_feedrate: f64,
    /// Low-power preview in percent; 0 disables it
    pub low_power: f64,
    /// Repeat the outline until stopped
    pub loop_mode: bool,
    /// Rotary mode selected in the document
    pub rotary_mode: bool,
    /// Use the job origin when the device supports it
    pub enable_job_origin: bool,
    /// Job origin position
    pub job_origin: Option<JobOrigin>,
    /// Feed material with the auto-feeder add-on
    pub auto_feeder: bool,
    /// Engrave bottom-up; moves the auto-feeder start to the far edge
    pub reverse_engraving: bool,
    /// Auto-feeder feed scale
    pub auto_feeder_scale: f64,
}

impl Default for FramingSettings {
    fn default() -> Self {
        Self {
            movement_feedrate: 6000.0,
            low_power: 0.0,
            loop_mode: false,
            rotary_mode: false,
            enable_job_origin: false,
            job_origin: None,
            auto_feeder: false,
            reverse_engraving: false,
            auto_feeder_scale: 1.0,
        }
    }
}

/// Complete application configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Framing preferences
    pub framing: FramingSettings,
    /// Known devices
    pub devices: Vec<DeviceProfile>,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(SettingsError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location (`<config dir>/beamctl/config.toml`)
    pub fn default_path() -> SettingsResult<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            SettingsError::ConfigDirectory("no configuration directory on this platform".into())
        })?;
        Ok(dir.join("beamctl").join("config.toml"))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)?;
        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };
        config.validate()?;
        tracing::debug!(
            "Loaded config from {} ({} devices)",
            path.display(),
            config.devices.len()
        );
        Ok(config)
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;
        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SettingsError::ConfigDirectory(e.to_string()))?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.connection.connect_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.connect_timeout_ms",
                "must be > 0",
            ));
        }
        if self.connection.request_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.request_timeout_ms",
                "must be > 0",
            ));
        }
        if self.framing.movement_feedrate <= 0.0 {
            return Err(SettingsError::invalid(
                "framing.movement_feedrate",
                "must be > 0",
            ));
        }
        if !(0.0..=100.0).contains(&self.framing.low_power) {
            return Err(SettingsError::invalid(
                "framing.low_power",
                "must be within 0..=100",
            ));
        }
        if self.framing.auto_feeder_scale <= 0.0 {
            return Err(SettingsError::invalid(
                "framing.auto_feeder_scale",
                "must be > 0",
            ));
        }

        let mut serials = std::collections::HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !serials.insert(device.serial.as_str()) {
                return Err(SettingsError::invalid(
                    "devices",
                    format!("duplicate serial {}", device.serial),
                ));
            }
        }
        Ok(())
    }

    /// Profile of the device with `serial`
    pub fn device(&self, serial: &str) -> SettingsResult<&DeviceProfile> {
        self.devices
            .iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| SettingsError::UnknownDevice(serial.to_string()))
    }

    /// Insert or replace a profile by serial
    pub fn upsert_device(&mut self, profile: DeviceProfile) {
        match self.devices.iter_mut().find(|d| d.serial == profile.serial) {
            Some(existing) => *existing = profile,
            None => self.devices.push(profile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AddOns, MachineFamily};
    use beamctl_communication::FirmwareVersion;
    use tempfile::tempdir;

    fn sample() -> Config {
        let mut config = Config::new();
        config.framing.low_power = 15.0;
        config.upsert_device(DeviceProfile {
            serial: "FB2B0001".to_string(),
            name: "Workshop".to_string(),
            family: MachineFamily::BeamboxII,
            firmware_version: FirmwareVersion::new(5, 3, 3),
            add_ons: AddOns {
                red_light: true,
                job_origin: true,
                ..Default::default()
            },
            ..Default::default()
        });
        config
    }

    #[test]
    fn test_toml_and_json_round_trip() {
        let dir = tempdir().unwrap();
        let config = sample();
        for name in ["config.toml", "config.json"] {
            let path = dir.path().join(name);
            config.save_to_file(&path).unwrap();
            let loaded = Config::load_from_file(&path).unwrap();
            assert_eq!(loaded, config);
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            r#"
[connection]
host = "10.0.0.5"

[[devices]]
serial = "AD0001"
family = "Ador"
firmware_version = "5.3.5"
fcode_version = "V2"
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.connection.host, "10.0.0.5");
        assert_eq!(config.connection.port, 23);
        assert_eq!(config.framing.movement_feedrate, 6000.0);
        let device = config.device("AD0001").unwrap();
        assert!(device.family.is_ador());
        assert!(config.device("missing").is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = sample();
        config.framing.low_power = 150.0;
        assert!(config.validate().is_err());

        let mut config = sample();
        let duplicate = config.devices[0].clone();
        config.devices.push(duplicate);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let err = Config::new()
            .save_to_file(&dir.path().join("config.yaml"))
            .unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
