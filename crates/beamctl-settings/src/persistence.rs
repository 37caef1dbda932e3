//! Calibration persistence
//!
//! Galvo calibration of Promark devices, kept per serial in a JSON file
//! next to the configuration.

use crate::error::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Marking field placement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Field {
    pub offset_x: f64,
    pub offset_y: f64,
    /// Rotation in degrees
    pub angle: f64,
}

/// Per-axis galvo correction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisCorrection {
    pub scale: f64,
    pub bulge: f64,
    pub skew: f64,
    pub trapezoid: f64,
}

impl Default for AxisCorrection {
    fn default() -> Self {
        Self {
            scale: 100.0,
            bulge: 1.0,
            skew: 1.0,
            trapezoid: 1.0,
        }
    }
}

/// Galvo correction for both axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GalvoParameters {
    pub x: AxisCorrection,
    pub y: AxisCorrection,
}

/// Offset and scale between the red aiming dot and the marking laser
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedDot {
    pub offset_x: f64,
    pub offset_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl Default for RedDot {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

/// Stored calibration of one Promark device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromarkStore {
    pub field: Field,
    pub galvo_parameters: GalvoParameters,
    pub red_dot: Option<RedDot>,
}

/// Calibration file keyed by device serial
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalibrationStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, PromarkStore>,
}

impl CalibrationStore {
    /// In-memory store that is never written
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Default location (`<config dir>/beamctl/promark.json`)
    pub fn default_path() -> SettingsResult<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            SettingsError::ConfigDirectory("no configuration directory on this platform".into())
        })?;
        Ok(dir.join("beamctl").join("promark.json"))
    }

    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: &Path) -> SettingsResult<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    /// Calibration of `serial`
    pub fn get(&self, serial: &str) -> Option<&PromarkStore> {
        self.entries.get(serial)
    }

    /// Calibration of `serial`, or an error when none is stored
    pub fn require(&self, serial: &str) -> SettingsResult<&PromarkStore> {
        self.get(serial)
            .ok_or_else(|| SettingsError::MissingCalibration(serial.to_string()))
    }

    /// Replace the calibration of `serial` and write the file
    pub fn set(&mut self, serial: &str, store: PromarkStore) -> SettingsResult<()> {
        self.entries.insert(serial.to_string(), store);
        self.save()
    }

    /// Write the file, if this store has one
    pub fn save(&self) -> SettingsResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SettingsError::ConfigDirectory(e.to_string()))?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_persists_by_serial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("promark.json");

        let mut store = CalibrationStore::open(&path).unwrap();
        assert!(store.is_empty());
        store
            .set(
                "PM0001",
                PromarkStore {
                    field: Field {
                        offset_x: 1.0,
                        offset_y: -1.0,
                        angle: 0.5,
                    },
                    red_dot: Some(RedDot {
                        offset_x: 0.2,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();

        let reopened = CalibrationStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        let entry = reopened.require("PM0001").unwrap();
        assert_eq!(entry.field.angle, 0.5);
        assert_eq!(entry.red_dot.unwrap().scale_x, 1.0);
        assert!(reopened.require("PM0002").is_err());
    }

    #[test]
    fn test_partial_entry_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("promark.json");
        std::fs::write(&path, r#"{"PM9": {"field": {"offset_x": 3.0}}}"#).unwrap();

        let store = CalibrationStore::open(&path).unwrap();
        let entry = store.get("PM9").unwrap();
        assert_eq!(entry.field.offset_x, 3.0);
        assert_eq!(entry.galvo_parameters.x.scale, 100.0);
        assert!(entry.red_dot.is_none());
    }

    #[test]
    fn test_in_memory_store_never_writes() {
        let mut store = CalibrationStore::in_memory();
        store.set("PM1", PromarkStore::default()).unwrap();
        assert_eq!(store.len(), 1);
    }
}
