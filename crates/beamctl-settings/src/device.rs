//! Device profiles
//!
//! Static description of one engraver: model family, firmware, work area
//! and installed add-ons. Profiles are stored in the `devices` section of
//! the configuration file.

use beamctl_communication::{FcodeVersion, FirmwareVersion, Requirement};
use serde::{Deserialize, Serialize};

/// Machine family of a device model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MachineFamily {
    /// Original Beambox line
    #[default]
    Beambox,
    /// Beambox II (open-lid danger zone)
    BeamboxII,
    /// Ador modular diode platform
    Ador,
    /// HEXA CO2 platform
    Hexa,
    /// Promark galvo fiber markers
    Promark,
}

impl MachineFamily {
    pub fn is_ador(&self) -> bool {
        matches!(self, Self::Ador)
    }

    pub fn is_promark(&self) -> bool {
        matches!(self, Self::Promark)
    }
}

impl std::fmt::Display for MachineFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Beambox => write!(f, "Beambox"),
            Self::BeamboxII => write!(f, "Beambox II"),
            Self::Ador => write!(f, "Ador"),
            Self::Hexa => write!(f, "HEXA"),
            Self::Promark => write!(f, "Promark"),
        }
    }
}

/// Work area in mm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Workarea {
    pub width: f64,
    pub height: f64,
}

impl Default for Workarea {
    fn default() -> Self {
        Self {
            width: 400.0,
            height: 375.0,
        }
    }
}

/// Auto-feeder add-on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoFeeder {
    /// Feed distance per mm of Y travel
    pub rotary_ratio: f64,
}

/// Installed add-ons and model features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AddOns {
    /// Rotary axis attachment
    pub rotary: bool,
    /// Red positioning light
    pub red_light: bool,
    /// Switchable 24 V supply for the low-power indicator
    pub twenty_four_v: bool,
    /// User-defined job origin
    pub job_origin: bool,
    /// Auto-feeder, if installed
    pub auto_feeder: Option<AutoFeeder>,
    /// Low-power laser preview while framing
    pub low_power_preview: bool,
}

/// Region where the lid interlock must be checked while moving
///
/// A point is inside when `y < low_y`, or when `y < mid_y` and `x > side_x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DangerZone {
    pub low_y: f64,
    pub mid_y: f64,
    pub side_x: f64,
}

impl DangerZone {
    /// Defaults for the Beambox II front and right-side openings
    pub const BEAMBOX_II: DangerZone = DangerZone {
        low_y: 10.0,
        mid_y: 80.0,
        side_x: 520.0,
    };

    pub fn contains(&self, x: f64, y: f64) -> bool {
        y < self.low_y || (y < self.mid_y && x > self.side_x)
    }
}

/// One configured device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Serial number, unique per device
    pub serial: String,
    /// Display name
    pub name: String,
    /// Model identifier as reported by the device
    pub model: String,
    pub family: MachineFamily,
    pub firmware_version: FirmwareVersion,
    pub fcode_version: FcodeVersion,
    pub workarea: Workarea,
    pub add_ons: AddOns,
    /// Interlock region; families without one never check the door
    pub danger_zone: Option<DangerZone>,
    /// Y of the rotary axis in mm, when a rotary is mounted
    pub rotary_y: Option<f64>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            serial: String::new(),
            name: "New Device".to_string(),
            model: "fbb1b".to_string(),
            family: MachineFamily::default(),
            firmware_version: FirmwareVersion::new(0, 0, 0),
            fcode_version: FcodeVersion::default(),
            workarea: Workarea::default(),
            add_ons: AddOns::default(),
            danger_zone: None,
            rotary_y: None,
        }
    }
}

impl DeviceProfile {
    /// Whether the firmware provides `requirement`
    pub fn supports(&self, requirement: Requirement) -> bool {
        self.firmware_version.meets(requirement)
    }

    /// Whether line-check framing can be enabled on this device
    pub fn line_check_supported(&self) -> bool {
        if self.family.is_ador() {
            self.supports(Requirement::AdorRelease)
        } else {
            self.supports(Requirement::LineCheck)
        }
    }

    /// Whether a job origin can be used on this device
    pub fn job_origin_supported(&self) -> bool {
        let requirement = if self.family.is_ador() {
            Requirement::AdorJobOrigin
        } else {
            Requirement::JobOrigin
        };
        self.add_ons.job_origin && self.supports(requirement)
    }

    /// Whether motors are released by a single command
    pub fn single_command_loose_motor(&self) -> bool {
        self.supports(Requirement::LooseMotorB34)
    }

    /// Interlock region, falling back to the family default
    pub fn interlock_zone(&self) -> Option<DangerZone> {
        match (self.danger_zone, self.family) {
            (Some(zone), _) => Some(zone),
            (None, MachineFamily::BeamboxII) => Some(DangerZone::BEAMBOX_II),
            _ => None,
        }
    }

    /// Check the profile for values the framing flow cannot use
    pub fn validate(&self) -> crate::SettingsResult<()> {
        if self.serial.is_empty() {
            return Err(crate::SettingsError::invalid("serial", "must not be empty"));
        }
        if self.workarea.width <= 0.0 || self.workarea.height <= 0.0 {
            return Err(crate::SettingsError::invalid(
                format!("{}.workarea", self.serial),
                "dimensions must be > 0",
            ));
        }
        if let Some(feeder) = self.add_ons.auto_feeder {
            if feeder.rotary_ratio <= 0.0 {
                return Err(crate::SettingsError::invalid(
                    format!("{}.add_ons.auto_feeder.rotary_ratio", self.serial),
                    "must be > 0",
                ));
            }
        }
        Ok(())
    }
}
