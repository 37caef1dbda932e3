//! beamctl Settings Crate
//!
//! Handles application configuration, device profiles, and Promark
//! calibration persistence.

pub mod config;
pub mod device;
pub mod error;
pub mod persistence;

pub use config::{Config, ConnectionSettings, FramingSettings, JobOrigin};
pub use device::{AddOns, AutoFeeder, DangerZone, DeviceProfile, MachineFamily, Workarea};
pub use error::{SettingsError, SettingsResult};
pub use persistence::{
    AxisCorrection, CalibrationStore, Field, GalvoParameters, PromarkStore, RedDot,
};
