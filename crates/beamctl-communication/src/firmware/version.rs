//! Firmware version gates
//!
//! Features of the raw protocol arrived in specific firmware releases. The
//! checks here decide which command variant or flow a device supports.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A firmware feature with a minimum release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Line-check mode on classic controllers
    LineCheck,
    /// First production Ador firmware (line check on Ador)
    AdorRelease,
    /// Job origin support on classic controllers
    JobOrigin,
    /// Job origin support on F-code v2 controllers
    AdorJobOrigin,
    /// Single-command motor release (`B34`)
    LooseMotorB34,
}

impl Requirement {
    /// Minimum firmware release providing this feature
    pub fn minimum(&self) -> Version {
        match self {
            Requirement::LineCheck => Version::new(3, 3, 0),
            Requirement::AdorRelease => Version::new(5, 0, 0),
            Requirement::JobOrigin => Version::new(5, 3, 3),
            Requirement::AdorJobOrigin => Version::new(5, 3, 5),
            Requirement::LooseMotorB34 => Version::new(3, 3, 0),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Requirement::LineCheck => "line check",
            Requirement::AdorRelease => "Ador release",
            Requirement::JobOrigin => "job origin",
            Requirement::AdorJobOrigin => "Ador job origin",
            Requirement::LooseMotorB34 => "B34 loose motor",
        };
        write!(f, "{} (>= {})", name, self.minimum())
    }
}

/// Firmware version reported by a device
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FirmwareVersion(Version);

impl FirmwareVersion {
    /// Build from numeric components
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Whether this release provides `requirement`
    ///
    /// Pre-release tags are ignored so `4.1.0-beta` counts as `4.1.0`.
    pub fn meets(&self, requirement: Requirement) -> bool {
        let release = Version::new(self.0.major, self.0.minor, self.0.patch);
        release >= requirement.minimum()
    }

    /// Underlying semantic version
    pub fn version(&self) -> &Version {
        &self.0
    }
}

impl FromStr for FirmwareVersion {
    type Err = semver::Error;

    /// Parse `major.minor.patch[-pre]`, also accepting `major.minor`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        match Version::parse(trimmed) {
            Ok(v) => Ok(Self(v)),
            Err(e) => {
                if trimmed.split('.').count() == 2 {
                    Version::parse(&format!("{}.0", trimmed)).map(Self)
                } else {
                    Err(e)
                }
            }
        }
    }
}

impl TryFrom<String> for FirmwareVersion {
    type Error = semver::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FirmwareVersion> for String {
    fn from(value: FirmwareVersion) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!("4.1.7".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(4, 1, 7));
        assert_eq!("v5.3".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(5, 3, 0));
        assert!("abc".parse::<FirmwareVersion>().is_err());
    }

    #[test]
    fn test_requirements() {
        let old = FirmwareVersion::new(3, 2, 9);
        assert!(!old.meets(Requirement::LineCheck));
        assert!(!old.meets(Requirement::LooseMotorB34));

        let beta: FirmwareVersion = "5.3.3-beta".parse().unwrap();
        assert!(beta.meets(Requirement::JobOrigin));
        assert!(!beta.meets(Requirement::AdorJobOrigin));
    }

    #[test]
    fn test_serde_as_string() {
        let v = FirmwareVersion::new(5, 0, 1);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"5.0.1\"");
        let back: FirmwareVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
