//! Connection modes
//!
//! The device accepts high-level `play`/`task` commands in normal mode and
//! G-code style commands only after switching into the raw sub-task.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol mode of a device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Command-line mode accepting `play`, `task` and query commands
    #[default]
    Normal,
    /// Maintenance sub-task
    Maintain,
    /// Raw G-code sub-task
    Raw,
    /// Red laser height measurement sub-task
    RedLaserMeasure,
    /// Cartridge I/O sub-task
    CartridgeIo,
}

impl ConnectionMode {
    /// Whether the connection is in any sub-task and must be quit to return to normal
    pub fn is_sub_task(&self) -> bool {
        !matches!(self, ConnectionMode::Normal)
    }

    /// The `task` argument that enters this mode, if it is a sub-task
    pub fn task_name(&self) -> Option<&'static str> {
        match self {
            ConnectionMode::Normal => None,
            ConnectionMode::Maintain => Some("maintain"),
            ConnectionMode::Raw => Some("raw"),
            ConnectionMode::RedLaserMeasure => Some("red_laser_measure"),
            ConnectionMode::CartridgeIo => Some("cartridge_io"),
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Normal => write!(f, "normal"),
            ConnectionMode::Maintain => write!(f, "maintain"),
            ConnectionMode::Raw => write!(f, "raw"),
            ConnectionMode::RedLaserMeasure => write!(f, "red laser measure"),
            ConnectionMode::CartridgeIo => write!(f, "cartridge io"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_task_names() {
        assert_eq!(ConnectionMode::Raw.task_name(), Some("raw"));
        assert_eq!(ConnectionMode::Normal.task_name(), None);
        assert!(ConnectionMode::Maintain.is_sub_task());
        assert!(!ConnectionMode::default().is_sub_task());
    }
}
