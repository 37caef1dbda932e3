//! Raw-mode query payloads
//!
//! Patterns and parsers for the bracketed report lines returned by
//! position and sensor queries.

use beamctl_core::ControlError;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Four-axis machine position in mm
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
}

/// Result of the last probe cycle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbePosition {
    /// Probed position
    pub position: Position,
    /// Whether the probe came from an auto-focus run
    pub did_af: bool,
}

/// Door and cover sensor states, non-zero meaning open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DoorStatus {
    pub interlock: u32,
    pub bottom_cover: u32,
    pub back_cover: u32,
    pub remote_interlock: u32,
}

impl DoorStatus {
    /// Whether the lid interlock is open
    pub fn is_open(&self) -> bool {
        self.interlock != 0
    }
}

/// `[PRB:x,y,z,a:af]`
pub fn probe_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[PRB:([-\d.]+),([-\d.]+),([-\d.]+),([-\d.]+):(\d)\]")
            .expect("invalid regex pattern")
    })
}

/// `[LAST_POS:x,y,z,a`
pub fn last_pos_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[LAST_POS:([-\d.]+),([-\d.]+),([-\d.]+),([-\d.]+)")
            .expect("invalid regex pattern")
    })
}

/// `MPos:x,y,z,a|` or `WPos:x,y,z,a|` inside a status line
pub fn state_pos_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[MW]Pos:([-\d.]+),([-\d.]+),([-\d.]+),([-\d.]+)\|")
            .expect("invalid regex pattern")
    })
}

/// Door sensor line, case-insensitive
pub fn door_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)Interlock: (\d+), Bottom cover: (\d+), Back cover: (\d+), Remote interlock: (\d+)",
        )
        .expect("invalid regex pattern")
    })
}

fn capture<T: std::str::FromStr>(caps: &Captures<'_>, index: usize) -> Result<T, ControlError> {
    let text = caps
        .get(index)
        .map(|m| m.as_str())
        .ok_or_else(|| ControlError::parse(format!("missing capture group {}", index)))?;
    text.parse()
        .map_err(|_| ControlError::parse(format!("invalid number: {}", text)))
}

/// Parse `x,y,z,a` from groups 1..=4
pub fn parse_position(caps: &Captures<'_>) -> Result<Position, ControlError> {
    Ok(Position {
        x: capture(caps, 1)?,
        y: capture(caps, 2)?,
        z: capture(caps, 3)?,
        a: capture(caps, 4)?,
    })
}

pub fn parse_probe(caps: &Captures<'_>) -> Result<ProbePosition, ControlError> {
    let flag: u8 = capture(caps, 5)?;
    Ok(ProbePosition {
        position: parse_position(caps)?,
        did_af: flag == 1,
    })
}

pub fn parse_door(caps: &Captures<'_>) -> Result<DoorStatus, ControlError> {
    Ok(DoorStatus {
        interlock: capture(caps, 1)?,
        bottom_cover: capture(caps, 2)?,
        back_cover: capture(caps, 3)?,
        remote_interlock: capture(caps, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_position() {
        let line = "<Idle|MPos:10.5,20,0,-1.25|FS:0,0>";
        let caps = state_pos_pattern().captures(line).unwrap();
        let pos = parse_position(&caps).unwrap();
        assert_eq!(pos, Position { x: 10.5, y: 20.0, z: 0.0, a: -1.25 });
    }

    #[test]
    fn test_door_case_insensitive() {
        let line = "interlock: 0, bottom cover: 1, back cover: 0, remote interlock: 0";
        let caps = door_pattern().captures(line).unwrap();
        let door = parse_door(&caps).unwrap();
        assert!(!door.is_open());
        assert_eq!(door.bottom_cover, 1);
    }

    #[test]
    fn test_bad_number_is_parse_error() {
        let caps = last_pos_pattern().captures("[LAST_POS:1..2,3,4,5]").unwrap();
        assert!(matches!(parse_position(&caps), Err(ControlError::Parse { .. })));
    }
}
