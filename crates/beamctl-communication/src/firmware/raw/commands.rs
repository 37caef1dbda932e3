//! Raw-mode command text
//!
//! Literal command strings of the raw G-code dialect, and how each one
//! signals completion when line check is off.

use serde::{Deserialize, Serialize};

/// Default feedrate of raw moves in mm/min
pub const DEFAULT_FEEDRATE: f64 = 6000.0;

/// F-code dialect generation of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FcodeVersion {
    /// Classic controllers (`B`/`R` codes)
    #[default]
    V1,
    /// Newer controllers (`M136`/`M137` codes)
    V2,
}

/// How a command completes outside line-check mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// First reply of any kind
    AnyReply,
    /// A raw `ok` line
    RawOk,
}

/// One raw command and its completion rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    /// Command text without framing
    pub text: String,
    /// Completion outside line-check mode
    pub completion: Completion,
    /// Whether line-check framing applies when enabled
    pub line_check: bool,
}

impl RawCommand {
    fn any(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completion: Completion::AnyReply,
            line_check: true,
        }
    }

    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completion: Completion::RawOk,
            line_check: true,
        }
    }

    /// Never frame this command, even in line-check mode
    pub fn unframed(mut self) -> Self {
        self.line_check = false;
        self
    }
}

/// Switchable device outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Output {
    /// Water cooling pump
    WaterPump,
    /// Air assist pump
    AirPump,
    /// Exhaust fan
    Fan,
    /// Rotary axis mode
    Rotary,
    /// Red positioning light
    RedLight,
    /// 24 V auxiliary supply
    TwentyFourV,
}

impl Output {
    /// Command toggling this output
    pub fn command(&self, on: bool, fcode: FcodeVersion) -> RawCommand {
        use FcodeVersion::*;
        match (self, fcode) {
            (Output::WaterPump, V2) => RawCommand::any(if on { "M136P1" } else { "M136P2" }),
            (Output::WaterPump, V1) => RawCommand::any(if on { "B1" } else { "B2" }),
            (Output::AirPump, V2) => RawCommand::any(if on { "M136P3" } else { "M136P4" }),
            (Output::AirPump, V1) => RawCommand::any(if on { "B3" } else { "B4" }),
            (Output::Fan, V2) => RawCommand::any(if on { "M136P5" } else { "M136P6" }),
            (Output::Fan, V1) => RawCommand::any(if on { "B5" } else { "B6" }),
            (Output::Rotary, V2) => RawCommand::any(if on { "M137P35" } else { "M137P36" }),
            (Output::Rotary, V1) => RawCommand::any(if on { "R1" } else { "R0" }).unframed(),
            (Output::RedLight, _) => RawCommand::ok(if on { "M136P196" } else { "M136P197" }),
            (Output::TwentyFourV, _) => RawCommand::ok(if on { "M136P173" } else { "M136P174" }),
        }
    }
}

/// Which axes a home command references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeTarget {
    /// X and Y
    Xy,
    /// Z only
    Z,
    /// Camera position
    Camera,
}

impl HomeTarget {
    /// Command text
    pub fn command(&self) -> &'static str {
        match self {
            HomeTarget::Xy => "raw home",
            HomeTarget::Z => "$HZ",
            HomeTarget::Camera => "$HCAM",
        }
    }
}

/// Linear move with optional axes
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveArgs {
    /// Target X in mm
    pub x: Option<f64>,
    /// Target Y in mm
    pub y: Option<f64>,
    /// Target Z in mm
    pub z: Option<f64>,
    /// Target A (rotary) in mm
    pub a: Option<f64>,
    /// Feedrate in mm/min; [`DEFAULT_FEEDRATE`] when unset
    pub f: Option<f64>,
}

impl MoveArgs {
    /// Move in the XY plane
    pub fn xy(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Default::default()
        }
    }

    /// `G1F<f>[X..][Y..][Z..][A..]` with coordinates rounded to 3 decimals
    pub fn command(&self) -> RawCommand {
        let mut text = format!("G1F{}", fmt_num(self.f.unwrap_or(DEFAULT_FEEDRATE)));
        for (axis, value) in [('X', self.x), ('Y', self.y), ('Z', self.z), ('A', self.a)] {
            if let Some(v) = value {
                text.push(axis);
                text.push_str(&fmt_num(v));
            }
        }
        RawCommand::any(text)
    }
}

/// Round to 3 decimals and print without trailing zeros
pub fn fmt_num(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{}", rounded)
}

/// Laser output with optional power
pub fn laser(on: bool, power: Option<f64>) -> RawCommand {
    let mut text = String::from(if on { "M3" } else { "M5" });
    if let Some(s) = power {
        text.push('S');
        text.push_str(&fmt_num(s));
    }
    RawCommand::ok(text)
}

/// Set the current position as job origin
pub fn set_origin(fcode: FcodeVersion) -> RawCommand {
    RawCommand::ok(match fcode {
        FcodeVersion::V1 => "B47",
        FcodeVersion::V2 => "M137P186",
    })
}

/// Release the stepper motors
pub fn loose_motor(fcode: FcodeVersion) -> RawCommand {
    RawCommand::any(match fcode {
        FcodeVersion::V1 => "B34",
        FcodeVersion::V2 => "M137P34",
    })
}

/// Relative Z move
pub fn move_z_rel(z: f64) -> RawCommand {
    RawCommand::any(format!("M137P184Q{}", fmt_num(z)))
}

/// Z move relative to the last homed height
pub fn move_z_rel_to_last_home(z: f64) -> RawCommand {
    RawCommand::any(format!("M137P185Q{}", fmt_num(z)))
}

/// Auto-focus probe
pub fn auto_focus(fcode: FcodeVersion) -> &'static str {
    match fcode {
        FcodeVersion::V1 => "B206",
        FcodeVersion::V2 => "M137P179Q1",
    }
}

/// Height measurement, optionally from a base Z
pub fn measure_height(base_z: Option<f64>) -> String {
    match base_z {
        Some(z) => format!("B45Z{}", fmt_num(z)),
        None => "B45".to_string(),
    }
}
