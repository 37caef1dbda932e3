//! Raw G-code sub-task
//!
//! - [`commands`]: command text per F-code generation
//! - [`matchers`]: completion rules, including line-check framing
//! - [`queries`]: position and sensor report parsing
//! - [`session`]: mode-aware operations over a correlator

pub mod commands;
pub mod matchers;
pub mod queries;
pub mod session;

pub use commands::{FcodeVersion, HomeTarget, MoveArgs, Output, RawCommand, DEFAULT_FEEDRATE};
pub use queries::{DoorStatus, Position, ProbePosition};
pub use session::{LineCheckState, RawSession, SessionState};
