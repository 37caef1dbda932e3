//! Device firmware dialect
//!
//! - [`version`]: release gates for protocol features
//! - [`report`]: machine status reports
//! - [`raw`]: the raw G-code sub-task and its line-check framing

pub mod raw;
pub mod report;
pub mod version;

pub use report::DeviceReport;
pub use version::{FirmwareVersion, Requirement};
