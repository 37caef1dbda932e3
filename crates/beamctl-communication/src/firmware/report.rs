//! Device status report
//!
//! Parsed from the `device_status` object of a `play report` reply.

use beamctl_core::ControlError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status id of an idle machine
pub const ST_IDLE: i64 = 0;
/// Status id of a running job
pub const ST_RUNNING: i64 = 16;
/// Status id of a completed job
pub const ST_COMPLETED: i64 = 64;
/// Status id of an aborted job
pub const ST_ABORTED: i64 = 128;

/// Machine status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceReport {
    /// Numeric machine state
    pub st_id: i64,
    /// Human-readable state label
    #[serde(default)]
    pub st_label: Option<String>,
    /// Job progress in `0.0..=1.0`
    #[serde(default)]
    pub prog: Option<f64>,
    /// Active error labels
    #[serde(default)]
    pub error: Vec<String>,
}

impl DeviceReport {
    /// Extract the report from a `play report` reply
    pub fn from_reply(reply: &Value) -> Result<Self, ControlError> {
        let status = reply
            .get("device_status")
            .ok_or_else(|| ControlError::parse("report reply has no device_status"))?;
        serde_json::from_value(status.clone())
            .map_err(|e| ControlError::parse(format!("invalid device_status: {}", e)))
    }

    /// Whether the machine is idle and can accept a new task
    pub fn is_idle(&self) -> bool {
        self.st_id == ST_IDLE
    }

    /// Whether the last job has finished, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(self.st_id, ST_COMPLETED | ST_ABORTED)
    }
}
