//! # beamctl Communication
//!
//! Device transports, the per-connection command queue, response
//! correlation and the raw-mode protocol of laser engravers.
//!
//! Layers, bottom-up:
//! - [`transport`]: TCP and scripted transports
//! - [`protocol`]: checksum framing, queue, matchers and the correlator
//! - [`firmware`]: version gates, status reports and the raw session
//! - [`connection`]: queued access to every device operation

pub mod connection;
pub mod firmware;
pub mod protocol;
pub mod transport;

pub use connection::DeviceConnection;
pub use firmware::raw::{
    DoorStatus, FcodeVersion, HomeTarget, LineCheckState, MoveArgs, Output, Position,
    ProbePosition, RawSession, SessionState, DEFAULT_FEEDRATE,
};
pub use firmware::{DeviceReport, FirmwareVersion, Requirement};
pub use protocol::{
    frame_line, line_checksum, CommandQueue, ExchangeOptions, ResponseCorrelator, RetryPolicy,
    MAX_TASK_QUEUE,
};
pub use transport::{Inbound, ScriptedTransport, TcpTransport, Transport};
