//! # beamctl
//!
//! Device control for laser engravers and galvo markers:
//! - Raw-mode sessions with checksum-framed line check and resend
//! - Per-connection command queue and response correlation
//! - Outline framing with door interlock, job origin and rotary support
//! - Promark galvo framing with red-dot correction
//!
//! ## Architecture
//!
//! beamctl is organized as a workspace with multiple crates:
//!
//! 1. **beamctl-core** - Errors, connection modes, device messages, events
//! 2. **beamctl-communication** - Transports, queue, correlator, raw session
//! 3. **beamctl-settings** - Configuration, device profiles, calibration store
//! 4. **beamctl-framing** - Polygons, interlock and the framing orchestrator
//! 5. **beamctl** - This crate: re-exports, logging setup and the CLI

pub mod document;

pub use beamctl_communication::{
    DeviceConnection, DeviceReport, FcodeVersion, FirmwareVersion, MoveArgs, Output, RawSession,
    ResponseCorrelator, ScriptedTransport, TcpTransport, Transport,
};
pub use beamctl_core::{
    ConnectionError, ConnectionMode, ControlError, DeviceMessage, Error, EventDispatcher,
    FramingError, FramingEvent, FramingPhase, Result,
};
pub use beamctl_framing::{
    BoundingBox, FramingKind, FramingManager, FramingOptions, GalvoBackend, GeometrySource, Point,
    PromarkFramer, TargetPolygon,
};
pub use beamctl_settings::{CalibrationStore, Config, DeviceProfile, FramingSettings};
pub use document::StaticDocument;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output on stderr with pretty formatting
/// - RUST_LOG environment variable support, INFO by default
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))?;

    Ok(())
}
