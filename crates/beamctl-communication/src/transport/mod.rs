//! Device transports
//!
//! A transport delivers command text to the device. Inbound traffic is
//! handed to the caller as an unbounded channel of [`DeviceMessage`]s when
//! the transport is opened, so the correlator can own the only receiver.

pub mod scripted;
pub mod tcp;

use async_trait::async_trait;
use beamctl_core::ControlError;

pub use scripted::ScriptedTransport;
pub use tcp::TcpTransport;

/// Receiving half of a transport
pub type Inbound = tokio::sync::mpsc::UnboundedReceiver<beamctl_core::DeviceMessage>;

/// Sending half of a device connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one command line to the device
    async fn send(&self, text: &str) -> Result<(), ControlError>;

    /// Whether the transport still has a live connection
    fn is_connected(&self) -> bool;
}
