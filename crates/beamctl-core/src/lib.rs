//! # beamctl Core
//!
//! Core types shared by every beamctl crate:
//! connection modes, the inbound device message alphabet,
//! the error taxonomy, and framing events.

pub mod error;
pub mod event;
pub mod message;
pub mod mode;

pub use error::{ConnectionError, ControlError, Error, FramingError, Result};
pub use event::{EventDispatcher, FramingEvent, FramingPhase};
pub use message::DeviceMessage;
pub use mode::ConnectionMode;
