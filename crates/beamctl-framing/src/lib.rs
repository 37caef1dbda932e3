//! # beamctl Framing
//!
//! Traces the outline of a job on the machine before it runs.
//!
//! - [`polygon`]: target outlines computed from document geometry
//! - [`interlock`]: door checks near open-lid regions
//! - [`manager`]: the phase-by-phase orchestrator for raw-mode devices
//! - [`promark`]: galvo framing with red-dot correction

pub mod geometry;
pub mod interlock;
pub mod manager;
pub mod options;
pub mod polygon;
pub mod promark;
pub mod rotary;

pub use geometry::{BoundingBox, Point};
pub use interlock::InterlockPolicy;
pub use manager::{FramingManager, FramingOptions};
pub use options::framing_options;
pub use polygon::{
    compute_polygon, Element, FramingKind, GeometrySource, Layer, PolygonCache, PolygonContext,
    TargetPolygon,
};
pub use promark::{apply_red_dot, GalvoBackend, GalvoEvent, PromarkFramer};
pub use rotary::{rotary_info, RotaryInfo};
