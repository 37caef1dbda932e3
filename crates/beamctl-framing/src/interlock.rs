//! Door interlock policy
//!
//! Some machines can reach the operator through the open lid near the
//! front and side edges. When a traversal enters that region the door
//! sensor is read before every move and an open door stops the run.

use crate::geometry::Point;
use beamctl_core::FramingError;
use beamctl_settings::DangerZone;

/// Interlock decision for one run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InterlockPolicy {
    zone: Option<DangerZone>,
    required: bool,
}

impl InterlockPolicy {
    /// No interlock checks
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Decide for `points` against `zone`
    pub fn for_traversal(zone: Option<DangerZone>, points: &[Point]) -> Self {
        let required = zone
            .map(|z| points.iter().any(|p| z.contains(p.x, p.y)))
            .unwrap_or(false);
        if required {
            tracing::info!("Traversal enters the danger zone, door checks enabled");
        }
        Self { zone, required }
    }

    /// Whether the door must be read before each move
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Turn a door reading before a move to `target` into a verdict
    pub fn verify(&self, door_open: bool, target: Point) -> Result<(), FramingError> {
        if self.required && door_open {
            tracing::warn!("Door open before move to ({:.1}, {:.1})", target.x, target.y);
            return Err(FramingError::SafetyInterlock {
                x: target.x,
                y: target.y,
            });
        }
        Ok(())
    }
}
