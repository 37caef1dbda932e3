//! Rotary and auto-feeder geometry
//!
//! Both attachments turn the Y axis into material feed: the traversal Y is
//! scaled around the attachment's axis line by `y_ratio`.

use crate::geometry::Point;
use beamctl_communication::FcodeVersion;
use beamctl_settings::{DeviceProfile, FramingSettings};

/// Rotary geometry of one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotaryInfo {
    /// Y of the axis line in mm
    pub y: f64,
    /// Feed per mm of Y travel
    pub y_ratio: f64,
    /// Drive the attachment through the A axis instead of Y
    pub use_a_axis: bool,
}

impl RotaryInfo {
    /// Map a document Y to the attachment's feed coordinate
    pub fn scale(&self, y: f64) -> f64 {
        self.y_ratio * (y - self.y) + self.y
    }
}

/// Rotary geometry for `profile`, if a rotary or auto-feeder is in use
pub fn rotary_info(
    profile: &DeviceProfile,
    settings: &FramingSettings,
    job_origin: Option<Point>,
) -> Option<RotaryInfo> {
    let use_a_axis = profile.fcode_version == FcodeVersion::V2;

    if profile.add_ons.rotary && settings.rotary_mode {
        return Some(RotaryInfo {
            y: profile.rotary_y.unwrap_or(0.0),
            y_ratio: 1.0,
            use_a_axis,
        });
    }

    let feeder = profile.add_ons.auto_feeder?;
    if !settings.auto_feeder {
        return None;
    }
    let y = match job_origin {
        Some(origin) => origin.y,
        None if settings.reverse_engraving => profile.workarea.height,
        None => 0.0,
    };
    Some(RotaryInfo {
        y,
        y_ratio: feeder.rotary_ratio * settings.auto_feeder_scale,
        use_a_axis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamctl_settings::{AddOns, AutoFeeder};

    fn profile(add_ons: AddOns) -> DeviceProfile {
        DeviceProfile {
            serial: "R1".to_string(),
            add_ons,
            rotary_y: Some(120.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_rotary_requires_mode_and_add_on() {
        let device = profile(AddOns {
            rotary: true,
            ..Default::default()
        });
        let mut settings = FramingSettings::default();
        assert_eq!(rotary_info(&device, &settings, None), None);

        settings.rotary_mode = true;
        let info = rotary_info(&device, &settings, None).unwrap();
        assert_eq!(info.y, 120.0);
        assert_eq!(info.y_ratio, 1.0);
        assert!(!info.use_a_axis);
        assert_eq!(info.scale(130.0), 130.0);
    }

    #[test]
    fn test_auto_feeder_start_line() {
        let mut device = profile(AddOns {
            auto_feeder: Some(AutoFeeder { rotary_ratio: 2.0 }),
            ..Default::default()
        });
        device.fcode_version = FcodeVersion::V2;
        let mut settings = FramingSettings {
            auto_feeder: true,
            auto_feeder_scale: 0.5,
            ..Default::default()
        };

        let info = rotary_info(&device, &settings, None).unwrap();
        assert_eq!(info.y, 0.0);
        assert_eq!(info.y_ratio, 1.0);
        assert!(info.use_a_axis);

        settings.reverse_engraving = true;
        let info = rotary_info(&device, &settings, None).unwrap();
        assert_eq!(info.y, device.workarea.height);

        let info = rotary_info(&device, &settings, Some(Point::new(5.0, 42.0))).unwrap();
        assert_eq!(info.y, 42.0);

        settings.auto_feeder = false;
        assert_eq!(rotary_info(&device, &settings, None), None);
    }
}
