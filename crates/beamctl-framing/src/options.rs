//! Framing kinds offered for a device

use crate::polygon::FramingKind;
use beamctl_settings::{DeviceProfile, FramingSettings};

/// Kinds valid for `profile` under the current settings
pub fn framing_options(profile: &DeviceProfile, settings: &FramingSettings) -> Vec<FramingKind> {
    if profile.family.is_promark() {
        if settings.rotary_mode && profile.add_ons.rotary {
            return vec![FramingKind::RotateAxis, FramingKind::RotateFraming];
        }
        return vec![FramingKind::Framing];
    }
    vec![FramingKind::Framing, FramingKind::Hull, FramingKind::AreaCheck]
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamctl_settings::{AddOns, MachineFamily};

    #[test]
    fn test_options_per_family() {
        let mut settings = FramingSettings::default();
        let beambox = DeviceProfile::default();
        assert_eq!(
            framing_options(&beambox, &settings),
            vec![FramingKind::Framing, FramingKind::Hull, FramingKind::AreaCheck]
        );

        let promark = DeviceProfile {
            family: MachineFamily::Promark,
            add_ons: AddOns {
                rotary: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(framing_options(&promark, &settings), vec![FramingKind::Framing]);

        settings.rotary_mode = true;
        assert_eq!(
            framing_options(&promark, &settings),
            vec![FramingKind::RotateAxis, FramingKind::RotateFraming]
        );
    }
}
