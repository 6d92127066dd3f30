//! Frame orientation.
//!
//! The platform's own display-orientation correction is disabled, so each
//! frame carries the rotation a renderer must apply to show it upright.

use crate::traits::{DeviceInfo, Facing};

/// Reports the current rotation of the display.
pub trait DisplayRotation: Send + Sync {
    /// Clockwise display rotation in degrees (0, 90, 180, 270).
    fn rotation_degrees(&self) -> u32;
}

/// Display with a fixed rotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRotation(pub u32);

impl DisplayRotation for FixedRotation {
    fn rotation_degrees(&self) -> u32 {
        self.0
    }
}

/// Clockwise rotation for a frame from `info` with the display rotated by
/// `device_rotation` degrees.
#[must_use]
pub fn frame_orientation(info: &DeviceInfo, device_rotation: u32) -> u32 {
    let device_rotation = device_rotation % 360;
    let rotation = match info.facing {
        Facing::Back => 360 - device_rotation,
        Facing::Front | Facing::External => device_rotation,
    };
    (info.orientation + rotation) % 360
}

/// Whether zero-copy frames need a horizontal mirror: true when the sensor
/// faces the same way as the display.
#[must_use]
pub fn needs_mirror(info: &DeviceInfo) -> bool {
    info.facing == Facing::Front
}
