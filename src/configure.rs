//! Applies a negotiated format and optional features to a device.

use tracing::debug;

use crate::delivery::DeliveryMode;
use crate::traits::{
    CameraDevice, CaptureFormat, DeviceParameters, DeviceSettings, FocusMode, Result, Size,
};

/// Settings for `format` on a device advertising `params`.
///
/// The preview pixel format is only set for buffer-copy delivery; zero-copy
/// frames arrive through the surface. Stabilization and continuous-video
/// focus are enabled only when advertised.
#[must_use]
pub fn settings_for(
    params: &DeviceParameters,
    format: &CaptureFormat,
    picture_size: Size,
    mode: DeliveryMode,
) -> DeviceSettings {
    DeviceSettings {
        fps_range: format.framerate,
        preview_size: format.size(),
        picture_size,
        preview_format: (!mode.is_zero_copy()).then_some(format.pixel_format),
        video_stabilization: params.video_stabilization_supported,
        focus_mode: params
            .focus_modes
            .contains(&FocusMode::ContinuousVideo)
            .then_some(FocusMode::ContinuousVideo),
    }
}

/// Apply `format` to `device`. A driver rejection is returned unchanged;
/// the caller still owns, and must release, the device.
pub fn apply<D: CameraDevice>(
    device: &mut D,
    params: &DeviceParameters,
    format: &CaptureFormat,
    picture_size: Size,
    mode: DeliveryMode,
) -> Result<DeviceSettings> {
    let settings = settings_for(params, format, picture_size, mode);
    debug!(?settings, "applying camera parameters");
    device.set_parameters(&settings)?;
    Ok(settings)
}
