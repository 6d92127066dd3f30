//! Capture format negotiation.
//!
//! Picks the supported preview size, picture size and framerate range
//! closest to a request, then applies the device-compatibility framerate
//! clamp.

use tracing::debug;

use crate::traits::{
    CameraError, CaptureFormat, DeviceParameters, FourCC, FramerateRange, Size,
};

/// Default lower clamp bound, fps × 1000.
pub const DEFAULT_FPS_FLOOR: u32 = 5000;
/// Default upper clamp bound, fps × 1000.
pub const DEFAULT_FPS_CEILING: u32 = 12000;

/// Framerate clamp applied after closest-match selection.
///
/// The selected range becomes `[max(global_min, floor) : max(ceiling, global_min)]`,
/// where `global_min` is the smallest lower bound among all supported ranges.
/// This widens ranges past what the closest match alone would select and
/// is kept for device compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerateClamp {
    /// Lower bound.
    pub floor: u32,
    /// Upper bound.
    pub ceiling: u32,
}

impl Default for FramerateClamp {
    fn default() -> Self {
        Self {
            floor: DEFAULT_FPS_FLOOR,
            ceiling: DEFAULT_FPS_CEILING,
        }
    }
}

/// Requested capture size and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
    /// Requested framerate in fps.
    pub framerate: u32,
}

/// Negotiation failure.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The device advertised nothing usable for `what`.
    #[error("no supported {what}")]
    NoSupportedFormat {
        /// Which capability list was empty.
        what: &'static str,
    },
    /// Reading the device parameters failed.
    #[error("failed to read device parameters: {0}")]
    Parameters(#[from] CameraError),
}

/// Result of negotiating against a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Preview capture format.
    pub capture: CaptureFormat,
    /// Still-picture size.
    pub picture_size: Size,
}

/// Supported range closest to `framerate` fps, minimizing
/// `|min - fps×1000| + |max - fps×1000|`. Ties go to the first range.
#[must_use]
pub fn closest_framerate_range(
    ranges: &[FramerateRange],
    framerate: u32,
) -> Option<FramerateRange> {
    let requested = u64::from(framerate) * 1000;
    ranges.iter().copied().min_by_key(|range| {
        u64::from(range.min).abs_diff(requested) + u64::from(range.max).abs_diff(requested)
    })
}

/// Supported size closest to `width`×`height` by Euclidean distance.
/// Ties go to the first size.
#[must_use]
pub fn closest_size(sizes: &[Size], width: u32, height: u32) -> Option<Size> {
    sizes.iter().copied().min_by_key(|size| {
        let dw = u64::from(size.width.abs_diff(width));
        let dh = u64::from(size.height.abs_diff(height));
        dw * dw + dh * dh
    })
}

/// Apply the compatibility clamp to a selected range.
#[must_use]
pub fn clamp_framerate(
    selected: FramerateRange,
    ranges: &[FramerateRange],
    clamp: FramerateClamp,
) -> FramerateRange {
    let global_min = ranges
        .iter()
        .map(|range| range.min)
        .min()
        .unwrap_or(selected.min);
    FramerateRange::new(global_min.max(clamp.floor), clamp.ceiling.max(global_min))
}

/// Select the preview format for `request` from the supported sizes and
/// framerate ranges. The pixel format defaults to NV21.
pub fn select_format(
    sizes: &[Size],
    ranges: &[FramerateRange],
    request: FormatRequest,
    clamp: FramerateClamp,
) -> Result<CaptureFormat, NegotiationError> {
    debug!(?ranges, "available fps ranges");

    let selected = closest_framerate_range(ranges, request.framerate).ok_or(
        NegotiationError::NoSupportedFormat {
            what: "framerate range",
        },
    )?;
    let size = closest_size(sizes, request.width, request.height).ok_or(
        NegotiationError::NoSupportedFormat {
            what: "preview size",
        },
    )?;
    let framerate = clamp_framerate(selected, ranges, clamp);
    debug!(%selected, clamped = %framerate, %size, "selected capture format");

    Ok(CaptureFormat::new(
        size.width,
        size.height,
        framerate,
        FourCC::NV21,
    ))
}

/// NV21 when listed (or when nothing is listed), otherwise the first
/// listed format this crate can size buffers for.
#[must_use]
pub fn preferred_pixel_format(formats: &[FourCC]) -> Option<FourCC> {
    if formats.is_empty() || formats.contains(&FourCC::NV21) {
        return Some(FourCC::NV21);
    }
    formats
        .iter()
        .copied()
        .find(|format| format.bits_per_pixel().is_some())
}

/// Negotiate preview format and picture size against device parameters.
pub fn negotiate(
    params: &DeviceParameters,
    request: FormatRequest,
    clamp: FramerateClamp,
) -> Result<NegotiatedFormat, NegotiationError> {
    let capture = select_format(&params.preview_sizes, &params.fps_ranges, request, clamp)?;
    let pixel_format = preferred_pixel_format(&params.preview_formats).ok_or(
        NegotiationError::NoSupportedFormat {
            what: "pixel format",
        },
    )?;
    let picture_size = closest_size(&params.picture_sizes, request.width, request.height).ok_or(
        NegotiationError::NoSupportedFormat {
            what: "picture size",
        },
    )?;

    Ok(NegotiatedFormat {
        capture: CaptureFormat::new(
            capture.width,
            capture.height,
            capture.framerate,
            pixel_format,
        ),
        picture_size,
    })
}
