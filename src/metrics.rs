//! Metrics sink collaborator.
//!
//! Sessions record their samples through a [`MetricsSink`] passed in at
//! construction rather than process-wide counters.

use tracing::debug;

use crate::traits::Size;

/// Histograms a capture session records into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Histogram {
    /// Milliseconds from session construction start to the first frame.
    StartTimeMs,
    /// Milliseconds spent in an explicit stop.
    StopTimeMs,
    /// Negotiated preview resolution, as a [`resolution_sample`].
    Resolution,
}

impl Histogram {
    /// Stable metric name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StartTimeMs => "capture_session.start_time_ms",
            Self::StopTimeMs => "capture_session.stop_time_ms",
            Self::Resolution => "capture_session.resolution",
        }
    }
}

/// Receives metric samples.
pub trait MetricsSink: Send + Sync {
    /// Record one sample.
    fn add_sample(&self, histogram: Histogram, sample: u32);
}

/// [`MetricsSink`] that emits each sample as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn add_sample(&self, histogram: Histogram, sample: u32) {
        debug!(histogram = histogram.name(), sample, "metric sample");
    }
}

/// Resolutions tracked by the resolution histogram.
pub const COMMON_RESOLUTIONS: [Size; 20] = [
    Size::new(160, 120),
    Size::new(240, 160),
    Size::new(320, 240),
    Size::new(400, 240),
    Size::new(480, 320),
    Size::new(640, 360),
    Size::new(640, 480),
    Size::new(768, 480),
    Size::new(854, 480),
    Size::new(800, 600),
    Size::new(960, 540),
    Size::new(960, 640),
    Size::new(1024, 576),
    Size::new(1024, 600),
    Size::new(1280, 720),
    Size::new(1280, 1024),
    Size::new(1920, 1080),
    Size::new(1920, 1440),
    Size::new(2560, 1440),
    Size::new(3840, 2160),
];

/// Enumeration sample for a resolution: `1 + index` in
/// [`COMMON_RESOLUTIONS`], or `0` when it is not listed.
#[must_use]
pub fn resolution_sample(size: Size) -> u32 {
    COMMON_RESOLUTIONS
        .iter()
        .position(|common| *common == size)
        .and_then(|index| u32::try_from(index + 1).ok())
        .unwrap_or(0)
}
