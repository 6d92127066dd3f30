//! Capture-Session: a camera capture session library.
//!
//! A [`CaptureSession`] opens one camera, negotiates a capture format,
//! configures the device and streams frames to a consumer, either through a
//! shared surface or through a small pool of recycled CPU buffers. Every
//! session operation runs on a single [`ExecutionContext`]; driver callbacks
//! from other threads are marshaled onto it. The device layer is abstracted
//! behind traits, with a V4L2 backend for real hardware and mock devices for
//! tests.

pub mod capturer;
pub mod clock;
pub mod config;
pub mod configure;
pub mod context;
pub mod delivery;
pub mod device;
pub mod format;
pub mod frame;
pub mod metrics;
pub mod orientation;
pub mod pool;
pub mod session;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use capturer::CameraCapturer;
pub use clock::{Clock, MonotonicClock};
pub use config::{ConfigError, SessionConfig};
pub use context::{EventPoster, ExecutionContext, SessionEvent};
pub use delivery::DeliveryMode;
pub use device::{NullSurface, V4L2Device, V4l2Provider};
pub use frame::{FrameBuffer, PixelBuffer, TextureBuffer, Transform, VideoFrame};
pub use metrics::{Histogram, MetricsSink, TracingMetrics};
pub use orientation::{DisplayRotation, FixedRotation};
pub use session::{
    CaptureSession, Collaborators, FailureType, SessionError, SessionFailure, SessionState,
};
pub use traits::{
    CameraDevice, CameraError, CameraProvider, CaptureFormat, DeviceInfo, FourCC, SessionEvents,
    SessionId, SurfaceProvider,
};
