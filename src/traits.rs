//! Core traits and types for the camera session abstraction.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::EventPoster;
use crate::frame::VideoFrame;

/// Pixel format representation (e.g., NV21, YUYV, MJPG).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// NV21 pixel format (4:2:0, interleaved VU plane).
    pub const NV21: Self = Self::new(b"NV21");
    /// NV12 pixel format (4:2:0, interleaved UV plane).
    pub const NV12: Self = Self::new(b"NV12");
    /// YV12 pixel format (4:2:0 planar).
    pub const YV12: Self = Self::new(b"YV12");
    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");

    /// Bits per pixel used to size capture buffers, `None` for formats
    /// this crate cannot budget.
    #[must_use]
    pub fn bits_per_pixel(self) -> Option<u32> {
        match &self.0 {
            b"NV21" | b"NV12" | b"YV12" => Some(12),
            // MJPG frames are compressed and usually smaller than packed
            // 4:2:2, but not always; frames that overflow are not delivered.
            b"YUYV" | b"UYVY" | b"MJPG" => Some(16),
            b"RGB3" => Some(24),
            _ => None,
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Framerate range in fps × 1000 (e.g. `[15000:30000]` is 15 to 30 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramerateRange {
    /// Lower bound.
    pub min: u32,
    /// Upper bound.
    pub max: u32,
}

impl FramerateRange {
    /// Create a new framerate range.
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

impl fmt::Display for FramerateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.min, self.max)
    }
}

/// Negotiated capture format. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Preview framerate range.
    pub framerate: FramerateRange,
    /// Preview pixel format.
    pub pixel_format: FourCC,
    /// Size in bytes of one frame in `pixel_format`.
    pub image_size: usize,
}

impl CaptureFormat {
    /// Create a capture format, computing the frame size from the pixel format.
    #[must_use]
    pub fn new(width: u32, height: u32, framerate: FramerateRange, pixel_format: FourCC) -> Self {
        let bits = u64::from(pixel_format.bits_per_pixel().unwrap_or(16));
        let bytes = u64::from(width)
            .saturating_mul(u64::from(height))
            .saturating_mul(bits)
            / 8;
        Self {
            width,
            height,
            framerate,
            pixel_format,
            image_size: usize::try_from(bytes).unwrap_or(usize::MAX),
        }
    }

    /// Frame dimensions.
    #[must_use]
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{} {}",
            self.width, self.height, self.framerate, self.pixel_format
        )
    }
}

/// Direction a camera sensor faces relative to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    /// Same side as the display.
    Front,
    /// Opposite side from the display.
    Back,
    /// Detached camera with no fixed relation to the display.
    External,
}

/// Static information about a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Sensor facing.
    pub facing: Facing,
    /// Clockwise sensor mount orientation in degrees (0, 90, 180, 270).
    pub orientation: u32,
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Focus modes a device may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    /// Single-shot autofocus.
    Auto,
    /// Continuous autofocus tuned for video.
    ContinuousVideo,
    /// Fixed-focus lens.
    Fixed,
}

/// Capability parameters reported by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceParameters {
    /// Supported preview sizes.
    pub preview_sizes: Vec<Size>,
    /// Supported still-picture sizes.
    pub picture_sizes: Vec<Size>,
    /// Supported preview framerate ranges.
    pub fps_ranges: Vec<FramerateRange>,
    /// Supported preview pixel formats.
    pub preview_formats: Vec<FourCC>,
    /// Whether the device can stabilize video.
    pub video_stabilization_supported: bool,
    /// Supported focus modes.
    pub focus_modes: Vec<FocusMode>,
}

/// Parameters applied to a device before preview starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Preview framerate range.
    pub fps_range: FramerateRange,
    /// Preview size.
    pub preview_size: Size,
    /// Still-picture size.
    pub picture_size: Size,
    /// Preview pixel format; `None` leaves the device default in place.
    pub preview_format: Option<FourCC>,
    /// Enable video stabilization.
    pub video_stabilization: bool,
    /// Focus mode to select; `None` leaves the device default in place.
    pub focus_mode: Option<FocusMode>,
}

/// Index of a buffer inside a [`FrameBufferPool`](crate::pool::FrameBufferPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

/// Raw buffer handed to the driver as a receive target.
///
/// Exactly one party owns a buffer at any time: the pool, the driver, or
/// the consumer holding the frame built on it.
#[derive(Debug, PartialEq, Eq)]
pub struct CallbackBuffer {
    /// Pool slot.
    pub id: BufferId,
    /// Backing storage, always `frame_size` bytes long.
    pub data: Vec<u8>,
    /// Bytes written by the driver for the current frame.
    pub bytes_used: usize,
}

impl CallbackBuffer {
    /// Allocate a zeroed buffer of `size` bytes.
    #[must_use]
    pub fn new(id: BufferId, size: usize) -> Self {
        Self {
            id,
            data: vec![0; size],
            bytes_used: 0,
        }
    }

    /// Copy a driver frame into this buffer. Returns `false`, leaving the
    /// buffer untouched, when the frame does not fit.
    #[must_use]
    pub fn fill(&mut self, src: &[u8]) -> bool {
        let Some(dst) = self.data.get_mut(..src.len()) else {
            return false;
        };
        dst.copy_from_slice(src);
        self.bytes_used = src.len();
        true
    }

    /// Valid frame bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.data.get(..self.bytes_used).unwrap_or_default()
    }
}

/// Identity of one opened device instance, used to reject callbacks from
/// a previously released device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceToken(pub u64);

impl DeviceToken {
    /// Allocate a process-unique token.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Opaque session identifier handed to [`SessionEvents`] callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Allocate a process-unique session id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Opaque handle to an output surface the device renders preview into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// Asynchronous device fault reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    /// Unspecified driver error.
    Unknown,
    /// The device was reclaimed by another client.
    Evicted,
    /// The camera service died.
    ServerDied,
    /// Driver-specific code.
    Other(i32),
}

impl DeviceErrorCode {
    /// Map a raw driver code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Unknown,
            2 => Self::Evicted,
            100 => Self::ServerDied,
            other => Self::Other(other),
        }
    }

    /// Raw driver code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Unknown => 1,
            Self::Evicted => 2,
            Self::ServerDied => 100,
            Self::Other(code) => code,
        }
    }

    /// Whether this error means the device was taken away from us.
    #[must_use]
    pub const fn is_eviction(self) -> bool {
        matches!(self, Self::Evicted)
    }

    /// Human-readable message reported to the consumer.
    #[must_use]
    pub fn message(self) -> String {
        match self {
            Self::ServerDied => "Camera server died!".to_owned(),
            other => format!("Camera error: {}", other.code()),
        }
    }
}

/// Error type for driver operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Device with given index was not found, or open returned no handle.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// The device went away while it was being acquired.
    #[error("Device disconnected: {0}")]
    Disconnected(String),
    /// The device refused the output surface.
    #[error("Failed to attach output surface: {0}")]
    SurfaceAttachFailed(String),
    /// The driver rejected the requested parameters.
    #[error("Parameters rejected: {0}")]
    ParametersRejected(String),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// The device cannot perform the requested operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Opens cameras and reports their static information.
pub trait CameraProvider {
    /// The device type returned by `open`.
    type Device: CameraDevice;

    /// Open the camera with the given index.
    fn open(&mut self, index: u32) -> Result<Self::Device>;

    /// Facing and sensor orientation of the camera with the given index.
    fn device_info(&self, index: u32) -> Result<DeviceInfo>;
}

/// Abstraction over an opened camera device.
///
/// Callbacks registered here may fire on any thread; implementations
/// marshal them onto the session's context by posting through the given
/// [`EventPoster`].
pub trait CameraDevice {
    /// Identity of this opened instance.
    fn token(&self) -> DeviceToken;

    /// Attach the surface preview frames are rendered into.
    fn set_preview_surface(&mut self, surface: SurfaceHandle) -> Result<()>;

    /// Read the device capability parameters.
    fn parameters(&self) -> Result<DeviceParameters>;

    /// Apply capture parameters.
    fn set_parameters(&mut self, settings: &DeviceSettings) -> Result<()>;

    /// Override the platform display orientation correction.
    fn set_display_orientation(&mut self, degrees: u32) -> Result<()>;

    /// Register the sink for asynchronous device errors.
    fn set_error_callback(&mut self, poster: EventPoster);

    /// Deliver preview frames through queued callback buffers.
    fn set_preview_callback_with_buffer(&mut self, poster: EventPoster);

    /// Queue a buffer for the driver to fill.
    fn add_callback_buffer(&mut self, buffer: CallbackBuffer);

    /// Start streaming preview frames.
    fn start_preview(&mut self) -> Result<()>;

    /// Stop streaming preview frames.
    fn stop_preview(&mut self);

    /// Release the device. Buffers still queued with the driver are dropped.
    fn release(self)
    where
        Self: Sized;
}

/// Shared GPU-visible surface that receives zero-copy frames.
pub trait SurfaceProvider: Send {
    /// Handle the device renders into.
    fn surface(&self) -> SurfaceHandle;

    /// Expected size of frames rendered into the surface.
    fn set_texture_size(&mut self, width: u32, height: u32);

    /// Start posting [`SessionEvent::SurfaceFrame`](crate::context::SessionEvent::SurfaceFrame)s.
    fn start_listening(&mut self, poster: EventPoster);

    /// Stop posting frames.
    fn stop_listening(&mut self);
}

/// Consumer of session lifecycle notifications and frames.
pub trait SessionEvents: Send {
    /// A camera is about to be opened.
    fn on_camera_opening(&mut self);

    /// The session hit a device error and has been torn down.
    fn on_camera_error(&mut self, session: SessionId, message: &str);

    /// The device was evicted and the session has been torn down.
    fn on_camera_disconnected(&mut self, session: SessionId);

    /// The session released its device.
    fn on_camera_closed(&mut self, session: SessionId);

    /// A frame was captured. Dropping the frame releases its buffer.
    fn on_frame_captured(&mut self, session: SessionId, frame: VideoFrame);
}
