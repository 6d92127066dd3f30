//! Frames handed to the session consumer.
//!
//! A frame owns its buffer. Dropping the frame is the release: pooled
//! buffers are posted back to the session's context for recycling, and
//! surface slots run the release hook supplied by the surface provider.

use std::fmt;

use crate::context::{EventPoster, SessionEvent};
use crate::traits::{CallbackBuffer, FourCC};

/// 2D affine transform over normalized texture coordinates.
///
/// Maps `(x, y)` to `(a*x + c*y + tx, b*x + d*y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// X scale / rotation term.
    pub a: f32,
    /// Y shear / rotation term.
    pub b: f32,
    /// X shear / rotation term.
    pub c: f32,
    /// Y scale / rotation term.
    pub d: f32,
    /// X translation.
    pub tx: f32,
    /// Y translation.
    pub ty: f32,
}

impl Transform {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Horizontal flip about the texture centre (`x' = 1 - x`).
    pub const HORIZONTAL_FLIP: Self = Self {
        a: -1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 1.0,
        ty: 0.0,
    };

    /// `self * other`: `other` is applied first.
    #[must_use]
    pub fn pre_concat(&self, other: &Self) -> Self {
        Self {
            a: self.a.mul_add(other.a, self.c * other.b),
            b: self.b.mul_add(other.a, self.d * other.b),
            c: self.a.mul_add(other.c, self.c * other.d),
            d: self.b.mul_add(other.c, self.d * other.d),
            tx: self.a.mul_add(other.tx, self.c.mul_add(other.ty, self.tx)),
            ty: self.b.mul_add(other.tx, self.d.mul_add(other.ty, self.ty)),
        }
    }

    /// This transform with a horizontal mirror applied before it.
    #[must_use]
    pub fn mirrored(&self) -> Self {
        self.pre_concat(&Self::HORIZONTAL_FLIP)
    }

    /// Map a point.
    #[must_use]
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a.mul_add(x, self.c.mul_add(y, self.tx)),
            self.b.mul_add(x, self.d.mul_add(y, self.ty)),
        )
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Callback run exactly once when a surface slot is released.
#[derive(Default)]
pub struct ReleaseHook(Option<Box<dyn FnOnce() + Send>>);

impl ReleaseHook {
    /// Wrap a release callback.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Some(Box::new(release)))
    }
}

impl fmt::Debug for ReleaseHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReleaseHook")
            .field(&self.0.is_some())
            .finish()
    }
}

impl Drop for ReleaseHook {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

/// Frame resident in the shared surface, as posted by the surface provider.
#[derive(Debug)]
pub struct SurfaceFrame {
    /// Texture holding the frame.
    pub texture_id: u32,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Texture coordinate transform supplied by the surface.
    pub transform: Transform,
    /// Capture timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Returns the slot to the surface.
    pub release: ReleaseHook,
}

/// Zero-copy frame buffer referencing a surface slot.
#[derive(Debug)]
pub struct TextureBuffer {
    texture_id: u32,
    width: u32,
    height: u32,
    transform: Transform,
    _release: ReleaseHook,
}

impl TextureBuffer {
    /// Texture holding the frame.
    pub const fn texture_id(&self) -> u32 {
        self.texture_id
    }

    /// Texture coordinate transform to sample with.
    pub const fn transform(&self) -> Transform {
        self.transform
    }
}

/// CPU-addressable frame buffer borrowed from the session's pool.
#[derive(Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    fourcc: FourCC,
    buffer: Option<CallbackBuffer>,
    return_to: EventPoster,
}

impl PixelBuffer {
    pub(crate) const fn new(
        width: u32,
        height: u32,
        fourcc: FourCC,
        buffer: CallbackBuffer,
        return_to: EventPoster,
    ) -> Self {
        Self {
            width,
            height,
            fourcc,
            buffer: Some(buffer),
            return_to,
        }
    }

    /// Pixel format of `data`.
    pub const fn fourcc(&self) -> FourCC {
        self.fourcc
    }

    /// Raw pixel bytes.
    pub fn data(&self) -> &[u8] {
        self.buffer.as_ref().map_or(&[], CallbackBuffer::bytes)
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.return_to.post(SessionEvent::BufferReleased(buffer));
        }
    }
}

/// Buffer behind a [`VideoFrame`].
#[derive(Debug)]
pub enum FrameBuffer {
    /// Raw pixels copied out of the driver.
    Pixel(PixelBuffer),
    /// Slot in the shared surface.
    Texture(TextureBuffer),
}

impl FrameBuffer {
    /// Frame width in pixels.
    pub const fn width(&self) -> u32 {
        match self {
            Self::Pixel(buffer) => buffer.width,
            Self::Texture(buffer) => buffer.width,
        }
    }

    /// Frame height in pixels.
    pub const fn height(&self) -> u32 {
        match self {
            Self::Pixel(buffer) => buffer.height,
            Self::Texture(buffer) => buffer.height,
        }
    }
}

/// Timestamped, oriented frame delivered to the consumer.
#[derive(Debug)]
pub struct VideoFrame {
    buffer: FrameBuffer,
    rotation: u32,
    timestamp_ns: u64,
}

impl VideoFrame {
    /// Wrap a buffer with its clockwise rotation and capture timestamp.
    #[must_use]
    pub const fn new(buffer: FrameBuffer, rotation: u32, timestamp_ns: u64) -> Self {
        Self {
            buffer,
            rotation,
            timestamp_ns,
        }
    }

    /// Frame buffer.
    pub const fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Clockwise rotation to apply for upright display, in degrees.
    pub const fn rotation(&self) -> u32 {
        self.rotation
    }

    /// Capture timestamp in nanoseconds.
    pub const fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }
}

/// Build a texture buffer from a surface frame, optionally mirrored.
pub(crate) fn texture_buffer(frame: SurfaceFrame, mirror: bool) -> (TextureBuffer, u64) {
    let SurfaceFrame {
        texture_id,
        width,
        height,
        transform,
        timestamp_ns,
        release,
    } = frame;
    let transform = if mirror {
        transform.mirrored()
    } else {
        transform
    };
    (
        TextureBuffer {
            texture_id,
            width,
            height,
            transform,
            _release: release,
        },
        timestamp_ns,
    )
}
