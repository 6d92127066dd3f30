//! Frame delivery strategies.
//!
//! The strategy is chosen once when a session is built and never changes:
//! shared-surface frames are wrapped in place, buffer-copy frames borrow a
//! pooled buffer that returns to the pool when the consumer drops the frame.

use serde::Deserialize;

use crate::context::EventPoster;
use crate::frame::{self, FrameBuffer, PixelBuffer, SurfaceFrame, VideoFrame};
use crate::pool::FrameBufferPool;
use crate::traits::{CallbackBuffer, CaptureFormat, DeviceToken};

/// How frames travel from the device to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Raw pixels copied into pooled CPU buffers.
    #[default]
    BufferCopy,
    /// Frames stay in a shared GPU-visible surface.
    SharedSurface,
}

impl DeliveryMode {
    /// Whether frames bypass CPU buffers.
    #[must_use]
    pub const fn is_zero_copy(self) -> bool {
        matches!(self, Self::SharedSurface)
    }
}

/// Wraps surface-resident frames with the session's transform.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceDelivery {
    mirror: bool,
}

impl SurfaceDelivery {
    /// Strategy mirroring frames horizontally when `mirror` is set.
    #[must_use]
    pub const fn new(mirror: bool) -> Self {
        Self { mirror }
    }

    /// Build the consumer frame. Releasing it frees the surface slot.
    #[must_use]
    pub fn wrap(&self, frame: SurfaceFrame, rotation: u32) -> VideoFrame {
        let (buffer, timestamp_ns) = frame::texture_buffer(frame, self.mirror);
        VideoFrame::new(FrameBuffer::Texture(buffer), rotation, timestamp_ns)
    }
}

/// Hands pooled driver buffers to the consumer.
#[derive(Debug)]
pub struct BufferCopyDelivery {
    pool: FrameBufferPool,
    format: CaptureFormat,
    device: DeviceToken,
    release_to: EventPoster,
}

impl BufferCopyDelivery {
    /// Strategy for frames from `device` in `format`; released buffers are
    /// posted to `release_to`.
    #[must_use]
    pub const fn new(
        pool: FrameBufferPool,
        format: CaptureFormat,
        device: DeviceToken,
        release_to: EventPoster,
    ) -> Self {
        Self {
            pool,
            format,
            device,
            release_to,
        }
    }

    /// Whether a callback came from the device this strategy serves.
    #[must_use]
    pub fn accepts(&self, device: DeviceToken) -> bool {
        self.device == device
    }

    /// Buffer pool.
    pub const fn pool(&self) -> &FrameBufferPool {
        &self.pool
    }

    /// Mutable buffer pool.
    pub fn pool_mut(&mut self) -> &mut FrameBufferPool {
        &mut self.pool
    }

    /// Build the consumer frame. Dropping it schedules the buffer's return
    /// to the pool on the session's context.
    #[must_use]
    pub fn wrap(&self, buffer: CallbackBuffer, rotation: u32, timestamp_ns: u64) -> VideoFrame {
        let pixels = PixelBuffer::new(
            self.format.width,
            self.format.height,
            self.format.pixel_format,
            buffer,
            self.release_to.clone(),
        );
        VideoFrame::new(FrameBuffer::Pixel(pixels), rotation, timestamp_ns)
    }
}

/// Delivery strategy of a session.
#[derive(Debug)]
pub enum Delivery {
    /// Zero-copy delivery through the shared surface.
    SharedSurface(SurfaceDelivery),
    /// Copy delivery through pooled buffers.
    BufferCopy(BufferCopyDelivery),
}

impl Delivery {
    /// Mode this strategy implements.
    #[must_use]
    pub const fn mode(&self) -> DeliveryMode {
        match self {
            Self::SharedSurface(_) => DeliveryMode::SharedSurface,
            Self::BufferCopy(_) => DeliveryMode::BufferCopy,
        }
    }
}
