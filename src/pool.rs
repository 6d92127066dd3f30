//! Fixed-size pool of callback buffers for buffer-copy delivery.

use tracing::{debug, trace};

use crate::session::SessionState;
use crate::traits::{BufferId, CallbackBuffer, CameraDevice};

/// Default number of buffers primed into the driver.
pub const NUMBER_OF_CAPTURE_BUFFERS: usize = 3;

/// Buffer accounting for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated and handed to the driver by `prime`.
    pub primed: usize,
    /// Released buffers handed back to the driver.
    pub requeued: usize,
    /// Released buffers dropped because the session had stopped.
    pub dropped: usize,
}

/// What `recycle` did with a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recycled {
    /// Handed back to the driver.
    Requeued,
    /// Freed; the driver is gone.
    Dropped,
}

/// Owns the buffers the driver fills in buffer-copy mode.
///
/// The buffer count is fixed at construction. A buffer is owned by exactly
/// one of the pool, the driver or a consumer frame at a time.
#[derive(Debug)]
pub struct FrameBufferPool {
    frame_size: usize,
    buffer_count: usize,
    stats: PoolStats,
}

impl FrameBufferPool {
    /// Create an empty pool of `buffer_count` buffers of `frame_size` bytes.
    #[must_use]
    pub const fn new(frame_size: usize, buffer_count: usize) -> Self {
        Self {
            frame_size,
            buffer_count,
            stats: PoolStats {
                primed: 0,
                requeued: 0,
                dropped: 0,
            },
        }
    }

    /// Buffer accounting so far.
    pub const fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Allocate the buffers and queue each with the driver.
    pub fn prime<D: CameraDevice>(&mut self, device: &mut D) {
        for index in 0..self.buffer_count {
            device.add_callback_buffer(CallbackBuffer::new(BufferId(index), self.frame_size));
        }
        self.stats.primed += self.buffer_count;
        debug!(
            buffers = self.buffer_count,
            frame_size = self.frame_size,
            "primed capture buffers"
        );
    }

    /// Return a drained buffer to the driver while the session is running;
    /// drop it once the session has stopped.
    pub fn recycle<D: CameraDevice>(
        &mut self,
        buffer: CallbackBuffer,
        state: SessionState,
        device: Option<&mut D>,
    ) -> Recycled {
        match (state, device) {
            (SessionState::Running, Some(device)) => {
                trace!(buffer = buffer.id.0, "requeueing capture buffer");
                device.add_callback_buffer(buffer);
                self.stats.requeued += 1;
                Recycled::Requeued
            }
            _ => {
                trace!(buffer = buffer.id.0, "session stopped, dropping capture buffer");
                self.stats.dropped += 1;
                Recycled::Dropped
            }
        }
    }
}
