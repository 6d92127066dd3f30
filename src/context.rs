//! Single designated execution context for a capture session.
//!
//! Every state transition, driver callback and buffer-pool operation of a
//! session runs on the thread that created its [`ExecutionContext`].
//! Callbacks that fire elsewhere are posted into the context's mailbox as
//! [`SessionEvent`]s and handled when the owner drains it.

use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::trace;

use crate::frame::SurfaceFrame;
use crate::session::SessionError;
use crate::traits::{CallbackBuffer, DeviceErrorCode, DeviceToken};

/// Message marshaled onto a session's execution context.
#[derive(Debug)]
pub enum SessionEvent {
    /// The driver filled a callback buffer.
    BufferFrame {
        /// Device instance that produced the frame.
        device: DeviceToken,
        /// Filled buffer.
        buffer: CallbackBuffer,
    },
    /// The shared surface received a frame.
    SurfaceFrame(SurfaceFrame),
    /// A consumer released a frame built on a pooled buffer.
    BufferReleased(CallbackBuffer),
    /// The driver reported an asynchronous fault.
    DeviceError(DeviceErrorCode),
    /// Stop the session.
    Stop,
}

/// Cloneable, thread-safe handle for posting events to a context.
#[derive(Debug, Clone)]
pub struct EventPoster {
    sender: Sender<SessionEvent>,
}

impl EventPoster {
    /// Post an event for later execution on the context.
    ///
    /// Returns `false` if the context no longer exists; the event is dropped.
    pub fn post(&self, event: SessionEvent) -> bool {
        if self.sender.send(event).is_ok() {
            true
        } else {
            trace!("context gone, dropping event");
            false
        }
    }
}

/// Execution context bound to the thread that created it.
#[derive(Debug)]
pub struct ExecutionContext {
    owner: ThreadId,
    sender: Sender<SessionEvent>,
    receiver: Receiver<SessionEvent>,
}

impl ExecutionContext {
    /// Create a context owned by the calling thread.
    #[must_use]
    pub fn current() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            owner: thread::current().id(),
            sender,
            receiver,
        }
    }

    /// Whether the calling thread owns this context.
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Fail with [`SessionError::ProtocolViolation`] when called off the
    /// owning thread.
    pub fn check_is_current(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(SessionError::ProtocolViolation {
                operation,
                owner: self.owner,
                caller: thread::current().id(),
            })
        }
    }

    /// Handle for posting events to this context from any thread.
    #[must_use]
    pub fn poster(&self) -> EventPoster {
        EventPoster {
            sender: self.sender.clone(),
        }
    }

    /// Next queued event, if any.
    pub(crate) fn try_next(&self) -> Option<SessionEvent> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the next event.
    pub(crate) fn next_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}
