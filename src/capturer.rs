//! Runs a capture session on its own camera thread.
//!
//! [`CameraCapturer::start`] is the asynchronous entry point: it returns as
//! soon as the camera thread exists, and the creation outcome arrives later
//! through the callback. Open and configure run to completion on the camera
//! thread before any stop request is handled.

use std::io;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::config::SessionConfig;
use crate::context::{EventPoster, ExecutionContext, SessionEvent};
use crate::session::{CaptureSession, Collaborators, SessionFailure};
use crate::traits::{CameraProvider, SessionId};

/// Handle to a camera thread running one capture session.
#[derive(Debug)]
pub struct CameraCapturer {
    poster: EventPoster,
    thread: Option<JoinHandle<()>>,
}

impl CameraCapturer {
    /// Spawn the camera thread, create the session there and run it until
    /// it stops.
    pub fn start<P, F>(
        mut provider: P,
        config: SessionConfig,
        collaborators: Collaborators,
        on_created: F,
    ) -> io::Result<Self>
    where
        P: CameraProvider + Send + 'static,
        F: FnOnce(Result<SessionId, SessionFailure>) + Send + 'static,
    {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name(format!("camera-{}", config.camera_index))
            .spawn(move || {
                let context = ExecutionContext::current();
                // The receiver outlives this send; failure means start() is gone.
                let _ = ready_tx.send(context.poster());

                let mut running = None;
                CaptureSession::create(
                    &mut provider,
                    context,
                    &config,
                    collaborators,
                    |result| match result {
                        Ok(session) => {
                            on_created(Ok(session.id()));
                            running = Some(session);
                        }
                        Err(failure) => on_created(Err(failure)),
                    },
                );

                if let Some(mut session) = running {
                    if let Err(err) = session.run() {
                        error!(error = %err, "camera session loop failed");
                    }
                    debug!(session = %session.id(), "camera thread exiting");
                }
            })?;

        let poster = ready_rx
            .recv()
            .map_err(|_| io::Error::other("camera thread exited before it was ready"))?;

        Ok(Self {
            poster,
            thread: Some(thread),
        })
    }

    /// Ask the session to stop and wait for the camera thread to exit.
    /// A no-op after the first call.
    ///
    /// Called from a [`SessionEvents`](crate::traits::SessionEvents)
    /// callback, which runs on the camera thread, the stop is only queued:
    /// the session stops once the callback returns.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.poster.post(SessionEvent::Stop);
        if thread.thread().id() == thread::current().id() {
            debug!("stop requested on the camera thread, not joining");
            return;
        }
        if thread.join().is_err() {
            error!("camera thread panicked");
        }
    }
}

impl Drop for CameraCapturer {
    fn drop(&mut self) {
        self.stop();
    }
}
