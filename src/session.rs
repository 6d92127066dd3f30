//! Capture session state machine.
//!
//! A [`CaptureSession`] only exists once its device is open, configured and
//! streaming. Failures before that point are reported to the creation
//! callback and leave nothing held. After construction the session is
//! `Running` until an explicit stop or a device error tears it down; both
//! paths share one idempotent teardown guarded by the state flag.

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::clock::{elapsed_ms, Clock};
use crate::config::SessionConfig;
use crate::configure;
use crate::context::{EventPoster, ExecutionContext, SessionEvent};
use crate::delivery::{BufferCopyDelivery, Delivery, DeliveryMode, SurfaceDelivery};
use crate::format::{self, FormatRequest, NegotiationError};
use crate::frame::SurfaceFrame;
use crate::metrics::{resolution_sample, Histogram, MetricsSink};
use crate::orientation::{frame_orientation, needs_mirror, DisplayRotation};
use crate::pool::{FrameBufferPool, PoolStats};
use crate::traits::{
    CallbackBuffer, CameraDevice, CameraError, CameraProvider, CaptureFormat, DeviceErrorCode,
    DeviceInfo, DeviceToken, SessionEvents, SessionId, SurfaceProvider,
};

/// Poll interval of [`CaptureSession::run`].
const RUN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Externally observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Streaming frames to the consumer.
    Running,
    /// Torn down. Terminal.
    Stopped,
}

/// Session failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Opening the device, attaching the output surface or reading device
    /// info failed. Nothing is held.
    #[error("failed to acquire camera {index}: {source}")]
    Acquisition {
        /// Camera index.
        index: u32,
        /// Driver error.
        #[source]
        source: CameraError,
    },
    /// No compatible format. The device has been released.
    #[error("format negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    /// The driver rejected the configuration. The device has been released.
    #[error("camera configuration failed: {0}")]
    Configuration(#[source] CameraError),
    /// The driver reported a fault while running. The session has been torn down.
    #[error("{}", .0.message())]
    RuntimeDevice(DeviceErrorCode),
    /// An operation ran off the session's execution context.
    #[error("{operation} called on {caller:?}, session is bound to {owner:?}")]
    ProtocolViolation {
        /// Operation attempted.
        operation: &'static str,
        /// Thread owning the context.
        owner: ThreadId,
        /// Calling thread.
        caller: ThreadId,
    },
}

impl SessionError {
    /// Driver-provided message for this error, falling back to its display.
    #[must_use]
    pub fn driver_message(&self) -> String {
        match self {
            Self::Acquisition { source, .. } | Self::Configuration(source) => source.to_string(),
            Self::Negotiation(NegotiationError::Parameters(source)) => source.to_string(),
            other => other.to_string(),
        }
    }
}

/// Kind of a creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Generic, possibly transient failure.
    Error,
    /// The camera was disconnected.
    Disconnected,
}

/// Failure reported to the creation callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    /// Failure kind.
    pub kind: FailureType,
    /// Driver-provided message.
    pub message: String,
}

impl From<&SessionError> for SessionFailure {
    fn from(err: &SessionError) -> Self {
        let kind = match err {
            SessionError::Acquisition {
                source: CameraError::Disconnected(_),
                ..
            } => FailureType::Disconnected,
            _ => FailureType::Error,
        };
        Self {
            kind,
            message: err.driver_message(),
        }
    }
}

/// Services a session calls into.
pub struct Collaborators {
    /// Consumer of lifecycle notifications and frames.
    pub events: Box<dyn SessionEvents>,
    /// Shared output surface.
    pub surface: Box<dyn SurfaceProvider>,
    /// Metrics sink.
    pub metrics: Arc<dyn MetricsSink>,
    /// Display rotation source.
    pub rotation: Arc<dyn DisplayRotation>,
    /// Monotonic clock.
    pub clock: Arc<dyn Clock>,
}

/// Device state gathered before a session exists.
struct Prepared {
    info: DeviceInfo,
    format: CaptureFormat,
    pool: Option<FrameBufferPool>,
}

/// A running (or stopped) capture session on one device.
pub struct CaptureSession<D: CameraDevice> {
    id: SessionId,
    context: ExecutionContext,
    events: Box<dyn SessionEvents>,
    surface: Box<dyn SurfaceProvider>,
    metrics: Arc<dyn MetricsSink>,
    rotation: Arc<dyn DisplayRotation>,
    clock: Arc<dyn Clock>,
    camera_index: u32,
    device: Option<D>,
    device_token: DeviceToken,
    info: DeviceInfo,
    format: CaptureFormat,
    delivery: Delivery,
    state: SessionState,
    first_frame_reported: bool,
    construction_time_ns: u64,
}

impl<D: CameraDevice> CaptureSession<D> {
    /// Open, configure and start camera `config.camera_index` on `context`,
    /// reporting the outcome to `on_created`.
    ///
    /// Must run on the thread owning `context`. Failures release anything
    /// acquired before reporting. A session whose preview fails to start is
    /// still handed over, already stopped, after `on_camera_error`.
    pub fn create<P, F>(
        provider: &mut P,
        context: ExecutionContext,
        config: &SessionConfig,
        collaborators: Collaborators,
        on_created: F,
    ) where
        P: CameraProvider<Device = D>,
        F: FnOnce(Result<Self, SessionFailure>),
    {
        match Self::try_create(provider, context, config, collaborators) {
            Ok(session) => on_created(Ok(session)),
            Err(err) => {
                warn!(camera = config.camera_index, error = %err, "failed to create camera session");
                on_created(Err(SessionFailure::from(&err)));
            }
        }
    }

    /// [`create`](Self::create), returning the outcome instead of calling back.
    pub fn try_create<P>(
        provider: &mut P,
        context: ExecutionContext,
        config: &SessionConfig,
        mut collaborators: Collaborators,
    ) -> Result<Self, SessionError>
    where
        P: CameraProvider<Device = D>,
    {
        context.check_is_current("create")?;
        let construction_time_ns = collaborators.clock.now_nanos();
        let index = config.camera_index;
        debug!(camera = index, "opening camera");
        collaborators.events.on_camera_opening();

        let mut device = provider
            .open(index)
            .map_err(|source| SessionError::Acquisition { index, source })?;

        let prepared = match Self::prepare(provider, &mut device, config, &collaborators) {
            Ok(prepared) => prepared,
            Err(err) => {
                device.release();
                return Err(err);
            }
        };

        Ok(Self::new(
            context,
            collaborators,
            index,
            device,
            prepared,
            construction_time_ns,
        ))
    }

    fn prepare<P>(
        provider: &P,
        device: &mut D,
        config: &SessionConfig,
        collaborators: &Collaborators,
    ) -> Result<Prepared, SessionError>
    where
        P: CameraProvider<Device = D>,
    {
        let index = config.camera_index;
        let acquisition = |source| SessionError::Acquisition { index, source };

        device
            .set_preview_surface(collaborators.surface.surface())
            .map_err(acquisition)?;
        let info = provider.device_info(index).map_err(acquisition)?;

        let params = device.parameters().map_err(NegotiationError::from)?;
        let request = FormatRequest {
            width: config.width,
            height: config.height,
            framerate: config.framerate,
        };
        let negotiated = format::negotiate(&params, request, config.clamp())?;
        collaborators.metrics.add_sample(
            Histogram::Resolution,
            resolution_sample(negotiated.capture.size()),
        );

        configure::apply(
            device,
            &params,
            &negotiated.capture,
            negotiated.picture_size,
            config.delivery,
        )
        .map_err(SessionError::Configuration)?;

        let pool = (!config.delivery.is_zero_copy()).then(|| {
            let mut pool = FrameBufferPool::new(negotiated.capture.image_size, config.buffer_count);
            pool.prime(device);
            pool
        });

        // Orientation is computed per frame and sent with it instead.
        device
            .set_display_orientation(0)
            .map_err(SessionError::Configuration)?;

        Ok(Prepared {
            info,
            format: negotiated.capture,
            pool,
        })
    }

    fn new(
        context: ExecutionContext,
        collaborators: Collaborators,
        camera_index: u32,
        device: D,
        prepared: Prepared,
        construction_time_ns: u64,
    ) -> Self {
        let Collaborators {
            events,
            mut surface,
            metrics,
            rotation,
            clock,
        } = collaborators;
        let id = SessionId::next();
        let device_token = device.token();
        info!(session = %id, camera = camera_index, format = %prepared.format, "created camera session");

        let delivery = match prepared.pool {
            Some(pool) => Delivery::BufferCopy(BufferCopyDelivery::new(
                pool,
                prepared.format,
                device_token,
                context.poster(),
            )),
            None => Delivery::SharedSurface(SurfaceDelivery::new(needs_mirror(&prepared.info))),
        };
        surface.set_texture_size(prepared.format.width, prepared.format.height);

        let mut session = Self {
            id,
            context,
            events,
            surface,
            metrics,
            rotation,
            clock,
            camera_index,
            device: Some(device),
            device_token,
            info: prepared.info,
            format: prepared.format,
            delivery,
            state: SessionState::Running,
            first_frame_reported: false,
            construction_time_ns,
        };
        session.start_capturing();
        session
    }

    fn start_capturing(&mut self) {
        debug!(session = %self.id, "start capturing");
        self.state = SessionState::Running;
        let poster = self.context.poster();

        let Some(device) = self.device.as_mut() else {
            return;
        };
        device.set_error_callback(poster.clone());
        match self.delivery {
            Delivery::SharedSurface(_) => self.surface.start_listening(poster),
            Delivery::BufferCopy(_) => device.set_preview_callback_with_buffer(poster),
        }

        if let Err(err) = device.start_preview() {
            error!(session = %self.id, error = %err, "failed to start preview");
            self.stop_internal();
            self.events.on_camera_error(self.id, &err.to_string());
        }
    }

    /// Stop the session. A no-op when already stopped.
    ///
    /// Fails with [`SessionError::ProtocolViolation`] off the session's
    /// context, leaving the session untouched.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        debug!(session = %self.id, camera = self.camera_index, "stop camera session");
        self.context.check_is_current("stop")?;
        if self.state != SessionState::Stopped {
            let stop_start_ns = self.clock.now_nanos();
            self.stop_internal();
            let stop_time_ms = elapsed_ms(stop_start_ns, self.clock.now_nanos());
            self.metrics.add_sample(Histogram::StopTimeMs, stop_time_ms);
        }
        Ok(())
    }

    fn stop_internal(&mut self) {
        if self.state == SessionState::Stopped {
            debug!(session = %self.id, "camera is already stopped");
            return;
        }

        self.state = SessionState::Stopped;
        self.surface.stop_listening();
        if let Some(mut device) = self.device.take() {
            device.stop_preview();
            device.release();
        }
        self.events.on_camera_closed(self.id);
        debug!(session = %self.id, "stop done");
    }

    /// Handle one event from the session's mailbox.
    pub fn handle_event(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        self.context.check_is_current("handle_event")?;
        match event {
            SessionEvent::BufferFrame { device, buffer } => self.on_buffer_frame(device, buffer),
            SessionEvent::SurfaceFrame(frame) => self.on_surface_frame(frame),
            SessionEvent::BufferReleased(buffer) => self.on_buffer_released(buffer),
            SessionEvent::DeviceError(code) => self.on_device_error(code),
            SessionEvent::Stop => self.stop()?,
        }
        Ok(())
    }

    /// Handle every event queued so far. Returns how many were handled.
    pub fn run_pending(&mut self) -> Result<usize, SessionError> {
        self.context.check_is_current("run_pending")?;
        let mut handled = 0;
        while let Some(event) = self.context.try_next() {
            self.handle_event(event)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Handle events until the session stops.
    pub fn run(&mut self) -> Result<(), SessionError> {
        self.context.check_is_current("run")?;
        while self.state == SessionState::Running {
            if let Some(event) = self.context.next_timeout(RUN_POLL_INTERVAL) {
                self.handle_event(event)?;
            }
        }
        Ok(())
    }

    fn on_device_error(&mut self, code: DeviceErrorCode) {
        if self.state == SessionState::Stopped {
            debug!(session = %self.id, code = code.code(), "device error after stop ignored");
            return;
        }

        let err = SessionError::RuntimeDevice(code);
        error!(session = %self.id, code = code.code(), "{err}");
        self.stop_internal();
        if code.is_eviction() {
            self.events.on_camera_disconnected(self.id);
        } else {
            self.events.on_camera_error(self.id, &code.message());
        }
    }

    fn on_buffer_frame(&mut self, device: DeviceToken, buffer: CallbackBuffer) {
        let Delivery::BufferCopy(delivery) = &mut self.delivery else {
            warn!(session = %self.id, "buffer frame on a shared-surface session, dropping");
            return;
        };

        if !delivery.accepts(device) {
            error!(session = %self.id, "callback from a different camera, dropping frame");
            return;
        }

        if self.state != SessionState::Running {
            let outcome = delivery.pool_mut().recycle::<D>(buffer, self.state, None);
            debug!(session = %self.id, ?outcome, "bytebuffer frame captured but camera is no longer running");
            return;
        }

        // Millisecond resolution.
        let timestamp_ns = self.clock.now_nanos() / 1_000_000 * 1_000_000;
        self.report_first_frame();
        let rotation = self.frame_orientation();

        let Delivery::BufferCopy(delivery) = &self.delivery else {
            return;
        };
        let frame = delivery.wrap(buffer, rotation, timestamp_ns);
        self.events.on_frame_captured(self.id, frame);
    }

    fn on_surface_frame(&mut self, frame: SurfaceFrame) {
        let Delivery::SharedSurface(delivery) = &self.delivery else {
            warn!(session = %self.id, "surface frame on a buffer-copy session, dropping");
            return;
        };
        let delivery = *delivery;

        if self.state != SessionState::Running {
            debug!(session = %self.id, "texture frame captured but camera is no longer running");
            return;
        }

        self.report_first_frame();
        let frame = delivery.wrap(frame, self.frame_orientation());
        self.events.on_frame_captured(self.id, frame);
    }

    fn on_buffer_released(&mut self, buffer: CallbackBuffer) {
        if let Delivery::BufferCopy(delivery) = &mut self.delivery {
            let id = buffer.id.0;
            let outcome = delivery
                .pool_mut()
                .recycle(buffer, self.state, self.device.as_mut());
            trace!(session = %self.id, buffer = id, ?outcome, "frame released");
        }
    }

    fn report_first_frame(&mut self) {
        if !self.first_frame_reported {
            let start_time_ms = elapsed_ms(self.construction_time_ns, self.clock.now_nanos());
            self.metrics.add_sample(Histogram::StartTimeMs, start_time_ms);
            self.first_frame_reported = true;
        }
    }

    fn frame_orientation(&self) -> u32 {
        frame_orientation(&self.info, self.rotation.rotation_degrees())
    }

    /// Session id passed to [`SessionEvents`] callbacks.
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Handle for posting events, such as [`SessionEvent::Stop`], from other
    /// threads.
    #[must_use]
    pub fn poster(&self) -> EventPoster {
        self.context.poster()
    }

    /// Current state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated capture format.
    pub const fn capture_format(&self) -> &CaptureFormat {
        &self.format
    }

    /// Facing and sensor orientation of the session's camera.
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Delivery mode chosen at construction.
    pub const fn delivery_mode(&self) -> DeliveryMode {
        self.delivery.mode()
    }

    /// Buffer accounting, `None` for shared-surface sessions.
    pub const fn pool_stats(&self) -> Option<PoolStats> {
        match &self.delivery {
            Delivery::BufferCopy(delivery) => Some(delivery.pool().stats()),
            Delivery::SharedSurface(_) => None,
        }
    }
}

impl<D: CameraDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            warn!(session = %self.id, "session dropped while running, releasing camera");
            self.surface.stop_listening();
            device.stop_preview();
            device.release();
        }
    }
}

impl<D: CameraDevice> std::fmt::Debug for CaptureSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("camera_index", &self.camera_index)
            .field("device", &self.device_token)
            .field("state", &self.state)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
