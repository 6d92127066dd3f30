//! Mock collaborators for testing without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::context::{EventPoster, SessionEvent};
use crate::frame::{FrameBuffer, ReleaseHook, SurfaceFrame, Transform, VideoFrame};
use crate::metrics::{Histogram, MetricsSink};
use crate::orientation::FixedRotation;
use crate::session::Collaborators;
use crate::traits::{
    CallbackBuffer, CameraDevice, CameraError, CameraProvider, DeviceErrorCode, DeviceInfo,
    DeviceParameters, DeviceSettings, DeviceToken, Facing, FocusMode, FourCC, FramerateRange,
    Result, SessionEvents, SessionId, Size, SurfaceHandle, SurfaceProvider,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Horizontal luma gradient from dark to light.
    Gradient,
    /// Solid luma value.
    Solid(u8),
}

/// Fill an NV21 frame: luma plane from the pattern, neutral chroma.
fn fill_test_frame(data: &mut [u8], width: u32, height: u32, pattern: TestPattern) {
    let width = width.max(1) as usize;
    let luma_len = (width * height as usize).min(data.len());
    let (luma, chroma) = data.split_at_mut(luma_len);

    for (offset, value) in luma.iter_mut().enumerate() {
        *value = match pattern {
            #[allow(clippy::cast_possible_truncation)]
            TestPattern::Gradient => ((offset % width) * 255 / width) as u8,
            TestPattern::Solid(y) => y,
        };
    }
    chroma.fill(128);
}

/// Shared state behind a [`MockCamera`] and the devices it opens.
#[derive(Debug)]
pub struct MockState {
    /// Reported facing and sensor orientation.
    pub info: DeviceInfo,
    /// Reported capability parameters.
    pub parameters: DeviceParameters,
    /// Frame size used to generate patterns.
    pub pattern_size: Size,
    /// Pattern written into delivered frames.
    pub pattern: TestPattern,

    /// Fail `open` with this message.
    pub open_failure: Option<String>,
    /// Make `open` return no handle.
    pub open_returns_none: bool,
    /// Fail `open` as disconnected.
    pub open_disconnected: bool,
    /// Fail surface attach with this message.
    pub surface_failure: Option<String>,
    /// Fail `device_info`.
    pub info_failure: bool,
    /// Fail `parameters` with this message.
    pub parameters_failure: Option<String>,
    /// Reject `set_parameters` with this message.
    pub reject_settings: Option<String>,
    /// Fail `set_display_orientation`.
    pub orientation_failure: bool,
    /// Fail `start_preview` with this message.
    pub start_preview_failure: Option<String>,

    /// Number of successful opens.
    pub opened: usize,
    /// Number of releases.
    pub released: usize,
    /// Number of preview starts.
    pub preview_started: usize,
    /// Number of preview stops.
    pub preview_stopped: usize,
    /// Last applied settings.
    pub applied: Option<DeviceSettings>,
    /// Last display orientation override.
    pub display_orientation: Option<u32>,
    /// Attached surface.
    pub surface: Option<SurfaceHandle>,
    /// Buffers queued with the driver.
    pub queued: VecDeque<CallbackBuffer>,
    /// Buffers freed by releasing the device while still queued.
    pub released_with_device: usize,
    /// Registered error sink.
    pub error_sink: Option<EventPoster>,
    /// Registered frame sink.
    pub frame_sink: Option<EventPoster>,
    /// Token of the last opened device.
    pub token: Option<DeviceToken>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            info: DeviceInfo {
                facing: Facing::Back,
                orientation: 90,
            },
            parameters: DeviceParameters {
                preview_sizes: vec![
                    Size::new(640, 480),
                    Size::new(1280, 720),
                    Size::new(1920, 1080),
                ],
                picture_sizes: vec![Size::new(1280, 720), Size::new(2592, 1944)],
                fps_ranges: vec![
                    FramerateRange::new(15000, 15000),
                    FramerateRange::new(7000, 30000),
                    FramerateRange::new(30000, 30000),
                ],
                preview_formats: vec![FourCC::NV21, FourCC::YV12],
                video_stabilization_supported: true,
                focus_modes: vec![FocusMode::Auto, FocusMode::ContinuousVideo],
            },
            pattern_size: Size::new(1280, 720),
            pattern: TestPattern::Gradient,
            open_failure: None,
            open_returns_none: false,
            open_disconnected: false,
            surface_failure: None,
            info_failure: false,
            parameters_failure: None,
            reject_settings: None,
            orientation_failure: false,
            start_preview_failure: None,
            opened: 0,
            released: 0,
            preview_started: 0,
            preview_stopped: 0,
            applied: None,
            display_orientation: None,
            surface: None,
            queued: VecDeque::new(),
            released_with_device: 0,
            error_sink: None,
            frame_sink: None,
            token: None,
        }
    }
}

/// Mock camera provider. Clones share state, so a test keeps one clone to
/// drive the driver side while the session owns the device.
#[derive(Debug, Clone, Default)]
pub struct MockCamera {
    state: Arc<Mutex<MockState>>,
}

impl MockCamera {
    /// Create a back-facing mock camera with default capabilities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the shared state.
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Take a queued buffer out of the driver, as if it were being filled.
    pub fn take_queued_buffer(&self) -> Option<CallbackBuffer> {
        self.state().queued.pop_front()
    }

    /// Fill the next queued buffer and deliver it through the frame sink.
    pub fn deliver_frame(&self) -> bool {
        let (sink, token, buffer) = {
            let mut state = self.state();
            let (Some(sink), Some(token)) = (state.frame_sink.clone(), state.token) else {
                return false;
            };
            let Some(mut buffer) = state.queued.pop_front() else {
                return false;
            };
            let len = buffer.data.len();
            fill_test_frame(
                &mut buffer.data,
                state.pattern_size.width,
                state.pattern_size.height,
                state.pattern,
            );
            buffer.bytes_used = len;
            (sink, token, buffer)
        };
        sink.post(SessionEvent::BufferFrame {
            device: token,
            buffer,
        })
    }

    /// Post a buffer through the last registered frame sink with an
    /// arbitrary device token.
    pub fn post_buffer(&self, device: DeviceToken, buffer: CallbackBuffer) -> bool {
        let sink = self.state().frame_sink.clone();
        sink.is_some_and(|sink| sink.post(SessionEvent::BufferFrame { device, buffer }))
    }

    /// Report an asynchronous device error.
    pub fn raise_error(&self, code: DeviceErrorCode) -> bool {
        let sink = self.state().error_sink.clone();
        sink.is_some_and(|sink| sink.post(SessionEvent::DeviceError(code)))
    }
}

impl CameraProvider for MockCamera {
    type Device = MockDevice;

    fn open(&mut self, index: u32) -> Result<MockDevice> {
        let mut state = self.state();
        if let Some(message) = &state.open_failure {
            return Err(CameraError::DeviceOpenFailed(message.clone()));
        }
        if state.open_returns_none {
            return Err(CameraError::DeviceNotFound(index));
        }
        if state.open_disconnected {
            return Err(CameraError::Disconnected("device removed".to_owned()));
        }

        let token = DeviceToken::next();
        state.opened += 1;
        state.token = Some(token);
        Ok(MockDevice {
            token,
            state: Arc::clone(&self.state),
        })
    }

    fn device_info(&self, index: u32) -> Result<DeviceInfo> {
        let state = self.state();
        if state.info_failure {
            return Err(CameraError::DeviceNotFound(index));
        }
        Ok(state.info)
    }
}

/// Mock device opened by [`MockCamera`].
#[derive(Debug)]
pub struct MockDevice {
    token: DeviceToken,
    state: Arc<Mutex<MockState>>,
}

impl CameraDevice for MockDevice {
    fn token(&self) -> DeviceToken {
        self.token
    }

    fn set_preview_surface(&mut self, surface: SurfaceHandle) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.surface_failure {
            return Err(CameraError::SurfaceAttachFailed(message.clone()));
        }
        state.surface = Some(surface);
        Ok(())
    }

    fn parameters(&self) -> Result<DeviceParameters> {
        let state = lock(&self.state);
        if let Some(message) = &state.parameters_failure {
            return Err(CameraError::StreamError(message.clone()));
        }
        Ok(state.parameters.clone())
    }

    fn set_parameters(&mut self, settings: &DeviceSettings) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.reject_settings {
            return Err(CameraError::ParametersRejected(message.clone()));
        }
        state.applied = Some(settings.clone());
        Ok(())
    }

    fn set_display_orientation(&mut self, degrees: u32) -> Result<()> {
        let mut state = lock(&self.state);
        if state.orientation_failure {
            return Err(CameraError::Unsupported("display orientation".to_owned()));
        }
        state.display_orientation = Some(degrees);
        Ok(())
    }

    fn set_error_callback(&mut self, poster: EventPoster) {
        lock(&self.state).error_sink = Some(poster);
    }

    fn set_preview_callback_with_buffer(&mut self, poster: EventPoster) {
        lock(&self.state).frame_sink = Some(poster);
    }

    fn add_callback_buffer(&mut self, buffer: CallbackBuffer) {
        lock(&self.state).queued.push_back(buffer);
    }

    fn start_preview(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.start_preview_failure {
            return Err(CameraError::StreamError(message.clone()));
        }
        state.preview_started += 1;
        Ok(())
    }

    fn stop_preview(&mut self) {
        lock(&self.state).preview_stopped += 1;
    }

    fn release(self) {
        let mut state = lock(&self.state);
        state.released += 1;
        state.released_with_device += state.queued.len();
        state.queued.clear();
    }
}

/// State of a [`MockSurface`].
#[derive(Debug, Default)]
pub struct SurfaceState {
    /// Last expected texture size.
    pub texture_size: Option<(u32, u32)>,
    /// Whether frames are being posted.
    pub listening: bool,
    /// Registered sink.
    pub sink: Option<EventPoster>,
    /// Number of `stop_listening` calls.
    pub stop_calls: usize,
    /// Transform attached to delivered frames.
    pub transform: Transform,
}

/// Mock shared surface.
#[derive(Debug, Clone, Default)]
pub struct MockSurface {
    state: Arc<Mutex<SurfaceState>>,
    released: Arc<AtomicUsize>,
}

impl MockSurface {
    /// Lock the surface state.
    pub fn state(&self) -> MutexGuard<'_, SurfaceState> {
        lock(&self.state)
    }

    /// Number of surface slots released by consumers.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Post a frame if listening. The sink is kept after `stop_listening`
    /// is not called, so late frames can be simulated with `force`.
    pub fn deliver_frame(&self, timestamp_ns: u64, force: bool) -> bool {
        let (sink, (width, height), transform) = {
            let state = self.state();
            let Some(sink) = state.sink.clone() else {
                return false;
            };
            if !state.listening && !force {
                return false;
            }
            (sink, state.texture_size.unwrap_or((0, 0)), state.transform)
        };
        let released = Arc::clone(&self.released);
        sink.post(SessionEvent::SurfaceFrame(SurfaceFrame {
            texture_id: 1,
            width,
            height,
            transform,
            timestamp_ns,
            release: ReleaseHook::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            }),
        }))
    }
}

impl SurfaceProvider for MockSurface {
    fn surface(&self) -> SurfaceHandle {
        SurfaceHandle(42)
    }

    fn set_texture_size(&mut self, width: u32, height: u32) {
        self.state().texture_size = Some((width, height));
    }

    fn start_listening(&mut self, poster: EventPoster) {
        let mut state = self.state();
        state.listening = true;
        state.sink = Some(poster);
    }

    fn stop_listening(&mut self) {
        let mut state = self.state();
        state.listening = false;
        state.stop_calls += 1;
    }
}

/// What a recorded frame looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Session that delivered it.
    pub session: SessionId,
    /// Frame rotation.
    pub rotation: u32,
    /// Frame timestamp.
    pub timestamp_ns: u64,
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Pixel bytes for pixel frames.
    pub pixels: Option<Vec<u8>>,
    /// Transform for texture frames.
    pub transform: Option<Transform>,
}

/// Everything a [`RecordingEvents`] saw.
#[derive(Debug, Default)]
pub struct EventLog {
    /// `on_camera_opening` calls.
    pub opening: usize,
    /// `on_camera_error` messages.
    pub errors: Vec<String>,
    /// `on_camera_disconnected` calls.
    pub disconnected: usize,
    /// `on_camera_closed` calls.
    pub closed: usize,
    /// Delivered frames.
    pub frames: Vec<FrameRecord>,
    /// Keep delivered frames alive instead of releasing them at once.
    pub retain_frames: bool,
    /// Frames kept alive.
    pub retained: Vec<VideoFrame>,
}

/// [`SessionEvents`] that records every callback.
#[derive(Debug, Clone, Default)]
pub struct RecordingEvents {
    log: Arc<Mutex<EventLog>>,
}

impl RecordingEvents {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the log.
    pub fn log(&self) -> MutexGuard<'_, EventLog> {
        lock(&self.log)
    }

    /// Wait until at least `count` frames were delivered.
    pub fn wait_for_frames(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.log().frames.len() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl SessionEvents for RecordingEvents {
    fn on_camera_opening(&mut self) {
        self.log().opening += 1;
    }

    fn on_camera_error(&mut self, _session: SessionId, message: &str) {
        self.log().errors.push(message.to_owned());
    }

    fn on_camera_disconnected(&mut self, _session: SessionId) {
        self.log().disconnected += 1;
    }

    fn on_camera_closed(&mut self, _session: SessionId) {
        self.log().closed += 1;
    }

    fn on_frame_captured(&mut self, session: SessionId, frame: VideoFrame) {
        let (pixels, transform) = match frame.buffer() {
            FrameBuffer::Pixel(buffer) => (Some(buffer.data().to_vec()), None),
            FrameBuffer::Texture(buffer) => (None, Some(buffer.transform())),
        };
        let record = FrameRecord {
            session,
            rotation: frame.rotation(),
            timestamp_ns: frame.timestamp_ns(),
            width: frame.buffer().width(),
            height: frame.buffer().height(),
            pixels,
            transform,
        };

        let mut log = self.log();
        log.frames.push(record);
        if log.retain_frames {
            log.retained.push(frame);
        }
    }
}

/// [`MetricsSink`] that records every sample.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    samples: Arc<Mutex<Vec<(Histogram, u32)>>>,
}

impl RecordingMetrics {
    /// Samples recorded into `histogram`, in order.
    pub fn samples(&self, histogram: Histogram) -> Vec<u32> {
        lock(&self.samples)
            .iter()
            .filter(|(recorded, _)| *recorded == histogram)
            .map(|(_, sample)| *sample)
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn add_sample(&self, histogram: Histogram, sample: u32) {
        lock(&self.samples).push((histogram, sample));
    }
}

/// Manually advanced [`Clock`].
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    now: Arc<AtomicU64>,
}

impl FakeClock {
    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.now.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_nanos(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Handles to the collaborators built by [`collaborators`].
#[derive(Debug, Clone)]
pub struct TestRig {
    /// Surface given to the session.
    pub surface: MockSurface,
    /// Metrics given to the session.
    pub metrics: RecordingMetrics,
    /// Clock given to the session.
    pub clock: FakeClock,
}

/// Mock collaborators reporting into `events`, with the display rotated
/// by `rotation` degrees.
pub fn collaborators(events: &RecordingEvents, rotation: u32) -> (Collaborators, TestRig) {
    let rig = TestRig {
        surface: MockSurface::default(),
        metrics: RecordingMetrics::default(),
        clock: FakeClock::default(),
    };
    let collaborators = Collaborators {
        events: Box::new(events.clone()),
        surface: Box::new(rig.surface.clone()),
        metrics: Arc::new(rig.metrics.clone()),
        rotation: Arc::new(FixedRotation(rotation)),
        clock: Arc::new(rig.clock.clone()),
    };
    (collaborators, rig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_camera_open() {
        let mut camera = MockCamera::new();
        let device = camera.open(0).expect("open should succeed");
        assert_eq!(camera.state().opened, 1);
        assert_eq!(camera.state().token, Some(device.token()));
        assert_eq!(
            camera.device_info(0).expect("info should succeed").facing,
            Facing::Back
        );
    }

    #[test]
    fn test_mock_camera_open_failures() {
        let mut camera = MockCamera::new();
        camera.state().open_returns_none = true;
        assert!(matches!(camera.open(3), Err(CameraError::DeviceNotFound(3))));

        camera.state().open_returns_none = false;
        camera.state().open_disconnected = true;
        assert!(matches!(camera.open(0), Err(CameraError::Disconnected(_))));
    }

    #[test]
    fn test_release_drops_queued_buffers() {
        let mut camera = MockCamera::new();
        let mut device = camera.open(0).expect("open should succeed");
        device.add_callback_buffer(CallbackBuffer::new(crate::traits::BufferId(0), 4));
        device.add_callback_buffer(CallbackBuffer::new(crate::traits::BufferId(1), 4));

        device.release();

        let state = camera.state();
        assert_eq!(state.released, 1);
        assert_eq!(state.released_with_device, 2);
        assert!(state.queued.is_empty());
    }

    #[test]
    fn test_gradient_pattern() {
        let mut data = vec![0u8; 16 * 2 * 3 / 2];
        fill_test_frame(&mut data, 16, 2, TestPattern::Gradient);

        // Left edge dark, right edge bright, chroma neutral.
        assert_eq!(data[0], 0);
        assert!(data[15] > 200);
        assert!(data[32..].iter().all(|&value| value == 128));
    }

    #[test]
    fn test_solid_pattern() {
        let mut data = vec![0u8; 8 * 2 * 3 / 2];
        fill_test_frame(&mut data, 8, 2, TestPattern::Solid(77));
        assert!(data[..16].iter().all(|&value| value == 77));
    }
}
