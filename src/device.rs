//! V4L2 camera backend using the v4l crate.
//!
//! V4L2 has no callback API, so [`V4L2Device::start_preview`] moves the
//! device onto a streaming thread that copies each mmap frame into the next
//! queued callback buffer and posts it to the session. Frames that arrive
//! while no buffer is queued are dropped, as a driver would.

use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace, warn};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::context::{EventPoster, SessionEvent};
use crate::traits::{
    CallbackBuffer, CameraDevice, CameraError, CameraProvider, DeviceCapabilities,
    DeviceErrorCode, DeviceInfo, DeviceParameters, DeviceSettings, DeviceToken, Facing,
    FocusMode, FourCC, FramerateRange, Result, Size, SurfaceHandle, SurfaceProvider,
};

/// mmap buffers requested from the driver.
const STREAM_BUFFER_COUNT: u32 = 4;

/// How long a dequeue may block before the stop flag is rechecked.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// `V4L2_CID_FOCUS_AUTO`.
const CID_FOCUS_AUTO: u32 = 0x009a_090c;
/// `V4L2_CID_IMAGE_STABILIZATION`.
const CID_IMAGE_STABILIZATION: u32 = 0x009a_0916;
/// `V4L2_CID_CAMERA_ORIENTATION`: 0 front, 1 back, 2 external.
const CID_CAMERA_ORIENTATION: u32 = 0x009a_0922;
/// `V4L2_CID_CAMERA_SENSOR_ROTATION`, in degrees.
const CID_CAMERA_SENSOR_ROTATION: u32 = 0x009a_0923;

/// Sizes probed on stepwise frame-size ranges.
const STEPWISE_PROBE_SIZES: [(u32, u32); 5] = [
    (320, 240),
    (640, 480),
    (1280, 720),
    (1920, 1080),
    (2592, 1944),
];

/// Opens V4L2 capture devices by index (`/dev/videoN`).
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Provider;

impl V4l2Provider {
    /// Create a provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn device_path(index: u32) -> String {
    format!("/dev/video{index}")
}

fn open_error(index: u32, err: &io::Error) -> CameraError {
    match err.kind() {
        io::ErrorKind::NotFound => CameraError::DeviceNotFound(index),
        _ if err.raw_os_error() == Some(ENODEV) => CameraError::Disconnected(err.to_string()),
        _ => CameraError::DeviceOpenFailed(err.to_string()),
    }
}

/// `ENODEV`, reported by a device that was unplugged.
const ENODEV: i32 = 19;

impl CameraProvider for V4l2Provider {
    type Device = V4L2Device;

    fn open(&mut self, index: u32) -> Result<V4L2Device> {
        V4L2Device::open(index)
    }

    fn device_info(&self, index: u32) -> Result<DeviceInfo> {
        let device = Device::new(index as usize).map_err(|err| open_error(index, &err))?;
        // Both controls are read-only, so their default is the fixed value.
        let controls = device.query_controls().unwrap_or_default();
        let value = |id| {
            controls
                .iter()
                .find(|control| control.id == id)
                .map(|control| control.default)
        };

        let facing = match value(CID_CAMERA_ORIENTATION) {
            Some(0) => Facing::Front,
            Some(1) => Facing::Back,
            _ => Facing::External,
        };
        let orientation = value(CID_CAMERA_SENSOR_ROTATION)
            .and_then(|degrees| u32::try_from(degrees).ok())
            .map_or(0, |degrees| degrees % 360);
        Ok(DeviceInfo {
            facing,
            orientation,
        })
    }
}

/// Stand-in output surface for V4L2, which renders into no GPU surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSurface;

impl SurfaceProvider for NullSurface {
    fn surface(&self) -> SurfaceHandle {
        SurfaceHandle(0)
    }

    fn set_texture_size(&mut self, width: u32, height: u32) {
        trace!(width, height, "texture size ignored by null surface");
    }

    fn start_listening(&mut self, _poster: EventPoster) {}

    fn stop_listening(&mut self) {}
}

/// State shared between an opened device and its streaming thread.
#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<VecDeque<CallbackBuffer>>,
    streaming: AtomicBool,
}

impl Shared {
    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<CallbackBuffer>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sinks and identity handed to the streaming thread.
struct StreamSinks {
    token: DeviceToken,
    frames: EventPoster,
    errors: Option<EventPoster>,
}

/// An opened V4L2 capture device.
pub struct V4L2Device {
    index: u32,
    token: DeviceToken,
    device: Option<Device>,
    capabilities: DeviceCapabilities,
    shared: Arc<Shared>,
    error_sink: Option<EventPoster>,
    frame_sink: Option<EventPoster>,
    worker: Option<JoinHandle<Device>>,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize).map_err(|err| open_error(index, &err))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };
        if !capabilities.can_capture || !capabilities.can_stream {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} is not a streaming capture device",
                device_path(index)
            )));
        }
        debug!(index, card = %capabilities.card, driver = %capabilities.driver, "opened V4L2 device");

        Ok(Self {
            index,
            token: DeviceToken::next(),
            device: Some(device),
            capabilities,
            shared: Arc::default(),
            error_sink: None,
            frame_sink: None,
            worker: None,
        })
    }

    /// Capabilities reported by the driver.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn device(&self) -> Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| CameraError::StreamError("device is streaming".to_owned()))
    }

    fn supported_sizes(device: &Device, fourcc: v4l::FourCC) -> Vec<Size> {
        let Ok(framesizes) = device.enum_framesizes(fourcc) else {
            return Vec::new();
        };

        let mut sizes = BTreeSet::new();
        for framesize in framesizes {
            match framesize.size {
                FrameSizeEnum::Discrete(size) => {
                    sizes.insert((size.width, size.height));
                }
                FrameSizeEnum::Stepwise(range) => {
                    for (width, height) in STEPWISE_PROBE_SIZES {
                        if (range.min_width..=range.max_width).contains(&width)
                            && (range.min_height..=range.max_height).contains(&height)
                        {
                            sizes.insert((width, height));
                        }
                    }
                }
            }
        }
        sizes
            .into_iter()
            .map(|(width, height)| Size::new(width, height))
            .collect()
    }

    fn supported_fps_ranges(device: &Device, fourcc: v4l::FourCC, size: Size) -> Vec<FramerateRange> {
        let Ok(intervals) = device.enum_frameintervals(fourcc, size.width, size.height) else {
            return Vec::new();
        };

        let mut ranges = BTreeSet::new();
        for interval in intervals {
            match interval.interval {
                FrameIntervalEnum::Discrete(fraction) => {
                    if let Some(fps) = fps_x1000(fraction.numerator, fraction.denominator) {
                        ranges.insert((fps, fps));
                    }
                }
                FrameIntervalEnum::Stepwise(step) => {
                    // Longest interval is the lowest rate.
                    if let (Some(min), Some(max)) = (
                        fps_x1000(step.max.numerator, step.max.denominator),
                        fps_x1000(step.min.numerator, step.min.denominator),
                    ) {
                        ranges.insert((min, max));
                    }
                }
            }
        }
        ranges
            .into_iter()
            .map(|(min, max)| FramerateRange::new(min, max))
            .collect()
    }

    fn has_control(device: &Device, id: u32) -> bool {
        device
            .query_controls()
            .is_ok_and(|controls| controls.iter().any(|control| control.id == id))
    }

    fn focus_modes(device: &Device) -> Vec<FocusMode> {
        if Self::has_control(device, CID_FOCUS_AUTO) {
            vec![FocusMode::Auto, FocusMode::ContinuousVideo]
        } else {
            vec![FocusMode::Fixed]
        }
    }

    fn join_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.streaming.store(false, Ordering::SeqCst);
        match worker.join() {
            Ok(device) => self.device = Some(device),
            Err(_) => error!(index = self.index, "V4L2 streaming thread panicked"),
        }
    }
}

/// Frame interval `numerator/denominator` seconds as fps × 1000.
fn fps_x1000(numerator: u32, denominator: u32) -> Option<u32> {
    if numerator == 0 {
        return None;
    }
    u32::try_from(u64::from(denominator) * 1000 / u64::from(numerator)).ok()
}

impl CameraDevice for V4L2Device {
    fn token(&self) -> DeviceToken {
        self.token
    }

    fn set_preview_surface(&mut self, surface: SurfaceHandle) -> Result<()> {
        // Frames are read through mmap buffers, never into a surface.
        trace!(index = self.index, surface = surface.0, "preview surface ignored");
        Ok(())
    }

    fn parameters(&self) -> Result<DeviceParameters> {
        let device = self.device()?;
        let descriptions = device
            .enum_formats()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        let preview_formats: Vec<FourCC> = descriptions
            .iter()
            .map(|description| FourCC::from(description.fourcc))
            .collect();

        let Some(primary) = crate::format::preferred_pixel_format(&preview_formats) else {
            return Ok(DeviceParameters {
                preview_formats,
                focus_modes: Self::focus_modes(device),
                ..DeviceParameters::default()
            });
        };

        let preview_sizes = Self::supported_sizes(device, primary.into());
        let current = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        let probe = preview_sizes
            .iter()
            .copied()
            .find(|size| size.width == current.width && size.height == current.height)
            .or_else(|| preview_sizes.last().copied())
            .unwrap_or_else(|| Size::new(current.width, current.height));
        let mut fps_ranges = Self::supported_fps_ranges(device, primary.into(), probe);
        if fps_ranges.is_empty() {
            if let Ok(params) = device.params() {
                if let Some(fps) = fps_x1000(params.interval.numerator, params.interval.denominator) {
                    fps_ranges.push(FramerateRange::new(fps, fps));
                }
            }
        }

        Ok(DeviceParameters {
            picture_sizes: preview_sizes.clone(),
            preview_sizes,
            fps_ranges,
            preview_formats,
            video_stabilization_supported: Self::has_control(device, CID_IMAGE_STABILIZATION),
            focus_modes: Self::focus_modes(device),
        })
    }

    fn set_parameters(&mut self, settings: &DeviceSettings) -> Result<()> {
        let device = self.device()?;
        let mut format = device
            .format()
            .map_err(|err| CameraError::ParametersRejected(err.to_string()))?;
        format.width = settings.preview_size.width;
        format.height = settings.preview_size.height;
        if let Some(fourcc) = settings.preview_format {
            format.fourcc = fourcc.into();
        }

        let applied = device
            .set_format(&format)
            .map_err(|err| CameraError::ParametersRejected(err.to_string()))?;
        if applied.width != settings.preview_size.width
            || applied.height != settings.preview_size.height
            || settings
                .preview_format
                .is_some_and(|fourcc| FourCC::from(applied.fourcc) != fourcc)
        {
            return Err(CameraError::ParametersRejected(format!(
                "driver chose {}x{} {} instead of {} {}",
                applied.width,
                applied.height,
                FourCC::from(applied.fourcc),
                settings.preview_size,
                settings
                    .preview_format
                    .map_or_else(|| "any".to_owned(), |fourcc| fourcc.to_string()),
            )));
        }

        let fps = settings.fps_range.max.div_ceil(1000).max(1);
        if let Err(err) = device.set_params(&Parameters::with_fps(fps)) {
            warn!(index = self.index, fps, error = %err, "driver refused frame interval");
        }

        let mut controls = Vec::new();
        if settings.video_stabilization {
            controls.push(("stabilization", CID_IMAGE_STABILIZATION));
        }
        if settings.focus_mode == Some(FocusMode::ContinuousVideo) {
            controls.push(("continuous focus", CID_FOCUS_AUTO));
        }
        for (name, id) in controls {
            let control = Control {
                id,
                value: Value::Integer(1),
            };
            if let Err(err) = device.set_control(control) {
                warn!(index = self.index, control = name, error = %err, "failed to enable control");
            }
        }
        Ok(())
    }

    fn set_display_orientation(&mut self, degrees: u32) -> Result<()> {
        // V4L2 cannot rotate; only the neutral orientation is accepted.
        if degrees % 360 == 0 {
            Ok(())
        } else {
            Err(CameraError::Unsupported(format!(
                "display orientation {degrees}"
            )))
        }
    }

    fn set_error_callback(&mut self, poster: EventPoster) {
        self.error_sink = Some(poster);
    }

    fn set_preview_callback_with_buffer(&mut self, poster: EventPoster) {
        self.frame_sink = Some(poster);
    }

    fn add_callback_buffer(&mut self, buffer: CallbackBuffer) {
        self.shared.queue().push_back(buffer);
    }

    fn start_preview(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(frames) = self.frame_sink.clone() else {
            return Err(CameraError::Unsupported(
                "shared-surface preview on V4L2".to_owned(),
            ));
        };
        let device = self
            .device
            .take()
            .ok_or_else(|| CameraError::StreamError("device is streaming".to_owned()))?;

        let sinks = StreamSinks {
            token: self.token,
            frames,
            errors: self.error_sink.clone(),
        };
        let shared = Arc::clone(&self.shared);
        shared.streaming.store(true, Ordering::SeqCst);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let worker = thread::Builder::new()
            .name(format!("v4l2-stream-{}", self.index))
            .spawn(move || {
                stream_frames(&device, &shared, &sinks, &ready_tx);
                device
            })?;
        self.worker = Some(worker);

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(CameraError::StreamError("streaming thread exited".to_owned())));
        if started.is_err() {
            self.join_worker();
        }
        started
    }

    fn stop_preview(&mut self) {
        self.join_worker();
    }

    fn release(mut self) {
        self.join_worker();
        let dropped = self.shared.queue().len();
        self.shared.queue().clear();
        debug!(index = self.index, dropped, "released V4L2 device");
    }
}

impl Drop for V4L2Device {
    fn drop(&mut self) {
        self.join_worker();
    }
}

impl std::fmt::Debug for V4L2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4L2Device")
            .field("index", &self.index)
            .field("token", &self.token)
            .field("card", &self.capabilities.card)
            .field("streaming", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

/// Map a streaming failure to the code the session reports.
fn error_code(err: &io::Error) -> DeviceErrorCode {
    match err.raw_os_error() {
        Some(ENODEV) => DeviceErrorCode::Evicted,
        Some(code) => DeviceErrorCode::Other(code),
        None => DeviceErrorCode::Unknown,
    }
}

/// Copy a dequeued frame into the next queued callback buffer.
///
/// A frame larger than the buffer goes undelivered and the buffer stays
/// queued for the next one.
fn copy_frame(shared: &Shared, frame: &[u8], sequence: u32) -> Option<CallbackBuffer> {
    let mut queue = shared.queue();
    let Some(mut buffer) = queue.pop_front() else {
        trace!(sequence, "no callback buffer queued, dropping frame");
        return None;
    };
    if !buffer.fill(frame) {
        warn!(
            sequence,
            frame_bytes = frame.len(),
            buffer_bytes = buffer.data.len(),
            "frame larger than callback buffer, dropping frame"
        );
        queue.push_front(buffer);
        return None;
    }
    Some(buffer)
}

/// Body of the streaming thread.
fn stream_frames(
    device: &Device,
    shared: &Shared,
    sinks: &StreamSinks,
    ready: &crossbeam_channel::Sender<Result<()>>,
) {
    let mut stream = match Stream::with_buffers(device, Type::VideoCapture, STREAM_BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(CameraError::StreamError(err.to_string())));
            return;
        }
    };
    stream.set_timeout(DEQUEUE_TIMEOUT);
    // start_preview is waiting on the other end.
    let _ = ready.send(Ok(()));

    while shared.streaming.load(Ordering::SeqCst) {
        let (data, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
            Err(err) => {
                error!(error = %err, "V4L2 dequeue failed");
                if let Some(errors) = &sinks.errors {
                    errors.post(SessionEvent::DeviceError(error_code(&err)));
                }
                return;
            }
        };

        let used = data.len().min(meta.bytesused as usize);
        let Some(buffer) = copy_frame(shared, data.get(..used).unwrap_or(data), meta.sequence)
        else {
            continue;
        };

        let delivered = sinks.frames.post(SessionEvent::BufferFrame {
            device: sinks.token,
            buffer,
        });
        if !delivered {
            debug!("session gone, stopping V4L2 stream");
            return;
        }
    }
}
