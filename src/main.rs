//! Capture-session binary: streams frames from a V4L2 camera and logs them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use capture_session::{
    CameraCapturer, Collaborators, ConfigError, FixedRotation, FrameBuffer, MonotonicClock,
    NullSurface, SessionConfig, SessionEvents, SessionId, TracingMetrics, V4l2Provider,
    VideoFrame,
};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long to wait for the camera before giving up.
const CAMERA_TIMEOUT: Duration = Duration::from_secs(10);

/// Capture frames from a V4L2 camera.
#[derive(Debug, Parser)]
#[command(name = "capture-session", version, about)]
struct Args {
    /// TOML session config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Camera index (/dev/videoN).
    #[arg(long)]
    device: Option<u32>,
    /// Requested width in pixels.
    #[arg(long)]
    width: Option<u32>,
    /// Requested height in pixels.
    #[arg(long)]
    height: Option<u32>,
    /// Requested framerate in fps.
    #[arg(long)]
    fps: Option<u32>,
    /// Stop after this many frames.
    #[arg(long, default_value_t = 30)]
    frames: usize,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start camera thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("camera failed to start: {0}")]
    Create(String),
    #[error("camera error: {0}")]
    Camera(String),
    #[error("camera disconnected")]
    Disconnected,
    #[error("timed out waiting for the camera")]
    Timeout,
}

/// What the camera thread reports to `main`.
#[derive(Debug)]
enum Report {
    Frame {
        rotation: u32,
        timestamp_ns: u64,
        width: u32,
        height: u32,
        bytes: usize,
    },
    Error(String),
    Disconnected,
    Closed,
}

/// Forwards session callbacks to the main thread. Frames are summarized
/// and dropped at once, which returns their buffers to the pool.
struct Forwarder {
    reports: Sender<Report>,
}

impl Forwarder {
    fn send(&self, report: Report) {
        // main stops listening once it has seen enough frames.
        let _ = self.reports.send(report);
    }
}

impl SessionEvents for Forwarder {
    fn on_camera_opening(&mut self) {
        info!("opening camera");
    }

    fn on_camera_error(&mut self, _session: SessionId, message: &str) {
        self.send(Report::Error(message.to_owned()));
    }

    fn on_camera_disconnected(&mut self, _session: SessionId) {
        self.send(Report::Disconnected);
    }

    fn on_camera_closed(&mut self, _session: SessionId) {
        self.send(Report::Closed);
    }

    fn on_frame_captured(&mut self, _session: SessionId, frame: VideoFrame) {
        let bytes = match frame.buffer() {
            FrameBuffer::Pixel(pixels) => pixels.data().len(),
            FrameBuffer::Texture(_) => 0,
        };
        self.send(Report::Frame {
            rotation: frame.rotation(),
            timestamp_ns: frame.timestamp_ns(),
            width: frame.buffer().width(),
            height: frame.buffer().height(),
            bytes,
        });
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run(&Args::parse()) {
        error!(error = %err, "capture failed");
        std::process::exit(1);
    }
}

fn session_config(args: &Args) -> Result<SessionConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    config.camera_index = args.device.unwrap_or(config.camera_index);
    config.width = args.width.unwrap_or(config.width);
    config.height = args.height.unwrap_or(config.height);
    config.framerate = args.fps.unwrap_or(config.framerate);
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<(), AppError> {
    let config = session_config(args)?;
    info!(?config, "starting capture");

    let (reports_tx, reports_rx) = crossbeam_channel::unbounded();
    let collaborators = Collaborators {
        events: Box::new(Forwarder {
            reports: reports_tx,
        }),
        surface: Box::new(NullSurface::default()),
        metrics: Arc::new(TracingMetrics),
        rotation: Arc::new(FixedRotation(0)),
        clock: Arc::new(MonotonicClock::new()),
    };

    let (created_tx, created_rx) = crossbeam_channel::bounded(1);
    let mut capturer = CameraCapturer::start(V4l2Provider::new(), config, collaborators, move |result| {
        let _ = created_tx.send(result);
    })?;

    match created_rx.recv_timeout(CAMERA_TIMEOUT) {
        Ok(Ok(session)) => info!(%session, "camera session created"),
        Ok(Err(failure)) => return Err(AppError::Create(failure.message)),
        Err(_) => return Err(AppError::Timeout),
    }

    let outcome = receive_frames(&reports_rx, args.frames);
    capturer.stop();
    outcome
}

fn receive_frames(reports: &Receiver<Report>, wanted: usize) -> Result<(), AppError> {
    let mut received = 0;
    while received < wanted {
        match reports.recv_timeout(CAMERA_TIMEOUT) {
            Ok(Report::Frame {
                rotation,
                timestamp_ns,
                width,
                height,
                bytes,
            }) => {
                received += 1;
                info!(frame = received, width, height, bytes, rotation, timestamp_ns, "frame");
            }
            Ok(Report::Error(message)) => return Err(AppError::Camera(message)),
            Ok(Report::Disconnected) => return Err(AppError::Disconnected),
            Ok(Report::Closed) => {
                warn!(received, "camera closed early");
                return Ok(());
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                return Err(AppError::Timeout)
            }
        }
    }
    info!(received, "capture complete");
    Ok(())
}
