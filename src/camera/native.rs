//! Native webcam backend using the nokhwa crate
//!
//! Each open device gets its own capture thread; frames are handed to the
//! reader through a small bounded channel that always holds the newest ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;

use super::{CaptureBackend, CaptureMode, CaptureStream};
use crate::error::DeviceError;

/// How long to wait for the capture thread to open the device
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Webcam backend for the host platform
#[derive(Debug, Default, Clone, Copy)]
pub struct NokhwaBackend;

impl NokhwaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for NokhwaBackend {
    type Stream = NokhwaStream;

    fn open(&mut self, index: u32, mode: &CaptureMode) -> Result<NokhwaStream, DeviceError> {
        NokhwaStream::open(index, *mode)
    }

    fn device_names(&mut self) -> HashMap<u32, String> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras
                .iter()
                .enumerate()
                .map(|(position, info)| {
                    let index = info.index().as_index().unwrap_or(position as u32);
                    (index, info.human_name().to_string())
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to query camera names: {:?}", e);
                HashMap::new()
            }
        }
    }
}

/// Open webcam; dropping it stops the capture thread and releases the device
pub struct NokhwaStream {
    frames: Receiver<RgbImage>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    read_timeout: Duration,
    fps: Option<u32>,
}

impl NokhwaStream {
    fn open(index: u32, mode: CaptureMode) -> Result<Self, DeviceError> {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<RgbImage>(mode.buffer_frames as usize);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32, String>>(1);
        let running = Arc::new(AtomicBool::new(true));

        let running_clone = running.clone();
        let drain = frame_rx.clone();
        let thread_handle = std::thread::Builder::new()
            .name(format!("camera-capture-{}", index))
            .spawn(move || {
                capture_thread(index, mode, frame_tx, drain, ready_tx, running_clone);
            })
            .map_err(|e| DeviceError::Backend(format!("Failed to spawn capture thread: {}", e)))?;

        let stream = Self {
            frames: frame_rx,
            running,
            thread_handle: Some(thread_handle),
            read_timeout: mode.read_timeout,
            fps: None,
        };

        stream.await_ready(index, &ready_rx, OPEN_TIMEOUT)
    }

    /// Wait for the capture thread's open report.
    ///
    /// On timeout the thread is told to stop and detached, not joined: it may
    /// still be blocked inside the platform open call.
    fn await_ready(
        mut self,
        index: u32,
        ready: &Receiver<Result<u32, String>>,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        match ready.recv_timeout(timeout) {
            Ok(Ok(fps)) => {
                self.fps = Some(fps);
                Ok(self)
            }
            Ok(Err(reason)) => Err(DeviceError::OpenFailed { index, reason }),
            Err(_) => {
                self.detach();
                Err(DeviceError::OpenFailed {
                    index,
                    reason: format!("capture thread did not report back within {:?}", timeout),
                })
            }
        }
    }

    fn detach(&mut self) {
        self.running.store(false, Ordering::Release);
        self.thread_handle.take();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl CaptureStream for NokhwaStream {
    fn read(&mut self) -> Option<RgbImage> {
        self.frames.recv_timeout(self.read_timeout).ok()
    }

    fn fps(&self) -> Option<u32> {
        self.fps
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Try the requested mode first, then progressively looser formats
fn open_camera(index: u32, mode: &CaptureMode) -> Result<Camera, String> {
    let camera_index = CameraIndex::Index(index);
    let resolution = Resolution::new(mode.width, mode.height);
    let attempts = [
        RequestedFormatType::Closest(CameraFormat::new(resolution, FrameFormat::MJPEG, mode.fps)),
        RequestedFormatType::HighestResolution(resolution),
        RequestedFormatType::None,
    ];

    let mut last_error = String::new();
    for (attempt, requested) in attempts.into_iter().enumerate() {
        match Camera::new(camera_index.clone(), RequestedFormat::new::<RgbFormat>(requested)) {
            Ok(camera) => return Ok(camera),
            Err(e) => {
                tracing::debug!("Camera {} format attempt {} failed: {:?}", index, attempt + 1, e);
                last_error = e.to_string();
            }
        }
    }
    Err(last_error)
}

fn capture_thread(
    index: u32,
    mode: CaptureMode,
    frames: Sender<RgbImage>,
    drain: Receiver<RgbImage>,
    ready: Sender<Result<u32, String>>,
    running: Arc<AtomicBool>,
) {
    let mut camera = match open_camera(index, &mode) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = ready.send(Err(format!("Failed to open camera stream: {}", e)));
        return;
    }

    tracing::debug!(
        "Camera {} stream open: {} ({}x{} @ {} fps)",
        index,
        camera.info().human_name(),
        camera.resolution().width(),
        camera.resolution().height(),
        camera.frame_rate()
    );
    let _ = ready.send(Ok(camera.frame_rate()));

    while running.load(Ordering::Acquire) {
        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::trace!("Failed to capture frame: {:?}", e);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };
        let resolution = frame.resolution();
        let image = match frame.decode_image::<RgbFormat>() {
            Ok(decoded) => RgbImage::from_raw(resolution.width(), resolution.height(), decoded.into_raw()),
            Err(e) => {
                tracing::trace!("Failed to decode frame: {:?}", e);
                continue;
            }
        };
        let Some(image) = image else {
            continue;
        };

        // Keep only the newest frames
        if let Err(TrySendError::Full(image)) = frames.try_send(image) {
            let _ = drain.try_recv();
            let _ = frames.try_send(image);
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::debug!("Failed to stop camera {} stream: {:?}", index, e);
    }
    tracing::debug!("Camera {} capture thread stopped", index);
}
