//! Tracking session: lifecycle, worker thread and command dispatch

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use serde::Serialize;

use super::command::{Command, Reply, StartOptions};
use super::events::PublishSink;
use super::failover::open_with_failover;
use super::tick::{LoopExit, TrackingLoop, WorkerParts, WorkerRequest};
use crate::camera::{CaptureBackend, CaptureDevice, CaptureDeviceManager};
use crate::error::{DeviceError, TrackingError};
use crate::gaze::{
    fit_offset, CalibrationSample, CalibrationState, GazeEstimator, LandmarkSource, ScreenSize,
    SharedMapping,
};
use crate::settings::TrackingSettings;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Read-only view of the session for status endpoints
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub device_index: Option<u32>,
    pub preferred_index: u32,
    pub devices: Vec<CaptureDevice>,
    pub frames_processed: u64,
    pub samples_published: u64,
}

/// Session snapshot shared with the worker and the API server
#[derive(Debug, Clone, Default)]
pub struct SharedStatus {
    inner: Arc<RwLock<SessionSnapshot>>,
}

impl SharedStatus {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().clone()
    }

    pub fn device_index(&self) -> Option<u32> {
        self.inner.read().device_index
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.write().state = state;
    }

    pub(crate) fn set_device_index(&self, index: Option<u32>) {
        self.inner.write().device_index = index;
    }

    pub(crate) fn set_preferred_index(&self, index: u32) {
        self.inner.write().preferred_index = index;
    }

    pub(crate) fn set_devices(&self, devices: Vec<CaptureDevice>) {
        self.inner.write().devices = devices;
    }

    pub(crate) fn set_counters(&self, frames: u64, published: u64) {
        let mut guard = self.inner.write();
        guard.frames_processed = frames;
        guard.samples_published = published;
    }
}

struct Worker<B: CaptureBackend> {
    handle: JoinHandle<(WorkerParts<B>, LoopExit)>,
    stop: Arc<AtomicBool>,
    requests: Sender<WorkerRequest>,
}

/// Drives capture, estimation and publishing for one user.
///
/// Owns the capture manager, estimator and landmark source while idle and
/// moves them into the `gaze-tracking` worker thread while running.
pub struct TrackingSession<B: CaptureBackend + 'static> {
    settings: TrackingSettings,
    preferred_index: u32,
    mapping: SharedMapping,
    sink: Arc<dyn PublishSink>,
    status: SharedStatus,
    state: SessionState,
    devices: Vec<CaptureDevice>,
    parts: Option<WorkerParts<B>>,
    worker: Option<Worker<B>>,
}

impl<B: CaptureBackend + 'static> TrackingSession<B> {
    pub fn new(
        manager: CaptureDeviceManager<B>,
        estimator: GazeEstimator,
        source: Box<dyn LandmarkSource>,
        settings: TrackingSettings,
        sink: Arc<dyn PublishSink>,
    ) -> Self {
        let preferred_index = manager.settings().preferred_index;
        let mapping = estimator.mapping().clone();
        let devices = manager.devices().to_vec();
        let status = SharedStatus::default();
        status.set_preferred_index(preferred_index);
        status.set_devices(devices.clone());
        Self {
            settings,
            preferred_index,
            mapping,
            sink,
            status,
            state: SessionState::Idle,
            devices,
            parts: Some(WorkerParts {
                manager,
                estimator,
                source,
            }),
            worker: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn preferred_index(&self) -> u32 {
        self.preferred_index
    }

    /// Last enumerated device list
    pub fn devices(&self) -> &[CaptureDevice] {
        &self.devices
    }

    pub fn mapping(&self) -> &SharedMapping {
        &self.mapping
    }

    pub fn status(&self) -> &SharedStatus {
        &self.status
    }

    /// Execute one command
    pub fn dispatch(&mut self, command: Command) -> Result<Reply, TrackingError> {
        self.reap_worker();
        tracing::debug!("Dispatching {}", command.name());
        match command {
            Command::StartTracking(options) => self.start(options.unwrap_or_default()),
            Command::StopTracking => Ok(self.stop()),
            Command::ListDevices => Ok(self.list_devices()),
            Command::SwitchDevice { index } => self.switch_device(index),
            Command::Calibrate {
                offset_x,
                offset_y,
                scale_x,
                scale_y,
            } => self.calibrate(offset_x, offset_y, scale_x, scale_y),
            Command::FitCalibration { samples } => self.fit_calibration(&samples),
            Command::SetScreenSize { width, height } => self.set_screen_size(width, height),
        }
    }

    /// Start tracking. Starting while running is a no-op success.
    pub fn start(&mut self, options: StartOptions) -> Result<Reply, TrackingError> {
        self.reap_worker();
        if self.state == SessionState::Running {
            return Ok(Reply::AlreadyRunning {
                device_index: self.status.device_index(),
            });
        }

        if let (Some(width), Some(height)) = (options.screen_width, options.screen_height) {
            self.set_screen_size(width, height)?;
        }
        if let Some(index) = options.preferred_index {
            self.set_preferred_index(index);
        }

        self.set_state(SessionState::Starting);
        let result = self.open_and_spawn();
        if let Err(e) = &result {
            tracing::error!("Tracking could not start: {}", e);
            self.set_state(SessionState::Failed);
        }
        result
    }

    fn open_and_spawn(&mut self) -> Result<Reply, TrackingError> {
        let mut parts = self.parts.take().ok_or(TrackingError::WorkerGone)?;

        if parts.manager.devices().is_empty() {
            parts.manager.enumerate();
            self.update_devices(parts.manager.devices().to_vec());
        }

        let opened = open_with_failover(&mut parts.manager, self.preferred_index);
        let index = match opened {
            Ok(index) => index,
            Err(e) => {
                self.parts = Some(parts);
                return Err(e.into());
            }
        };
        let Some(device) = parts.manager.active_device().cloned() else {
            parts.manager.close();
            self.parts = Some(parts);
            return Err(DeviceError::NotEnumerated(index).into());
        };

        parts.estimator.reset();
        self.status.set_device_index(Some(index));
        self.status.set_counters(0, 0);

        let stop = Arc::new(AtomicBool::new(false));
        let (request_tx, request_rx) = crossbeam_channel::bounded::<WorkerRequest>(1);
        let tracking = TrackingLoop::new(
            parts,
            self.settings.clone(),
            self.sink.clone(),
            self.status.clone(),
            self.preferred_index,
        );

        let stop_clone = stop.clone();
        let handle = std::thread::Builder::new()
            .name("gaze-tracking".to_string())
            .spawn(move || tracking.run(&stop_clone, &request_rx))
            .map_err(|e| {
                tracing::error!("Failed to spawn tracking thread: {}", e);
                TrackingError::WorkerGone
            })?;

        self.worker = Some(Worker {
            handle,
            stop,
            requests: request_tx,
        });
        self.set_state(SessionState::Running);
        tracing::info!("Tracking started with camera {}", index);
        Ok(Reply::Started {
            device,
            devices: self.devices.clone(),
        })
    }

    /// Stop tracking and release the device. Always succeeds.
    pub fn stop(&mut self) -> Reply {
        if let Some(worker) = self.worker.take() {
            self.set_state(SessionState::Stopping);
            worker.stop.store(true, Ordering::Release);
            self.join_worker(worker);
        }
        self.status.set_device_index(None);
        self.set_state(SessionState::Idle);
        Reply::Stopped
    }

    /// Re-enumerate while idle; report the cached list while running
    pub fn list_devices(&mut self) -> Reply {
        if self.worker.is_none() {
            if let Some(parts) = self.parts.as_mut() {
                let devices = parts.manager.enumerate();
                self.update_devices(devices);
            }
        }
        Reply::Devices {
            devices: self.devices.clone(),
            current_index: self.status.device_index(),
        }
    }

    /// Switch capture device.
    ///
    /// While running the swap happens on the worker between ticks. While
    /// idle the index is recorded for the next start.
    pub fn switch_device(&mut self, index: u32) -> Result<Reply, TrackingError> {
        if !self.devices.iter().any(|d| d.index == index) {
            return Err(DeviceError::NotEnumerated(index).into());
        }

        let Some(worker) = self.worker.as_ref() else {
            self.set_preferred_index(index);
            return Ok(Reply::PreferredDeviceSet { index });
        };

        if self.status.device_index() == Some(index) {
            return Ok(Reply::Switched {
                index,
                devices: self.devices.clone(),
            });
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        match worker.requests.try_send(WorkerRequest::SwitchDevice { index, reply: reply_tx }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(TrackingError::WorkerBusy),
            Err(TrySendError::Disconnected(_)) => return Err(TrackingError::WorkerGone),
        }

        let result = match reply_rx.recv_timeout(self.settings.switch_timeout()) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                // The request stays queued; the worker applies it after its current tick
                tracing::warn!("Switch to camera {} still pending", index);
                self.set_preferred_index(index);
                return Err(TrackingError::SwitchTimeout { index });
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.reap_worker();
                return Err(TrackingError::WorkerGone);
            }
        };
        match result {
            Ok(switched) => {
                self.set_preferred_index(switched);
                Ok(Reply::Switched {
                    index: switched,
                    devices: self.devices.clone(),
                })
            }
            Err(e) => {
                // An exhausted failover ends the worker; collect it now
                self.reap_worker();
                Err(e)
            }
        }
    }

    /// Apply a manual calibration; effective from the next tick
    pub fn calibrate(
        &mut self,
        offset_x: f32,
        offset_y: f32,
        scale_x: f32,
        scale_y: f32,
    ) -> Result<Reply, TrackingError> {
        let calibration = CalibrationState::new(offset_x, offset_y, scale_x, scale_y)?;
        self.mapping.set_calibration(calibration);
        tracing::info!(?calibration, "Calibration applied");
        Ok(Reply::CalibrationApplied {
            calibration,
            mean_error_px: None,
        })
    }

    /// Fit an offset from point-based calibration samples and apply it
    pub fn fit_calibration(&mut self, samples: &[CalibrationSample]) -> Result<Reply, TrackingError> {
        let fit = fit_offset(samples, self.mapping.screen()).ok_or(TrackingError::EmptyCalibration)?;
        let calibration = fit.to_state();
        self.mapping.set_calibration(calibration);
        tracing::info!(
            ?calibration,
            mean_error_px = fit.mean_error_px,
            "Calibration fitted from {} samples",
            samples.len()
        );
        Ok(Reply::CalibrationApplied {
            calibration,
            mean_error_px: Some(fit.mean_error_px),
        })
    }

    /// Set the target screen; also resets the sensitivity for its aspect ratio
    pub fn set_screen_size(&mut self, width: u32, height: u32) -> Result<Reply, TrackingError> {
        let screen = ScreenSize::new(width, height)?;
        self.mapping.set_screen_size(screen);
        let calibration = self.mapping.calibration();
        tracing::info!(
            "Screen size set to {}x{} (sensitivity {}, {})",
            width,
            height,
            calibration.scale_x,
            calibration.scale_y
        );
        Ok(Reply::ScreenSizeApplied { screen, calibration })
    }

    /// Collect a worker that exited on its own
    fn reap_worker(&mut self) {
        let finished = self.worker.as_ref().is_some_and(|w| w.handle.is_finished());
        if !finished {
            return;
        }
        if let Some(worker) = self.worker.take() {
            self.join_worker(worker);
        }
    }

    fn join_worker(&mut self, worker: Worker<B>) {
        match worker.handle.join() {
            Ok((parts, exit)) => {
                self.parts = Some(parts);
                match exit {
                    LoopExit::Stopped => self.set_state(SessionState::Idle),
                    LoopExit::Failed(_) => self.set_state(SessionState::Failed),
                }
            }
            Err(_) => {
                tracing::error!("Tracking thread panicked");
                self.set_state(SessionState::Failed);
            }
        }
        self.status.set_device_index(None);
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.status.set_state(state);
    }

    fn set_preferred_index(&mut self, index: u32) {
        self.preferred_index = index;
        self.status.set_preferred_index(index);
    }

    fn update_devices(&mut self, devices: Vec<CaptureDevice>) {
        self.status.set_devices(devices.clone());
        self.devices = devices;
    }
}

impl<B: CaptureBackend + 'static> Drop for TrackingSession<B> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            let _ = worker.handle.join();
        }
    }
}
