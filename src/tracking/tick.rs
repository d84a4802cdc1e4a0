//! The fixed-rate tracking loop run on the worker thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use super::events::{PreviewFrame, PublishSink, TrackingEvent, TrackingStatus};
use super::failover::open_with_failover;
use super::session::SharedStatus;
use crate::camera::{CaptureBackend, CaptureDeviceManager};
use crate::error::{DeviceError, TrackingError};
use crate::gaze::{GazeEstimator, LandmarkSource};
use crate::settings::TrackingSettings;

/// What happened during one tick. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No frame could be read
    NoFrame,
    /// A frame was read but no usable face or iris was found
    NoFace,
    /// A sample was produced but not confident enough to publish
    LowConfidence,
    /// A sample was published
    Published,
}

/// Requests serviced by the worker between ticks
pub enum WorkerRequest {
    SwitchDevice {
        index: u32,
        reply: Sender<Result<u32, TrackingError>>,
    },
}

/// Everything the worker owns while running, handed back on join
pub struct WorkerParts<B: CaptureBackend> {
    pub manager: CaptureDeviceManager<B>,
    pub estimator: GazeEstimator,
    pub source: Box<dyn LandmarkSource>,
}

/// Why the loop exited
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    Stopped,
    Failed(DeviceError),
}

/// Tick loop state. Runs on the worker thread; tests drive [`tick`](Self::tick) directly.
pub struct TrackingLoop<B: CaptureBackend> {
    parts: WorkerParts<B>,
    settings: TrackingSettings,
    sink: Arc<dyn PublishSink>,
    status: SharedStatus,
    preferred_index: u32,
    last_preview: Option<Instant>,
    last_status: Instant,
    failed_reads: u32,
    frames: u64,
    published: u64,
    faces: u64,
}

impl<B: CaptureBackend> TrackingLoop<B> {
    pub fn new(
        parts: WorkerParts<B>,
        settings: TrackingSettings,
        sink: Arc<dyn PublishSink>,
        status: SharedStatus,
        preferred_index: u32,
    ) -> Self {
        Self {
            parts,
            settings,
            sink,
            status,
            preferred_index,
            last_preview: None,
            last_status: Instant::now(),
            failed_reads: 0,
            frames: 0,
            published: 0,
            faces: 0,
        }
    }

    /// Run until the stop flag is set or the devices are exhausted.
    ///
    /// Releases the device before returning the parts.
    pub fn run(mut self, stop: &AtomicBool, requests: &Receiver<WorkerRequest>) -> (WorkerParts<B>, LoopExit) {
        tracing::info!("Gaze tracking loop started");
        let tick_interval = self.settings.tick_interval();
        let read_retry = self.settings.read_retry();

        let exit = loop {
            if stop.load(Ordering::Acquire) {
                break LoopExit::Stopped;
            }
            if let Ok(request) = requests.try_recv() {
                if let Err(e) = self.handle_request(request) {
                    break LoopExit::Failed(e);
                }
            }
            match self.tick() {
                TickOutcome::NoFrame => thread::sleep(read_retry),
                _ => thread::sleep(tick_interval),
            }
        };

        self.parts.manager.close();
        self.status.set_counters(self.frames, self.published);
        match &exit {
            LoopExit::Stopped => tracing::info!("Gaze tracking loop stopped"),
            LoopExit::Failed(e) => {
                tracing::error!("Gaze tracking loop failed: {}", e);
                self.sink.publish(TrackingEvent::TrackingStatus {
                    status: TrackingStatus::Failed,
                    message: e.to_string(),
                    device_index: None,
                });
            }
        }
        (self.parts, exit)
    }

    /// One iteration: read, detect, publish
    pub fn tick(&mut self) -> TickOutcome {
        let Some(frame) = self.parts.manager.read_frame() else {
            self.failed_reads += 1;
            if self.failed_reads % self.settings.device_lost_after.max(1) == 0 {
                self.recover_device();
            }
            return TickOutcome::NoFrame;
        };
        self.failed_reads = 0;
        self.frames += 1;

        let WorkerParts {
            estimator, source, ..
        } = &mut self.parts;
        let sample = estimator.detect(&frame, source.as_mut());

        let now = Instant::now();
        let preview_due = self
            .last_preview
            .map_or(true, |last| now.duration_since(last) >= self.settings.preview_interval());
        if preview_due {
            self.sink.publish(TrackingEvent::PreviewFrame(PreviewFrame::from_frame(&frame)));
            self.last_preview = Some(now);
        }

        if sample.is_some() {
            self.faces += 1;
        }
        if now.duration_since(self.last_status) >= self.settings.status_interval() {
            self.log_status(sample.as_ref().map(|s| (s.screen_x, s.screen_y)));
            self.last_status = now;
        }

        match sample {
            None => TickOutcome::NoFace,
            Some(sample) if sample.confidence > self.settings.publish_threshold => {
                self.sink.publish(TrackingEvent::GazeSample(sample));
                self.published += 1;
                TickOutcome::Published
            }
            Some(sample) => {
                tracing::trace!(confidence = sample.confidence, "Sample below publish threshold");
                TickOutcome::LowConfidence
            }
        }
    }

    /// Service a control request between ticks.
    ///
    /// Returns `Err` only when no device can be opened any more.
    pub fn handle_request(&mut self, request: WorkerRequest) -> Result<(), DeviceError> {
        match request {
            WorkerRequest::SwitchDevice { index, reply } => {
                let (result, fatal) = self.switch_device(index);
                let _ = reply.send(result);
                match fatal {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        }
    }

    fn switch_device(&mut self, index: u32) -> (Result<u32, TrackingError>, Option<DeviceError>) {
        tracing::info!("Switching to camera {}", index);
        match self.parts.manager.switch_to(index) {
            Ok(()) => {
                self.preferred_index = index;
                self.status.set_device_index(Some(index));
                (Ok(index), None)
            }
            Err(e @ DeviceError::NotEnumerated(_)) => (Err(e.into()), None),
            Err(e) => {
                tracing::warn!("Cannot switch to camera {}: {}", index, e);
                match open_with_failover(&mut self.parts.manager, self.preferred_index) {
                    Ok(fallback) => {
                        self.status.set_device_index(Some(fallback));
                        self.sink.publish(TrackingEvent::DeviceList {
                            devices: self.parts.manager.devices().to_vec(),
                            current_index: Some(fallback),
                        });
                        (Err(e.into()), None)
                    }
                    Err(exhausted) => {
                        self.status.set_device_index(None);
                        (Err(exhausted.clone().into()), Some(exhausted))
                    }
                }
            }
        }
    }

    /// Fail over after a run of failed reads
    fn recover_device(&mut self) {
        let lost = self.parts.manager.active_index();
        tracing::warn!(
            "Camera {:?} delivered no frames for {} reads, failing over",
            lost,
            self.failed_reads
        );
        match open_with_failover(&mut self.parts.manager, self.preferred_index) {
            Ok(index) => {
                self.status.set_device_index(Some(index));
                self.sink.publish(TrackingEvent::DeviceSwitched {
                    index,
                    message: format!("Camera lost, switched to camera {}", index),
                });
                self.sink.publish(TrackingEvent::DeviceList {
                    devices: self.parts.manager.devices().to_vec(),
                    current_index: Some(index),
                });
            }
            Err(e) => {
                self.status.set_device_index(None);
                self.sink.publish(TrackingEvent::DeviceError { error: e.to_string() });
            }
        }
    }

    fn log_status(&self, point: Option<(f32, f32)>) {
        self.status.set_counters(self.frames, self.published);
        match point {
            Some((x, y)) => tracing::debug!(
                frames = self.frames,
                faces = self.faces,
                published = self.published,
                "Eyes found - X: {:.1}, Y: {:.1}",
                x,
                y
            ),
            None => tracing::debug!(
                frames = self.frames,
                faces = self.faces,
                published = self.published,
                "No eyes detected"
            ),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn parts(&self) -> &WorkerParts<B> {
        &self.parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaze::{LandmarkSet, NoLandmarks, SharedMapping};
    use crate::settings::GazeSettings;
    use crate::test_support::{
        fast_camera_settings, fast_tracking_settings, synthetic_face, FaceLayout, FakeBackend,
    };
    use crossbeam_channel::unbounded;
    use image::RgbImage;

    fn parts(backend: &FakeBackend, source: Box<dyn LandmarkSource>) -> WorkerParts<FakeBackend> {
        let mut manager = CaptureDeviceManager::new(backend.clone(), fast_camera_settings());
        manager.enumerate();
        manager.open(0).unwrap();
        WorkerParts {
            manager,
            estimator: GazeEstimator::new(GazeSettings::default(), SharedMapping::default()),
            source,
        }
    }

    fn face_source() -> Box<dyn LandmarkSource> {
        Box::new(|frame: &RgbImage| -> Option<LandmarkSet> {
            Some(synthetic_face(&FaceLayout::centered(frame.width(), frame.height())))
        })
    }

    fn close_eyes_source() -> Box<dyn LandmarkSource> {
        // Irises 20px apart with tiny radii: confidence floors at 0.2
        Box::new(|frame: &RgbImage| -> Option<LandmarkSet> {
            Some(synthetic_face(&FaceLayout {
                eye_separation: 20.0,
                iris_radius: 1.0,
                ..FaceLayout::centered(frame.width(), frame.height())
            }))
        })
    }

    fn tracking_loop(
        backend: &FakeBackend,
        source: Box<dyn LandmarkSource>,
        settings: TrackingSettings,
    ) -> (TrackingLoop<FakeBackend>, crossbeam_channel::Receiver<TrackingEvent>) {
        let (tx, rx) = unbounded();
        let tracking = TrackingLoop::new(parts(backend, source), settings, Arc::new(tx), SharedStatus::default(), 0);
        (tracking, rx)
    }

    fn drain(rx: &crossbeam_channel::Receiver<TrackingEvent>) -> Vec<TrackingEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_tick_publishes_confident_sample() {
        let backend = FakeBackend::new().with_camera(0);
        let (mut tracking, rx) = tracking_loop(&backend, face_source(), fast_tracking_settings());

        assert_eq!(tracking.tick(), TickOutcome::Published);
        let events = drain(&rx);
        assert!(events.iter().any(|e| matches!(e, TrackingEvent::PreviewFrame(_))));
        let sample = events
            .iter()
            .find_map(|e| match e {
                TrackingEvent::GazeSample(s) => Some(*s),
                _ => None,
            })
            .unwrap();
        assert!((0.0..=1920.0).contains(&sample.screen_x));
        assert!((0.0..=1080.0).contains(&sample.screen_y));
    }

    #[test]
    fn test_tick_without_face() {
        let backend = FakeBackend::new().with_camera(0);
        let (mut tracking, rx) = tracking_loop(&backend, Box::new(NoLandmarks), fast_tracking_settings());

        assert_eq!(tracking.tick(), TickOutcome::NoFace);
        let events = drain(&rx);
        // Preview is independent of detection
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TrackingEvent::PreviewFrame(_)));
    }

    #[test]
    fn test_low_confidence_is_not_published() {
        let backend = FakeBackend::new().with_camera(0);
        let settings = TrackingSettings {
            publish_threshold: 0.5,
            ..fast_tracking_settings()
        };
        let (mut tracking, rx) = tracking_loop(&backend, close_eyes_source(), settings);

        assert_eq!(tracking.tick(), TickOutcome::LowConfidence);
        assert!(!drain(&rx).iter().any(|e| matches!(e, TrackingEvent::GazeSample(_))));
        assert_eq!(tracking.published(), 0);
    }

    #[test]
    fn test_preview_is_rate_limited() {
        let backend = FakeBackend::new().with_camera(0);
        let settings = TrackingSettings {
            preview_fps: 1,
            ..fast_tracking_settings()
        };
        let (mut tracking, rx) = tracking_loop(&backend, Box::new(NoLandmarks), settings);

        for _ in 0..5 {
            tracking.tick();
        }
        let previews = drain(&rx)
            .into_iter()
            .filter(|e| matches!(e, TrackingEvent::PreviewFrame(_)))
            .count();
        assert_eq!(previews, 1);
        assert_eq!(tracking.frames(), 5);
    }

    #[test]
    fn test_device_loss_fails_over() {
        let backend = FakeBackend::new().with_camera(0).with_camera(1);
        let (mut tracking, rx) = tracking_loop(&backend, Box::new(NoLandmarks), fast_tracking_settings());
        backend.set_producing(0, false);

        // device_lost_after = 3
        for _ in 0..3 {
            assert_eq!(tracking.tick(), TickOutcome::NoFrame);
        }
        assert_eq!(tracking.parts().manager.active_index(), Some(1));
        let events = drain(&rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackingEvent::DeviceSwitched { index: 1, .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            TrackingEvent::DeviceList { current_index: Some(1), devices } if devices.len() == 2
        )));
        assert_eq!(tracking.tick(), TickOutcome::NoFace);
    }

    #[test]
    fn test_device_loss_without_fallback_keeps_retrying() {
        let backend = FakeBackend::new().with_camera(0);
        let (mut tracking, rx) = tracking_loop(&backend, Box::new(NoLandmarks), fast_tracking_settings());
        backend.set_producing(0, false);

        for _ in 0..3 {
            tracking.tick();
        }
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, TrackingEvent::DeviceError { .. })));

        // The camera comes back; the next recovery round reopens it
        backend.set_producing(0, true);
        for _ in 0..3 {
            tracking.tick();
        }
        assert_eq!(tracking.parts().manager.active_index(), Some(0));
        assert_eq!(tracking.tick(), TickOutcome::NoFace);
    }

    #[test]
    fn test_switch_request_to_unlisted_index_keeps_device() {
        let backend = FakeBackend::new().with_camera(0).with_camera(1);
        let (mut tracking, _rx) = tracking_loop(&backend, Box::new(NoLandmarks), fast_tracking_settings());
        backend.clear_opens();

        let (reply_tx, reply_rx) = unbounded();
        tracking
            .handle_request(WorkerRequest::SwitchDevice { index: 7, reply: reply_tx })
            .unwrap();
        assert_eq!(
            reply_rx.recv().unwrap(),
            Err(TrackingError::Device(DeviceError::NotEnumerated(7)))
        );
        assert_eq!(tracking.parts().manager.active_index(), Some(0));
        assert!(backend.opens().is_empty());
    }

    #[test]
    fn test_failed_switch_falls_back() {
        let backend = FakeBackend::new().with_camera(0).with_camera(1);
        let (mut tracking, rx) = tracking_loop(&backend, Box::new(NoLandmarks), fast_tracking_settings());
        backend.set_producing(1, false);

        let (reply_tx, reply_rx) = unbounded();
        tracking
            .handle_request(WorkerRequest::SwitchDevice { index: 1, reply: reply_tx })
            .unwrap();
        assert!(matches!(
            reply_rx.recv().unwrap(),
            Err(TrackingError::Device(DeviceError::NoFrame(1)))
        ));
        // Back on the preferred camera
        assert_eq!(tracking.parts().manager.active_index(), Some(0));
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, TrackingEvent::DeviceList { current_index: Some(0), .. })));
    }

    #[test]
    fn test_failed_switch_with_no_fallback_is_fatal() {
        let backend = FakeBackend::new().with_camera(0).with_camera(1);
        let (mut tracking, _rx) = tracking_loop(&backend, Box::new(NoLandmarks), fast_tracking_settings());
        backend.set_producing(0, false);
        backend.set_producing(1, false);

        let (reply_tx, reply_rx) = unbounded();
        let result = tracking.handle_request(WorkerRequest::SwitchDevice { index: 1, reply: reply_tx });
        assert!(matches!(result, Err(DeviceError::FailoverExhausted { .. })));
        assert!(reply_rx.recv().unwrap().is_err());
    }

    #[test]
    fn test_run_stops_and_releases_device() {
        let backend = FakeBackend::new().with_camera(0);
        let (tracking, _rx) = tracking_loop(&backend, Box::new(NoLandmarks), fast_tracking_settings());
        let stop = AtomicBool::new(true);
        let (_req_tx, req_rx) = unbounded();

        let (parts, exit) = tracking.run(&stop, &req_rx);
        assert_eq!(exit, LoopExit::Stopped);
        assert!(!parts.manager.is_open());
        assert_eq!(backend.open_streams(), 0);
    }
}
