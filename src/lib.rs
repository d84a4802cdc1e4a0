//! Gaze Tracker Library
//!
//! Webcam gaze tracking: capture devices with failover, iris-based gaze
//! estimation with calibration and smoothing, a tracking session driving the
//! per-frame loop, and a WebSocket server streaming samples to clients.

pub mod api;
pub mod camera;
pub mod error;
pub mod gaze;
pub mod settings;
pub mod telemetry;
pub mod tracking;

#[cfg(test)]
mod test_support;

pub use camera::{CaptureBackend, CaptureDevice, CaptureDeviceManager, CaptureStream};
pub use error::{DeviceError, ModelError, SettingsError, TrackingError};
pub use gaze::{CalibrationState, GazeEstimator, GazeSample, LandmarkSet, LandmarkSource, ScreenSize};
pub use settings::TrackerSettings;
pub use tracking::{Command, Reply, TrackingEvent, TrackingSession};
