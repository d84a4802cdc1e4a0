//! Error types for capture, tracking and settings
//!
//! Per-tick conditions (no frame, no face, low confidence) are not errors;
//! see [`crate::tracking::TickOutcome`].

use thiserror::Error;

/// Errors raised while acquiring or switching a capture device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("No capture devices available")]
    NoDevices,
    #[error("Camera {0} is not in the enumerated device list")]
    NotEnumerated(u32),
    #[error("Camera {index} could not be opened: {reason}")]
    OpenFailed { index: u32, reason: String },
    #[error("Camera {0} opened but produced no frames")]
    NoFrame(u32),
    #[error("No working camera found (tried {tried:?})")]
    FailoverExhausted { tried: Vec<u32> },
    #[error("Capture backend error: {0}")]
    Backend(String),
}

/// Errors returned to the control plane by [`crate::tracking::TrackingSession`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Invalid calibration: scale must be positive and finite (got {scale_x}, {scale_y})")]
    InvalidCalibration { scale_x: f32, scale_y: f32 },
    #[error("Invalid screen size {width}x{height}")]
    InvalidScreenSize { width: u32, height: u32 },
    #[error("Calibration needs at least one sample")]
    EmptyCalibration,
    #[error("Tracking loop is busy with another device request")]
    WorkerBusy,
    #[error("Tracking loop is not responding")]
    WorkerGone,
    #[error("Switch to camera {index} is still pending in the tracking loop")]
    SwitchTimeout { index: u32 },
}

/// Errors loading or saving settings files.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("No configuration directory available on this platform")]
    NoConfigDir,
    #[error("Invalid setting {field} = {value}: {reason}")]
    Invalid {
        field: &'static str,
        value: f32,
        reason: &'static str,
    },
}

/// Errors loading or running a landmark model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(std::path::PathBuf),
    #[error("Model runtime error: {0}")]
    Runtime(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
}
