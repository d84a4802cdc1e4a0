//! Gaze estimation pipeline
//!
//! Turns a face-mesh landmark set into a screen coordinate with a
//! confidence score: iris circles, eye-corner displacement, calibration,
//! frame-to-screen mapping and temporal smoothing.

pub mod calibration;
pub mod estimator;
#[cfg(feature = "onnx")]
pub mod face_mesh;
pub mod iris;
pub mod landmarks;
pub mod smoothing;

pub use calibration::{
    fit_offset, CalibrationFit, CalibrationSample, CalibrationState, ScreenMapping, ScreenSize,
    SharedMapping,
};
pub use estimator::{confidence, GazeEstimator, GazeSample};
#[cfg(feature = "onnx")]
pub use face_mesh::OnnxFaceMesh;
pub use iris::{iris_center, IrisObservation};
pub use landmarks::{LandmarkSet, LandmarkSource, NoLandmarks};
pub use smoothing::TemporalSmoother;

/// Milliseconds since the Unix epoch, used to stamp published events
pub fn timestamp_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}
