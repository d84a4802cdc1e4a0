//! Landmark-to-screen gaze estimation
//!
//! Each eye's iris center is measured against the midpoint of its two eye
//! corners. The averaged displacement is calibrated, projected around the
//! frame center, smoothed, and finally scaled to the target screen.

use std::panic::{self, AssertUnwindSafe};

use glam::Vec2;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::calibration::{CalibrationState, ScreenSize, SharedMapping};
use super::iris::{iris_center, IrisObservation};
use super::landmarks::{
    LandmarkSet, LandmarkSource, LEFT_EYE_CORNERS, LEFT_IRIS, RIGHT_EYE_CORNERS, RIGHT_IRIS,
};
use super::smoothing::TemporalSmoother;
use super::timestamp_ms;
use crate::settings::GazeSettings;

/// Inter-iris distance (px) at which the base confidence saturates
const FULL_CONFIDENCE_DISTANCE: f32 = 80.0;
/// Irises closer than this (px) are likely a bad detection
const CLOSE_IRIS_DISTANCE: f32 = 40.0;
const CLOSE_IRIS_PENALTY: f32 = 0.5;
/// Iris circles smaller than this (px) are likely a bad detection
const SMALL_IRIS_RADIUS: f32 = 2.0;
const SMALL_IRIS_PENALTY: f32 = 0.6;
/// Floor applied once a face has been found
const MIN_CONFIDENCE: f32 = 0.2;

/// One gaze estimate, in target-screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    #[serde(rename = "x")]
    pub screen_x: f32,
    #[serde(rename = "y")]
    pub screen_y: f32,
    pub confidence: f32,
    pub face_found: bool,
    pub iris_found: bool,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: f64,
}

/// Heuristic quality score in `[0.2, 1.0]` from iris geometry.
///
/// Not a probability. Monotone in iris separation and circle size.
pub fn confidence(left: &IrisObservation, right: &IrisObservation) -> f32 {
    let distance = left.center.distance(right.center);
    let mut base = (distance / FULL_CONFIDENCE_DISTANCE).min(1.0);
    if distance < CLOSE_IRIS_DISTANCE {
        base *= CLOSE_IRIS_PENALTY;
    }
    if left.radius < SMALL_IRIS_RADIUS || right.radius < SMALL_IRIS_RADIUS {
        base *= SMALL_IRIS_PENALTY;
    }
    base.max(MIN_CONFIDENCE)
}

/// Gaze estimator for one tracking session
pub struct GazeEstimator {
    settings: GazeSettings,
    mapping: SharedMapping,
    smoother: TemporalSmoother,
}

impl GazeEstimator {
    pub fn new(settings: GazeSettings, mapping: SharedMapping) -> Self {
        let smoother = TemporalSmoother::new(settings.smoothing_factor);
        Self {
            settings,
            mapping,
            smoother,
        }
    }

    /// Shared calibration/screen record this estimator reads every tick
    pub fn mapping(&self) -> &SharedMapping {
        &self.mapping
    }

    pub fn settings(&self) -> &GazeSettings {
        &self.settings
    }

    /// Also sets the calibration scale for the screen's aspect ratio.
    pub fn set_screen_size(&self, screen: ScreenSize) {
        self.mapping.set_screen_size(screen);
    }

    pub fn set_calibration_offset(&self, offset_x: f32, offset_y: f32) {
        self.mapping.set_calibration_offset(offset_x, offset_y);
    }

    /// Callers enforce `scale > 0`.
    pub fn set_sensitivity(&self, scale_x: f32, scale_y: f32) {
        self.mapping.set_sensitivity(scale_x, scale_y);
    }

    /// Forget the smoothing history; called when a session restarts
    pub fn reset(&mut self) {
        self.smoother.reset();
    }

    /// Unsmoothed gaze point in frame pixels, clamped to the soft edge guard
    pub fn raw_gaze_point(
        &self,
        left: &IrisObservation,
        right: &IrisObservation,
        landmarks: &LandmarkSet,
        calibration: &CalibrationState,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Vec2> {
        let left_mid = landmarks.midpoint(&LEFT_EYE_CORNERS)?;
        let right_mid = landmarks.midpoint(&RIGHT_EYE_CORNERS)?;

        let scale = Vec2::new(
            self.settings.horizontal_denominator,
            self.settings.vertical_denominator,
        );
        let left_rel = (left.center - left_mid) / scale;
        let right_rel = (right.center - right_mid) / scale;
        let average = (left_rel + right_rel) * 0.5;

        let calibrated = calibration.apply(average);

        let frame = Vec2::new(frame_width as f32, frame_height as f32);
        let center = frame * 0.5;
        let reach = Vec2::new(
            self.settings.horizontal_proportion,
            self.settings.vertical_proportion,
        );
        let raw = center + calibrated * center * reach;

        let margin = self.settings.edge_margin;
        Some(raw.clamp(frame * margin, frame * (1.0 - margin)))
    }

    /// Smoothed gaze point in frame pixels; `None` if either iris is missing
    pub fn estimate_gaze(
        &mut self,
        left: Option<&IrisObservation>,
        right: Option<&IrisObservation>,
        landmarks: &LandmarkSet,
        calibration: &CalibrationState,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Vec2> {
        let (left, right) = (left?, right?);
        let raw = self.raw_gaze_point(left, right, landmarks, calibration, frame_width, frame_height)?;
        Some(self.smoother.apply(raw))
    }

    /// Run the detector on a frame and estimate gaze from its landmarks.
    ///
    /// A panicking detector counts as "no face" for this frame.
    pub fn detect<L>(&mut self, frame: &RgbImage, source: &mut L) -> Option<GazeSample>
    where
        L: LandmarkSource + ?Sized,
    {
        let landmarks = match panic::catch_unwind(AssertUnwindSafe(|| source.detect(frame))) {
            Ok(landmarks) => landmarks?,
            Err(_) => {
                tracing::warn!("Landmark detector panicked, skipping frame");
                return None;
            }
        };
        self.detect_landmarks(&landmarks, frame.width(), frame.height())
    }

    /// Estimate gaze from an already detected landmark set
    pub fn detect_landmarks(
        &mut self,
        landmarks: &LandmarkSet,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<GazeSample> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let left = landmarks.select(&LEFT_IRIS).and_then(|p| iris_center(&p));
        let right = landmarks.select(&RIGHT_IRIS).and_then(|p| iris_center(&p));

        let mapping = self.mapping.snapshot();
        let point = self.estimate_gaze(
            left.as_ref(),
            right.as_ref(),
            landmarks,
            &mapping.calibration,
            frame_width,
            frame_height,
        )?;
        let (left, right) = (left?, right?);

        let frame = Vec2::new(frame_width as f32, frame_height as f32);
        let normalized = (point / frame).clamp(Vec2::ZERO, Vec2::ONE);
        let screen = normalized * mapping.screen.as_vec2();

        let confidence = confidence(&left, &right);
        tracing::trace!(
            x = screen.x,
            y = screen.y,
            confidence,
            left_radius = left.radius,
            right_radius = right.radius,
            "Gaze estimated"
        );

        Some(GazeSample {
            screen_x: screen.x,
            screen_y: screen.y,
            confidence,
            face_found: true,
            iris_found: true,
            timestamp_ms: timestamp_ms(),
        })
    }
}
