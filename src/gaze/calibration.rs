//! Calibration state and the shared screen mapping
//!
//! The calibration record is written from the control context and read by
//! the tick loop every frame. Both sides go through [`SharedMapping`], which
//! holds the lock only for a copy or a field write.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

/// Aspect ratio above which a screen counts as wide
const WIDE_SCREEN_RATIO: f32 = 1.5;
/// Sensitivity used for wide screens
const WIDE_SENSITIVITY: (f32, f32) = (1.4, 1.2);
/// Sensitivity used for near-square screens
const NORMAL_SENSITIVITY: (f32, f32) = (1.2, 1.1);

/// User-adjustable offset and scale applied to the raw gaze vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub offset_x: f32,
    pub offset_y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            scale_x: NORMAL_SENSITIVITY.0,
            scale_y: NORMAL_SENSITIVITY.1,
        }
    }
}

impl CalibrationState {
    /// Validated constructor; rejects non-positive or non-finite scales
    pub fn new(offset_x: f32, offset_y: f32, scale_x: f32, scale_y: f32) -> Result<Self, TrackingError> {
        validate_scale(scale_x, scale_y)?;
        if !offset_x.is_finite() || !offset_y.is_finite() {
            return Err(TrackingError::InvalidCalibration { scale_x, scale_y });
        }
        Ok(Self {
            offset_x,
            offset_y,
            scale_x,
            scale_y,
        })
    }

    pub fn is_valid(&self) -> bool {
        validate_scale(self.scale_x, self.scale_y).is_ok()
            && self.offset_x.is_finite()
            && self.offset_y.is_finite()
    }

    /// Apply offset and scale to a normalized displacement
    pub fn apply(&self, displacement: Vec2) -> Vec2 {
        Vec2::new(
            displacement.x * self.scale_x + self.offset_x,
            displacement.y * self.scale_y + self.offset_y,
        )
    }
}

/// Reject scales that would collapse or flip the gaze mapping
pub fn validate_scale(scale_x: f32, scale_y: f32) -> Result<(), TrackingError> {
    let valid = |s: f32| s.is_finite() && s > 0.0;
    if valid(scale_x) && valid(scale_y) {
        Ok(())
    } else {
        Err(TrackingError::InvalidCalibration { scale_x, scale_y })
    }
}

/// Target screen dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> Result<Self, TrackingError> {
        if width == 0 || height == 0 {
            return Err(TrackingError::InvalidScreenSize { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Sensitivity matching this screen's shape: wide screens need more reach
    pub fn sensitivity(&self) -> (f32, f32) {
        if self.aspect_ratio() > WIDE_SCREEN_RATIO {
            WIDE_SENSITIVITY
        } else {
            NORMAL_SENSITIVITY
        }
    }

    pub fn as_vec2(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }
}

/// Calibration and target screen, read together every tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScreenMapping {
    pub calibration: CalibrationState,
    pub screen: ScreenSize,
}

/// Lock-protected [`ScreenMapping`] shared by the control plane and the tick loop
#[derive(Debug, Clone, Default)]
pub struct SharedMapping {
    inner: Arc<RwLock<ScreenMapping>>,
}

impl SharedMapping {
    pub fn new(mapping: ScreenMapping) -> Self {
        Self {
            inner: Arc::new(RwLock::new(mapping)),
        }
    }

    /// Copy of the current mapping
    pub fn snapshot(&self) -> ScreenMapping {
        *self.inner.read()
    }

    pub fn calibration(&self) -> CalibrationState {
        self.inner.read().calibration
    }

    pub fn screen(&self) -> ScreenSize {
        self.inner.read().screen
    }

    /// Replace the whole calibration record. Callers validate first.
    pub fn set_calibration(&self, calibration: CalibrationState) {
        self.inner.write().calibration = calibration;
    }

    pub fn set_calibration_offset(&self, offset_x: f32, offset_y: f32) {
        let mut guard = self.inner.write();
        guard.calibration.offset_x = offset_x;
        guard.calibration.offset_y = offset_y;
    }

    /// Callers enforce `scale > 0`.
    pub fn set_sensitivity(&self, scale_x: f32, scale_y: f32) {
        let mut guard = self.inner.write();
        guard.calibration.scale_x = scale_x;
        guard.calibration.scale_y = scale_y;
    }

    /// Set the target screen and the sensitivity for its aspect ratio
    pub fn set_screen_size(&self, screen: ScreenSize) {
        let (scale_x, scale_y) = screen.sensitivity();
        let mut guard = self.inner.write();
        guard.screen = screen;
        guard.calibration.scale_x = scale_x;
        guard.calibration.scale_y = scale_y;
    }
}

/// One click of a point-based calibration run, in screen pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Name of the calibration target (e.g. "center", "top-left")
    pub point: String,
    pub target_x: f32,
    pub target_y: f32,
    pub observed_x: f32,
    pub observed_y: f32,
}

/// Result of fitting an offset to calibration samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFit {
    /// Offset as a fraction of screen width
    pub offset_x: f32,
    /// Offset as a fraction of screen height
    pub offset_y: f32,
    /// Mean residual distance after the offset, in pixels
    pub mean_error_px: f32,
}

impl CalibrationFit {
    /// Calibration record for this fit with unit scale
    pub fn to_state(&self) -> CalibrationState {
        CalibrationState {
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

/// Fit a constant offset from `(target, observed)` pairs.
///
/// Samples are averaged per target point first so targets with more clicks
/// do not dominate. Returns `None` when there are no samples.
pub fn fit_offset(samples: &[CalibrationSample], screen: ScreenSize) -> Option<CalibrationFit> {
    let mut per_point: BTreeMap<&str, (Vec2, Vec2, u32)> = BTreeMap::new();
    for sample in samples {
        let entry = per_point
            .entry(sample.point.as_str())
            .or_insert((Vec2::ZERO, Vec2::ZERO, 0));
        entry.0 += Vec2::new(sample.target_x, sample.target_y);
        entry.1 += Vec2::new(sample.observed_x, sample.observed_y);
        entry.2 += 1;
    }
    if per_point.is_empty() {
        return None;
    }

    let averaged: Vec<(Vec2, Vec2)> = per_point
        .values()
        .map(|(target, observed, n)| (*target / *n as f32, *observed / *n as f32))
        .collect();
    let count = averaged.len() as f32;

    let offset = averaged
        .iter()
        .map(|(target, observed)| *target - *observed)
        .sum::<Vec2>()
        / count;
    let mean_error = averaged
        .iter()
        .map(|(target, observed)| target.distance(*observed + offset))
        .sum::<f32>()
        / count;

    let normalized = offset / screen.as_vec2();
    Some(CalibrationFit {
        offset_x: normalized.x,
        offset_y: normalized.y,
        mean_error_px: mean_error,
    })
}
