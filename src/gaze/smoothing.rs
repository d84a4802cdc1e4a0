//! Exponential smoothing of the gaze point across ticks

use glam::Vec2;

/// `smoothed = alpha * previous + (1 - alpha) * raw`, per axis.
///
/// The first point after construction or [`reset`](Self::reset) passes
/// through unchanged.
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    alpha: f32,
    previous: Option<Vec2>,
}

impl TemporalSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            previous: None,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn previous(&self) -> Option<Vec2> {
        self.previous
    }

    pub fn apply(&mut self, raw: Vec2) -> Vec2 {
        let smoothed = match self.previous {
            Some(prev) => prev * self.alpha + raw * (1.0 - self.alpha),
            None => raw,
        };
        self.previous = Some(smoothed);
        smoothed
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
