//! Face-mesh landmarks and the detector seam
//!
//! Landmark ids follow the MediaPipe face mesh with iris refinement
//! (478 points). All coordinates are in frame pixels.

use glam::Vec2;
use image::RgbImage;

/// Number of points produced by a face mesh with iris refinement
pub const FACE_MESH_POINTS: usize = 478;

/// Iris contour ids of the left eye
pub const LEFT_IRIS: [usize; 4] = [474, 475, 476, 477];
/// Iris contour ids of the right eye
pub const RIGHT_IRIS: [usize; 4] = [469, 470, 471, 472];
/// Corner ids paired with [`LEFT_IRIS`]
pub const LEFT_EYE_CORNERS: [usize; 2] = [33, 133];
/// Corner ids paired with [`RIGHT_IRIS`]
pub const RIGHT_EYE_CORNERS: [usize; 2] = [362, 263];

/// One detected face as an ordered list of pixel-space points
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Vec2>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Vec2>) -> Self {
        Self { points }
    }

    /// Build from detector output normalized to `[0, 1]`
    pub fn from_normalized(points: impl IntoIterator<Item = Vec2>, width: u32, height: u32) -> Self {
        let size = Vec2::new(width as f32, height as f32);
        Self {
            points: points.into_iter().map(|p| p * size).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    /// Point for a landmark id
    pub fn get(&self, id: usize) -> Option<Vec2> {
        self.points.get(id).copied()
    }

    /// Points for a list of ids; `None` if any id is out of range
    pub fn select(&self, ids: &[usize]) -> Option<Vec<Vec2>> {
        ids.iter().map(|&id| self.get(id)).collect()
    }

    /// Mean of the points for a list of ids
    pub fn midpoint(&self, ids: &[usize]) -> Option<Vec2> {
        let points = self.select(ids)?;
        if points.is_empty() {
            return None;
        }
        let sum: Vec2 = points.iter().copied().sum();
        Some(sum / points.len() as f32)
    }
}

/// Facial landmark detector.
///
/// Returns `None` when no face is found. Detector failures also collapse to
/// `None`; implementations log them.
pub trait LandmarkSource: Send {
    fn detect(&mut self, frame: &RgbImage) -> Option<LandmarkSet>;
}

impl<F> LandmarkSource for F
where
    F: FnMut(&RgbImage) -> Option<LandmarkSet> + Send,
{
    fn detect(&mut self, frame: &RgbImage) -> Option<LandmarkSet> {
        self(frame)
    }
}

/// Detector that never finds a face, used when no model is available
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLandmarks;

impl LandmarkSource for NoLandmarks {
    fn detect(&mut self, _frame: &RgbImage) -> Option<LandmarkSet> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_normalized_scales_to_pixels() {
        let set = LandmarkSet::from_normalized(vec![Vec2::new(0.5, 0.25)], 640, 480);
        assert_eq!(set.get(0), Some(Vec2::new(320.0, 120.0)));
    }

    #[test]
    fn test_select_out_of_range() {
        let set = LandmarkSet::new(vec![Vec2::ZERO; 10]);
        assert!(set.select(&[1, 2]).is_some());
        assert!(set.select(&[1, 474]).is_none());
        assert!(set.midpoint(&LEFT_EYE_CORNERS).is_none());
    }

    #[test]
    fn test_midpoint_of_corners() {
        let mut points = vec![Vec2::ZERO; FACE_MESH_POINTS];
        points[33] = Vec2::new(100.0, 200.0);
        points[133] = Vec2::new(140.0, 210.0);
        let set = LandmarkSet::new(points);
        assert_eq!(set.midpoint(&LEFT_EYE_CORNERS), Some(Vec2::new(120.0, 205.0)));
    }

    #[test]
    fn test_closure_is_a_landmark_source() {
        let mut source = |_: &RgbImage| Some(LandmarkSet::new(vec![Vec2::ONE]));
        let frame = RgbImage::new(4, 4);
        assert_eq!(LandmarkSource::detect(&mut source, &frame).map(|s| s.len()), Some(1));
        assert!(NoLandmarks.detect(&frame).is_none());
    }
}
