//! Test fixtures: a scripted capture backend and synthetic face meshes

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec2;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;

use crate::camera::{CaptureBackend, CaptureMode, CaptureStream};
use crate::error::DeviceError;
use crate::gaze::landmarks::{
    LandmarkSet, FACE_MESH_POINTS, LEFT_EYE_CORNERS, LEFT_IRIS, RIGHT_EYE_CORNERS, RIGHT_IRIS,
};
use crate::settings::{CameraSettings, TrackingSettings};

const FRAME_WIDTH: u32 = 8;
const FRAME_HEIGHT: u32 = 6;

/// Camera settings without settle delays
pub fn fast_camera_settings() -> CameraSettings {
    CameraSettings {
        probe_settle_ms: 0,
        open_settle_ms: 0,
        release_settle_ms: 0,
        read_timeout_ms: 10,
        ..CameraSettings::default()
    }
}

/// Tracking settings with millisecond-scale timing
pub fn fast_tracking_settings() -> TrackingSettings {
    TrackingSettings {
        target_fps: 500,
        preview_fps: 250,
        read_retry_ms: 1,
        device_lost_after: 3,
        ..TrackingSettings::default()
    }
}

#[derive(Debug, Clone, Copy)]
struct FakeCamera {
    openable: bool,
    producing: bool,
}

#[derive(Default)]
struct FakeState {
    cameras: HashMap<u32, FakeCamera>,
    names: HashMap<u32, String>,
    opens: Vec<u32>,
    open_streams: usize,
}

/// Scripted capture backend. Clones share state so a test can keep a handle
/// after moving the backend into a manager.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A camera that opens and delivers frames
    pub fn with_camera(self, index: u32) -> Self {
        self.set_camera(index, true, true);
        self
    }

    /// A camera that opens but never delivers a frame
    pub fn with_broken_camera(self, index: u32) -> Self {
        self.set_camera(index, true, false);
        self
    }

    pub fn with_name(self, index: u32, name: &str) -> Self {
        self.state.lock().names.insert(index, name.to_string());
        self
    }

    fn set_camera(&self, index: u32, openable: bool, producing: bool) {
        self.state
            .lock()
            .cameras
            .insert(index, FakeCamera { openable, producing });
    }

    pub fn set_producing(&self, index: u32, producing: bool) {
        if let Some(camera) = self.state.lock().cameras.get_mut(&index) {
            camera.producing = producing;
        }
    }

    pub fn set_openable(&self, index: u32, openable: bool) {
        if let Some(camera) = self.state.lock().cameras.get_mut(&index) {
            camera.openable = openable;
        }
    }

    /// Every open attempt, in order
    pub fn opens(&self) -> Vec<u32> {
        self.state.lock().opens.clone()
    }

    pub fn clear_opens(&self) {
        self.state.lock().opens.clear();
    }

    /// Handles currently held open
    pub fn open_streams(&self) -> usize {
        self.state.lock().open_streams
    }
}

impl CaptureBackend for FakeBackend {
    type Stream = FakeStream;

    fn open(&mut self, index: u32, _mode: &CaptureMode) -> Result<FakeStream, DeviceError> {
        let mut state = self.state.lock();
        state.opens.push(index);
        match state.cameras.get(&index) {
            Some(camera) if camera.openable => {
                state.open_streams += 1;
                Ok(FakeStream {
                    index,
                    state: self.state.clone(),
                })
            }
            _ => Err(DeviceError::OpenFailed {
                index,
                reason: "no such device".to_string(),
            }),
        }
    }

    fn device_names(&mut self) -> HashMap<u32, String> {
        self.state.lock().names.clone()
    }
}

pub struct FakeStream {
    index: u32,
    state: Arc<Mutex<FakeState>>,
}

impl CaptureStream for FakeStream {
    fn read(&mut self) -> Option<RgbImage> {
        let producing = self
            .state
            .lock()
            .cameras
            .get(&self.index)
            .is_some_and(|c| c.producing);
        if !producing {
            return None;
        }
        let mut frame = RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT);
        frame.put_pixel(0, 0, Rgb([255, 0, 0]));
        Some(frame)
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.open_streams = state.open_streams.saturating_sub(1);
    }
}

/// Geometry of a synthetic face mesh
#[derive(Debug, Clone, Copy)]
pub struct FaceLayout {
    pub frame_width: u32,
    pub frame_height: u32,
    /// Distance between the two eye centers
    pub eye_separation: f32,
    /// Corner-to-corner width of each eye
    pub eye_width: f32,
    pub iris_radius: f32,
    /// Iris displacement from the eye center, applied to both eyes
    pub iris_offset: Vec2,
}

impl FaceLayout {
    /// Level face in the middle of the frame, looking straight ahead
    pub fn centered(frame_width: u32, frame_height: u32) -> Self {
        Self {
            frame_width,
            frame_height,
            eye_separation: 120.0,
            eye_width: 40.0,
            iris_radius: 6.0,
            iris_offset: Vec2::ZERO,
        }
    }
}

/// Landmark set with only the eye corners and iris contours populated
pub fn synthetic_face(layout: &FaceLayout) -> LandmarkSet {
    let mut points = vec![Vec2::ZERO; FACE_MESH_POINTS];
    let center = Vec2::new(layout.frame_width as f32, layout.frame_height as f32) * 0.5;
    let half_sep = Vec2::new(layout.eye_separation * 0.5, 0.0);
    let half_eye = Vec2::new(layout.eye_width * 0.5, 0.0);
    let r = layout.iris_radius;
    let contour = [Vec2::new(r, 0.0), Vec2::new(0.0, -r), Vec2::new(-r, 0.0), Vec2::new(0.0, r)];

    let eyes = [
        (center + half_sep, LEFT_EYE_CORNERS, LEFT_IRIS),
        (center - half_sep, RIGHT_EYE_CORNERS, RIGHT_IRIS),
    ];
    for (eye_center, corners, iris) in eyes {
        points[corners[0]] = eye_center - half_eye;
        points[corners[1]] = eye_center + half_eye;
        let iris_center = eye_center + layout.iris_offset;
        for (id, offset) in iris.iter().zip(contour) {
            points[*id] = iris_center + offset;
        }
    }
    LandmarkSet::new(points)
}
