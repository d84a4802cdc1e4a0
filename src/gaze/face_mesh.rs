//! Face-mesh landmark detection using ONNX Runtime
//!
//! Runs a MediaPipe-compatible face landmark model with iris refinement
//! (478 points) on a centered square crop of the frame.

use std::path::Path;

use glam::Vec2;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

use super::landmarks::{LandmarkSet, LandmarkSource, FACE_MESH_POINTS};
use crate::error::ModelError;

/// Model input edge length
const INPUT_SIZE: u32 = 192;
/// Face presence score below which the landmarks are discarded
const FACE_SCORE_THRESHOLD: f32 = 0.5;

/// Landmark source backed by an ONNX face-mesh model
pub struct OnnxFaceMesh {
    session: ort::session::Session,
}

impl OnnxFaceMesh {
    /// Load the model from disk
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::NotFound(path.to_path_buf()));
        }

        let session = ort::session::Session::builder()
            .map_err(|e| ModelError::Runtime(format!("Failed to create session builder: {}", e)))?
            .with_intra_threads(2)
            .map_err(|e| ModelError::Runtime(format!("Failed to set threads: {}", e)))?
            .commit_from_file(path)
            .map_err(|e| ModelError::Runtime(format!("Failed to load face mesh model: {}", e)))?;

        tracing::info!("Loaded face mesh model from {:?}", path);
        Ok(Self { session })
    }

    fn run(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>, ModelError> {
        let (crop_origin, crop_size) = square_crop(frame.width(), frame.height());
        let input = preprocess_nhwc(frame, crop_origin, crop_size);

        let input_array = Array4::from_shape_vec((1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3), input)
            .map_err(|e| ModelError::Runtime(format!("Failed to create input array: {}", e)))?;
        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| ModelError::Runtime(format!("Failed to create tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ModelError::Runtime(format!("Inference failed: {}", e)))?;

        let mut coords: Option<Vec<f32>> = None;
        let mut face_score: Option<f32> = None;
        for (_name, value) in outputs.iter() {
            let (_shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::Output(format!("Failed to extract output: {}", e)))?;
            if data.len() >= FACE_MESH_POINTS * 3 && coords.is_none() {
                coords = Some(data.to_vec());
            } else if data.len() == 1 {
                face_score = Some(sigmoid(data[0]));
            }
        }

        if let Some(score) = face_score {
            if score < FACE_SCORE_THRESHOLD {
                return Ok(None);
            }
        }

        let coords = coords.ok_or_else(|| {
            ModelError::Output(format!("no output with {} landmarks", FACE_MESH_POINTS))
        })?;
        let scale = crop_size as f32 / INPUT_SIZE as f32;
        let points = coords
            .chunks_exact(3)
            .take(FACE_MESH_POINTS)
            .map(|p| crop_origin + Vec2::new(p[0], p[1]) * scale)
            .collect();
        Ok(Some(LandmarkSet::new(points)))
    }
}

impl LandmarkSource for OnnxFaceMesh {
    fn detect(&mut self, frame: &RgbImage) -> Option<LandmarkSet> {
        match self.run(frame) {
            Ok(landmarks) => landmarks,
            Err(e) => {
                tracing::warn!("Face mesh inference error: {}", e);
                None
            }
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Largest centered square inside the frame: (origin, edge length)
fn square_crop(width: u32, height: u32) -> (Vec2, u32) {
    let size = width.min(height);
    let origin = Vec2::new(((width - size) / 2) as f32, ((height - size) / 2) as f32);
    (origin, size)
}

/// Crop, resize and convert to NHWC float `[0, 1]`
fn preprocess_nhwc(frame: &RgbImage, origin: Vec2, size: u32) -> Vec<f32> {
    let crop = imageops::crop_imm(frame, origin.x as u32, origin.y as u32, size, size).to_image();
    let resized = imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    resized.as_raw().iter().map(|&v| v as f32 / 255.0).collect()
}
