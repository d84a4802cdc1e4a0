//! Events pushed to clients and the sink they are published through

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::camera::CaptureDevice;
use crate::gaze::{timestamp_ms, CalibrationState, GazeSample};

/// Preview width in cells
pub const PREVIEW_WIDTH: u32 = 80;
/// Preview height in cells
pub const PREVIEW_HEIGHT: u32 = 40;

/// Downsampled luminance image for a text-mode webcam preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewFrame {
    pub width: u32,
    pub height: u32,
    /// `height` rows of `width` luminance values
    #[serde(rename = "luminance_data")]
    pub luminance: Vec<Vec<u8>>,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: f64,
}

impl PreviewFrame {
    pub fn from_frame(frame: &RgbImage) -> Self {
        let gray = imageops::grayscale(frame);
        let small = imageops::resize(&gray, PREVIEW_WIDTH, PREVIEW_HEIGHT, FilterType::Triangle);
        let luminance = small
            .as_raw()
            .chunks_exact(PREVIEW_WIDTH as usize)
            .map(|row| row.to_vec())
            .collect();
        Self {
            width: PREVIEW_WIDTH,
            height: PREVIEW_HEIGHT,
            luminance,
            timestamp_ms: timestamp_ms(),
        }
    }
}

/// Lifecycle state reported in status events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Started,
    Stopped,
    Failed,
}

/// Event types sent to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TrackingEvent {
    /// One published gaze estimate
    GazeSample(GazeSample),
    /// Rate-limited luminance preview
    PreviewFrame(PreviewFrame),
    DeviceList {
        devices: Vec<CaptureDevice>,
        current_index: Option<u32>,
    },
    TrackingStatus {
        status: TrackingStatus,
        message: String,
        device_index: Option<u32>,
    },
    TrackingError {
        error: String,
    },
    DeviceSwitched {
        index: u32,
        message: String,
    },
    DeviceError {
        error: String,
    },
    CalibrationApplied {
        #[serde(flatten)]
        calibration: CalibrationState,
        /// Residual of a point-based fit, if the calibration came from one
        mean_error_px: Option<f32>,
    },
    CalibrationError {
        error: String,
    },
    ScreenSizeApplied {
        width: u32,
        height: u32,
        scale_x: f32,
        scale_y: f32,
    },
    ConnectionStatus {
        status: String,
        message: String,
    },
}

impl TrackingEvent {
    /// High-rate stream events, excluded from control logging
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::GazeSample(_) | Self::PreviewFrame(_))
    }
}

/// Destination for published events.
///
/// Publishing never blocks the tick loop; sinks drop events they cannot
/// deliver.
pub trait PublishSink: Send + Sync {
    fn publish(&self, event: TrackingEvent);
}

impl PublishSink for tokio::sync::broadcast::Sender<TrackingEvent> {
    fn publish(&self, event: TrackingEvent) {
        // No subscribers is fine
        let _ = self.send(event);
    }
}

impl PublishSink for crossbeam_channel::Sender<TrackingEvent> {
    fn publish(&self, event: TrackingEvent) {
        let _ = self.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preview_dimensions() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([200, 200, 200]));
        let preview = PreviewFrame::from_frame(&frame);
        assert_eq!(preview.luminance.len(), 40);
        assert!(preview.luminance.iter().all(|row| row.len() == 80));
        // Uniform gray stays uniform
        assert!(preview.luminance.iter().flatten().all(|&v| (199..=201).contains(&v)));
    }

    #[test]
    fn test_preview_keeps_left_right_layout() {
        let mut frame = RgbImage::new(160, 80);
        for y in 0..80 {
            for x in 80..160 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let preview = PreviewFrame::from_frame(&frame);
        assert!(preview.luminance[20][5] < 10);
        assert!(preview.luminance[20][75] > 245);
    }

    #[test]
    fn test_event_wire_format() {
        let event = TrackingEvent::DeviceSwitched {
            index: 1,
            message: "Switched to camera 1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "device_switched");
        assert_eq!(json["data"]["index"], 1);

        let event = TrackingEvent::CalibrationApplied {
            calibration: CalibrationState::default(),
            mean_error_px: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "calibration_applied");
        assert_eq!(json["data"]["offset_x"], 0.0);
        assert!(json["data"]["mean_error_px"].is_null());
    }

    #[test]
    fn test_crossbeam_sink_collects_events() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.publish(TrackingEvent::TrackingError {
            error: "boom".to_string(),
        });
        assert!(matches!(rx.try_recv(), Ok(TrackingEvent::TrackingError { .. })));
    }

    #[test]
    fn test_broadcast_sink_without_subscribers() {
        let (tx, _) = tokio::sync::broadcast::channel::<TrackingEvent>(4);
        tx.publish(TrackingEvent::ConnectionStatus {
            status: "connected".to_string(),
            message: "ready".to_string(),
        });
    }
}
