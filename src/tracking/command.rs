//! Control commands and their replies

use serde::{Deserialize, Serialize};

use super::events::{TrackingEvent, TrackingStatus};
use crate::camera::CaptureDevice;
use crate::error::TrackingError;
use crate::gaze::{CalibrationSample, CalibrationState, ScreenSize};

/// Scale applied by a calibrate command that omits it
pub const DEFAULT_CALIBRATE_SCALE_X: f32 = 1.5;
pub const DEFAULT_CALIBRATE_SCALE_Y: f32 = 1.3;

fn default_scale_x() -> f32 {
    DEFAULT_CALIBRATE_SCALE_X
}

fn default_scale_y() -> f32 {
    DEFAULT_CALIBRATE_SCALE_Y
}

/// Options for starting a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    pub preferred_index: Option<u32>,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
}

/// Commands accepted by [`super::TrackingSession::dispatch`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Command {
    StartTracking(Option<StartOptions>),
    StopTracking,
    ListDevices,
    SwitchDevice {
        index: u32,
    },
    Calibrate {
        #[serde(default)]
        offset_x: f32,
        #[serde(default)]
        offset_y: f32,
        #[serde(default = "default_scale_x")]
        scale_x: f32,
        #[serde(default = "default_scale_y")]
        scale_y: f32,
    },
    FitCalibration {
        samples: Vec<CalibrationSample>,
    },
    SetScreenSize {
        width: u32,
        height: u32,
    },
}

impl Command {
    /// Parse a JSON command. A missing `data` field is read as `null`, so
    /// `{"type": "stop_tracking"}` is accepted.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;
        if let Some(object) = value.as_object_mut() {
            object.entry("data").or_insert(serde_json::Value::Null);
        }
        serde_json::from_value(value)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StartTracking(_) => "start_tracking",
            Self::StopTracking => "stop_tracking",
            Self::ListDevices => "list_devices",
            Self::SwitchDevice { .. } => "switch_device",
            Self::Calibrate { .. } => "calibrate",
            Self::FitCalibration { .. } => "fit_calibration",
            Self::SetScreenSize { .. } => "set_screen_size",
        }
    }

    /// Event reporting a failure of this command
    pub fn error_event(&self, error: &TrackingError) -> TrackingEvent {
        let error = error.to_string();
        match self {
            Self::SwitchDevice { .. } => TrackingEvent::DeviceError { error },
            Self::Calibrate { .. } | Self::FitCalibration { .. } => {
                TrackingEvent::CalibrationError { error }
            }
            _ => TrackingEvent::TrackingError { error },
        }
    }
}

/// Successful outcome of a command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Started {
        device: CaptureDevice,
        devices: Vec<CaptureDevice>,
    },
    /// Start requested while already running
    AlreadyRunning {
        device_index: Option<u32>,
    },
    Stopped,
    Devices {
        devices: Vec<CaptureDevice>,
        current_index: Option<u32>,
    },
    Switched {
        index: u32,
        devices: Vec<CaptureDevice>,
    },
    /// Switch while idle: recorded for the next start
    PreferredDeviceSet {
        index: u32,
    },
    CalibrationApplied {
        calibration: CalibrationState,
        mean_error_px: Option<f32>,
    },
    ScreenSizeApplied {
        screen: ScreenSize,
        calibration: CalibrationState,
    },
}

impl Reply {
    /// Events announcing this reply to clients
    pub fn into_events(self) -> Vec<TrackingEvent> {
        match self {
            Self::Started { device, devices } => vec![
                TrackingEvent::TrackingStatus {
                    status: TrackingStatus::Started,
                    message: format!("Tracking started with camera {}", device.index),
                    device_index: Some(device.index),
                },
                TrackingEvent::DeviceList {
                    devices,
                    current_index: Some(device.index),
                },
            ],
            Self::AlreadyRunning { device_index } => vec![TrackingEvent::TrackingStatus {
                status: TrackingStatus::Started,
                message: "Tracking already running".to_string(),
                device_index,
            }],
            Self::Stopped => vec![TrackingEvent::TrackingStatus {
                status: TrackingStatus::Stopped,
                message: "Tracking stopped".to_string(),
                device_index: None,
            }],
            Self::Devices {
                devices,
                current_index,
            } => vec![TrackingEvent::DeviceList {
                devices,
                current_index,
            }],
            Self::Switched { index, devices } => vec![
                TrackingEvent::DeviceSwitched {
                    index,
                    message: format!("Switched to camera {}", index),
                },
                TrackingEvent::DeviceList {
                    devices,
                    current_index: Some(index),
                },
            ],
            Self::PreferredDeviceSet { index } => vec![TrackingEvent::DeviceSwitched {
                index,
                message: format!("Camera {} will be used when tracking starts", index),
            }],
            Self::CalibrationApplied {
                calibration,
                mean_error_px,
            } => vec![TrackingEvent::CalibrationApplied {
                calibration,
                mean_error_px,
            }],
            Self::ScreenSizeApplied { screen, calibration } => {
                vec![TrackingEvent::ScreenSizeApplied {
                    width: screen.width,
                    height: screen.height,
                    scale_x: calibration.scale_x,
                    scale_y: calibration.scale_y,
                }]
            }
        }
    }
}
