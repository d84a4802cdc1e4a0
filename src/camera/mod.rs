//! Capture device module
//!
//! Device enumeration, opening and frame reads go through the
//! [`CaptureBackend`] trait so the tracking loop can run against the native
//! webcam backend or a scripted fake in tests.

pub mod manager;
pub mod naming;
#[cfg(feature = "native-camera")]
pub mod native;

use std::collections::HashMap;
use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::settings::CameraSettings;

pub use manager::CaptureDeviceManager;
pub use naming::{clean_device_name, display_name};
#[cfg(feature = "native-camera")]
pub use native::NokhwaBackend;

/// Fallback capture rate when the backend does not report one
pub const DEFAULT_FPS: u32 = 30;

/// Information about a working capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDevice {
    /// Backend device index
    pub index: u32,
    /// Human-readable name
    pub display_name: String,
    /// Frame size of the probe read
    pub resolution: (u32, u32),
    /// Capture rate reported by the backend
    pub fps: u32,
}

/// Requested capture parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames buffered between the device and the reader
    pub buffer_frames: u32,
    /// Upper bound for a single blocking read
    pub read_timeout: Duration,
}

impl From<&CameraSettings> for CaptureMode {
    fn from(settings: &CameraSettings) -> Self {
        Self {
            width: settings.frame_width,
            height: settings.frame_height,
            fps: settings.fps,
            buffer_frames: settings.buffer_frames.max(1),
            read_timeout: settings.read_timeout(),
        }
    }
}

/// An open capture handle. Dropping it releases the device.
pub trait CaptureStream: Send {
    /// Read the next frame; `None` on failure or timeout
    fn read(&mut self) -> Option<RgbImage>;

    /// Capture rate the device reports, if any
    fn fps(&self) -> Option<u32> {
        None
    }
}

/// Platform capture backend
pub trait CaptureBackend: Send {
    type Stream: CaptureStream + 'static;

    /// Open a device with the requested mode
    fn open(&mut self, index: u32, mode: &CaptureMode) -> Result<Self::Stream, DeviceError>;

    /// Friendly names by device index, where the platform provides them
    fn device_names(&mut self) -> HashMap<u32, String> {
        HashMap::new()
    }
}
