//! Capture device lifecycle: enumeration, open, read, switch, release

use std::thread;
use std::time::Duration;

use image::imageops;
use image::RgbImage;

use super::naming::display_name;
use super::{CaptureBackend, CaptureDevice, CaptureMode, CaptureStream, DEFAULT_FPS};
use crate::error::DeviceError;
use crate::settings::CameraSettings;

struct ActiveDevice<S> {
    index: u32,
    stream: S,
}

/// Owns at most one open capture device
pub struct CaptureDeviceManager<B: CaptureBackend> {
    backend: B,
    settings: CameraSettings,
    devices: Vec<CaptureDevice>,
    active: Option<ActiveDevice<B::Stream>>,
}

impl<B: CaptureBackend> CaptureDeviceManager<B> {
    pub fn new(backend: B, settings: CameraSettings) -> Self {
        Self {
            backend,
            settings,
            devices: Vec::new(),
            active: None,
        }
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Probe device indices and replace the device list with the ones that
    /// deliver a frame. An empty list is not an error.
    pub fn enumerate(&mut self) -> Vec<CaptureDevice> {
        tracing::info!("Searching for capture devices (indices 0..{})", self.settings.probe_range);

        let names = self.backend.device_names();
        let mode = CaptureMode::from(&self.settings);
        let mut devices = Vec::new();

        for index in 0..self.settings.probe_range {
            if self.active.as_ref().is_some_and(|a| a.index == index) {
                // Already open here, probing would contend for the handle
                if let Some(known) = self.devices.iter().find(|d| d.index == index) {
                    devices.push(known.clone());
                }
                continue;
            }

            let mut probe = match self.backend.open(index, &mode) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::trace!("Camera {} not available: {}", index, e);
                    continue;
                }
            };
            settle(self.settings.probe_settle());

            match probe.read() {
                Some(frame) => {
                    let device = CaptureDevice {
                        index,
                        display_name: display_name(index, &names),
                        resolution: frame.dimensions(),
                        fps: probe.fps().unwrap_or(DEFAULT_FPS),
                    };
                    tracing::info!(
                        "Camera found: {} - {}x{}",
                        device.display_name,
                        device.resolution.0,
                        device.resolution.1
                    );
                    devices.push(device);
                }
                None => tracing::debug!("Camera {} opened but returned no frame", index),
            }
        }

        if devices.is_empty() {
            tracing::warn!("No working capture devices found");
        } else {
            tracing::info!("{} camera(s) available", devices.len());
        }

        self.devices = devices.clone();
        devices
    }

    /// Open a device, releasing any open one first.
    ///
    /// On failure no device is left open.
    pub fn open(&mut self, index: u32) -> Result<(), DeviceError> {
        if self.close() {
            settle(self.settings.release_settle());
        }

        tracing::info!("Starting camera {}", index);
        let mode = CaptureMode::from(&self.settings);
        let mut stream = self.backend.open(index, &mode)?;
        settle(self.settings.open_settle());

        let Some(frame) = stream.read() else {
            tracing::warn!("Camera {} opened but produced no frames", index);
            return Err(DeviceError::NoFrame(index));
        };

        let (width, height) = frame.dimensions();
        tracing::info!("Camera '{}' started ({}x{})", self.name_of(index), width, height);
        self.active = Some(ActiveDevice { index, stream });
        Ok(())
    }

    /// Next frame, mirrored horizontally; `None` when closed or on a failed read
    pub fn read_frame(&mut self) -> Option<RgbImage> {
        let active = self.active.as_mut()?;
        let mut frame = active.stream.read()?;
        imageops::flip_horizontal_in_place(&mut frame);
        Some(frame)
    }

    /// Switch to an enumerated device. Switching to the active device is a no-op.
    pub fn switch_to(&mut self, index: u32) -> Result<(), DeviceError> {
        if self.active_index() == Some(index) {
            tracing::debug!("Camera {} is already active", index);
            return Ok(());
        }
        if !self.is_enumerated(index) {
            return Err(DeviceError::NotEnumerated(index));
        }
        self.open(index)
    }

    /// Release the open device. Returns whether one was open.
    pub fn close(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                tracing::debug!("Released camera {}", active.index);
                true
            }
            None => false,
        }
    }

    /// Devices from the last enumeration
    pub fn devices(&self) -> &[CaptureDevice] {
        &self.devices
    }

    pub fn is_enumerated(&self, index: u32) -> bool {
        self.devices.iter().any(|d| d.index == index)
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_index(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.index)
    }

    pub fn active_device(&self) -> Option<&CaptureDevice> {
        let index = self.active_index()?;
        self.devices.iter().find(|d| d.index == index)
    }

    fn name_of(&self, index: u32) -> String {
        self.devices
            .iter()
            .find(|d| d.index == index)
            .map(|d| d.display_name.clone())
            .unwrap_or_else(|| format!("Camera {}", index))
    }
}

fn settle(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_camera_settings, FakeBackend};

    fn manager(backend: &FakeBackend) -> CaptureDeviceManager<FakeBackend> {
        CaptureDeviceManager::new(backend.clone(), fast_camera_settings())
    }

    #[test]
    fn test_enumerate_keeps_working_devices() {
        let backend = FakeBackend::new()
            .with_camera(0)
            .with_broken_camera(1)
            .with_camera(3)
            .with_name(3, "USB Video Device");
        let mut manager = manager(&backend);
        let devices = manager.enumerate();

        let indices: Vec<u32> = devices.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 3]);
        assert_eq!(devices[0].display_name, "Default camera (Camera 0)");
        assert_eq!(devices[1].display_name, "USB Webcam (Camera 3)");
        assert_eq!(devices[0].fps, DEFAULT_FPS);
        assert_eq!(devices[0].resolution, (8, 6));
        // Probe handles are released
        assert!(!manager.is_open());
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn test_enumerate_empty_is_not_an_error() {
        let backend = FakeBackend::new();
        let mut manager = manager(&backend);
        assert!(manager.enumerate().is_empty());
        assert_eq!(backend.opens().len(), 10);
    }

    #[test]
    fn test_open_failure_leaves_nothing_open() {
        let backend = FakeBackend::new().with_camera(0).with_broken_camera(1);
        let mut manager = manager(&backend);
        manager.enumerate();

        manager.open(0).unwrap();
        assert_eq!(manager.open(1), Err(DeviceError::NoFrame(1)));
        assert!(!manager.is_open());
        assert_eq!(backend.open_streams(), 0);

        assert!(matches!(manager.open(7), Err(DeviceError::OpenFailed { index: 7, .. })));
        assert!(!manager.is_open());
    }

    #[test]
    fn test_read_frame_is_mirrored() {
        let backend = FakeBackend::new().with_camera(0);
        let mut manager = manager(&backend);
        assert!(manager.read_frame().is_none());

        manager.open(0).unwrap();
        let frame = manager.read_frame().unwrap();
        // The fake marks its top-left pixel; mirrored it lands top-right
        assert_eq!(frame.get_pixel(frame.width() - 1, 0).0, [255, 0, 0]);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_switch_to_active_is_noop() {
        let backend = FakeBackend::new().with_camera(0).with_camera(1);
        let mut manager = manager(&backend);
        manager.enumerate();
        manager.open(0).unwrap();
        backend.clear_opens();

        manager.switch_to(0).unwrap();
        assert!(backend.opens().is_empty());
        assert_eq!(manager.active_index(), Some(0));

        manager.switch_to(1).unwrap();
        assert_eq!(backend.opens(), vec![1]);
        assert_eq!(manager.active_index(), Some(1));
        assert_eq!(manager.active_device().map(|d| d.index), Some(1));
    }

    #[test]
    fn test_switch_to_unknown_index_keeps_device() {
        let backend = FakeBackend::new().with_camera(0).with_camera(5);
        let mut manager = manager(&backend);
        manager.enumerate();
        manager.open(0).unwrap();
        backend.clear_opens();

        assert_eq!(manager.switch_to(4), Err(DeviceError::NotEnumerated(4)));
        assert_eq!(manager.active_index(), Some(0));
        assert!(backend.opens().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = FakeBackend::new().with_camera(0);
        let mut manager = manager(&backend);
        manager.open(0).unwrap();
        assert!(manager.close());
        assert!(!manager.close());
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn test_enumerate_skips_probing_active_device() {
        let backend = FakeBackend::new().with_camera(0).with_camera(1);
        let mut manager = manager(&backend);
        manager.enumerate();
        manager.open(0).unwrap();
        backend.clear_opens();

        let devices = manager.enumerate();
        assert_eq!(devices.len(), 2);
        assert!(!backend.opens().contains(&0));
        assert_eq!(manager.active_index(), Some(0));
    }
}
