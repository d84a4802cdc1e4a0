//! Settings management for the gaze tracker
//!
//! Settings live in a JSON file under the platform config directory. Every
//! field has a serde default so older or partial files keep loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::gaze::CalibrationState;

const APP_DIR: &str = "gaze-tracker";
const SETTINGS_FILE: &str = "settings.json";
const CALIBRATION_FILE: &str = "calibration.json";

/// Capture device probing and open parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Camera index tried first on start
    pub preferred_index: u32,
    /// Device indices probed during enumeration are `0..probe_range`
    pub probe_range: u32,
    /// Requested frame width
    pub frame_width: u32,
    /// Requested frame height
    pub frame_height: u32,
    /// Requested capture rate
    pub fps: u32,
    /// Internal frame buffer depth (1 keeps latency low)
    pub buffer_frames: u32,
    /// Wait after opening a probe handle before the test read
    pub probe_settle_ms: u64,
    /// Wait after opening the working handle before the verification read
    pub open_settle_ms: u64,
    /// Wait after releasing a handle before opening the next one
    pub release_settle_ms: u64,
    /// Upper bound for a single blocking frame read
    pub read_timeout_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            preferred_index: 0,
            probe_range: 10,
            frame_width: 640,
            frame_height: 480,
            fps: 30,
            buffer_frames: 1,
            probe_settle_ms: 200,
            open_settle_ms: 300,
            release_settle_ms: 100,
            read_timeout_ms: 500,
        }
    }
}

impl CameraSettings {
    pub fn probe_settle(&self) -> Duration {
        Duration::from_millis(self.probe_settle_ms)
    }

    pub fn open_settle(&self) -> Duration {
        Duration::from_millis(self.open_settle_ms)
    }

    pub fn release_settle(&self) -> Duration {
        Duration::from_millis(self.release_settle_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Gaze geometry tuning.
///
/// The denominators assume a fixed eye-region scale, so accuracy drifts as
/// the face moves towards or away from the camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeSettings {
    /// Exponential smoothing factor (0 = no smoothing, 1 = frozen)
    pub smoothing_factor: f32,
    /// Horizontal iris displacement normalizer in pixels
    pub horizontal_denominator: f32,
    /// Vertical iris displacement normalizer in pixels
    pub vertical_denominator: f32,
    /// Share of the half frame width reachable horizontally
    pub horizontal_proportion: f32,
    /// Share of the half frame height reachable vertically
    pub vertical_proportion: f32,
    /// Soft edge guard as a fraction of each frame dimension
    pub edge_margin: f32,
    /// Target screen width in pixels
    pub screen_width: u32,
    /// Target screen height in pixels
    pub screen_height: u32,
}

impl Default for GazeSettings {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.8,
            horizontal_denominator: 30.0,
            vertical_denominator: 20.0,
            horizontal_proportion: 0.9,
            vertical_proportion: 0.8,
            edge_margin: 0.05,
            screen_width: 1920,
            screen_height: 1080,
        }
    }
}

impl GazeSettings {
    /// Reject tuning values that would make the gaze mapping degenerate
    pub fn validate(&self) -> Result<(), SettingsError> {
        let positive = [
            ("gaze.horizontal_denominator", self.horizontal_denominator),
            ("gaze.vertical_denominator", self.vertical_denominator),
            ("gaze.horizontal_proportion", self.horizontal_proportion),
            ("gaze.vertical_proportion", self.vertical_proportion),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(field, value, "must be positive"));
            }
        }
        if !(0.0..0.5).contains(&self.edge_margin) {
            return Err(invalid("gaze.edge_margin", self.edge_margin, "must be in [0, 0.5)"));
        }
        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            return Err(invalid("gaze.smoothing_factor", self.smoothing_factor, "must be in [0, 1]"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: f32, reason: &'static str) -> SettingsError {
    SettingsError::Invalid { field, value, reason }
}

/// Tick loop rates and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Gaze detection rate
    pub target_fps: u32,
    /// Luminance preview rate
    pub preview_fps: u32,
    /// Samples at or below this confidence are not published
    pub publish_threshold: f32,
    /// Sleep after a failed frame read
    pub read_retry_ms: u64,
    /// Consecutive failed reads before the loop fails over to another camera
    pub device_lost_after: u32,
    /// Interval of the periodic status log line
    pub status_interval_ms: u64,
    /// How long a running switch request waits for the worker's answer
    pub switch_timeout_ms: u64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            target_fps: 30,
            preview_fps: 15,
            publish_threshold: 0.1,
            read_retry_ms: 100,
            device_lost_after: 50,
            status_interval_ms: 3000,
            switch_timeout_ms: 10_000,
        }
    }
}

impl TrackingSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }

    pub fn preview_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.preview_fps.max(1) as f64)
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn switch_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_timeout_ms)
    }
}

/// WebSocket/HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
        }
    }
}

/// Logging settings, mirrored into [`crate::telemetry::LogConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

/// Top-level settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub camera: CameraSettings,
    pub gaze: GazeSettings,
    pub tracking: TrackingSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    /// Optional path to a face-mesh ONNX model
    pub model_path: Option<PathBuf>,
}

impl TrackerSettings {
    /// Load and validate settings from a JSON file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.gaze.validate()
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        write_json(path, self)
    }
}

/// Directory holding the settings and calibration files
pub fn config_dir() -> Result<PathBuf, SettingsError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(SettingsError::NoConfigDir)
}

/// Default settings file location
pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    Ok(config_dir()?.join(SETTINGS_FILE))
}

/// Persisted calibration, restored at startup
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store next to the settings file in the platform config directory
    pub fn in_config_dir() -> Result<Self, SettingsError> {
        Ok(Self::new(config_dir()?.join(CALIBRATION_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved calibration. Missing or malformed files yield `None`.
    pub fn load(&self) -> Option<CalibrationState> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<CalibrationState>(&contents) {
            Ok(state) if state.is_valid() => Some(state),
            Ok(state) => {
                tracing::warn!(?state, "Ignoring saved calibration with invalid scale");
                None
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable calibration file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, state: &CalibrationState) -> Result<(), SettingsError> {
        write_json(&self.path, state)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
