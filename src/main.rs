//! Gaze tracking server
//!
//! Usage: `gaze-tracker [settings.json]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};

use gaze_tracker::api::{self, SharedStateHandle};
use gaze_tracker::camera::{CaptureDeviceManager, NokhwaBackend};
use gaze_tracker::gaze::{GazeEstimator, LandmarkSource, NoLandmarks, ScreenSize, SharedMapping};
use gaze_tracker::settings::{default_settings_path, CalibrationStore, TrackerSettings};
use gaze_tracker::telemetry::{init_logging, LogConfig};
use gaze_tracker::tracking::{Command, Reply, TrackingSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => default_settings_path()?,
    };
    let settings = TrackerSettings::load_or_default(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&LogConfig::from(&settings.logging)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("Gaze Tracker v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Settings: {}", settings_path.display());

    let mapping = SharedMapping::default();
    match ScreenSize::new(settings.gaze.screen_width, settings.gaze.screen_height) {
        Ok(screen) => mapping.set_screen_size(screen),
        Err(e) => tracing::warn!("{}; using default screen", e),
    }
    let store = CalibrationStore::in_config_dir()?;
    if let Some(calibration) = store.load() {
        tracing::info!(?calibration, "Restored calibration from {}", store.path().display());
        mapping.set_calibration(calibration);
    }

    let events_tx = api::event_channel();
    let manager = CaptureDeviceManager::new(NokhwaBackend, settings.camera.clone());
    let estimator = GazeEstimator::new(settings.gaze.clone(), mapping.clone());
    let session = TrackingSession::new(
        manager,
        estimator,
        landmark_source(&settings),
        settings.tracking.clone(),
        Arc::new(events_tx.clone()),
    );

    let (state, command_rx) =
        api::create_shared_state(session.status().clone(), mapping, events_tx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Seed the device list before the first client connects
    state.send_command(Command::ListDevices)?;

    let control_state = state.clone();
    let control_shutdown = shutdown_rx.clone();
    let control = std::thread::Builder::new()
        .name("gaze-control".to_string())
        .spawn(move || run_control(session, command_rx, control_state, store, control_shutdown))
        .context("Failed to spawn control thread")?;

    let server_state = state.clone();
    let server_settings = settings.server.clone();
    let mut server = tokio::spawn(async move {
        if let Err(e) = api::run_server(&server_settings, server_state, shutdown_rx).await {
            tracing::error!("Gaze server error: {}", e);
        }
    });

    let server_done = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutdown requested");
            false
        }
        _ = &mut server => true,
    };

    let _ = shutdown_tx.send(true);
    if !server_done {
        let _ = server.await;
    }

    // Wakes the control thread so it sees the shutdown flag
    let _ = state.send_command(Command::StopTracking);
    drop(state);

    if control.join().is_err() {
        tracing::error!("Control thread panicked");
    }
    tracing::info!("Gaze Tracker stopped");
    Ok(())
}

/// Face-mesh model from the settings, or a detector that never finds a face
fn landmark_source(settings: &TrackerSettings) -> Box<dyn LandmarkSource> {
    #[cfg(feature = "onnx")]
    {
        if let Some(path) = &settings.model_path {
            match gaze_tracker::gaze::OnnxFaceMesh::load(path) {
                Ok(mesh) => {
                    tracing::info!("Loaded face mesh model {}", path.display());
                    return Box::new(mesh);
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }
    }
    #[cfg(not(feature = "onnx"))]
    {
        if settings.model_path.is_some() {
            tracing::warn!("Built without the onnx feature; model_path is ignored");
        }
    }
    tracing::warn!("No face mesh model loaded, gaze samples will not be produced");
    Box::new(NoLandmarks)
}

/// Execute commands against the session and broadcast the outcome
fn run_control(
    mut session: TrackingSession<NokhwaBackend>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: SharedStateHandle,
    store: CalibrationStore,
    shutdown: watch::Receiver<bool>,
) {
    while let Some(command) = commands.blocking_recv() {
        match session.dispatch(command.clone()) {
            Ok(reply) => {
                let calibration = match &reply {
                    Reply::CalibrationApplied { calibration, .. }
                    | Reply::ScreenSizeApplied { calibration, .. } => Some(*calibration),
                    _ => None,
                };
                if let Some(calibration) = calibration {
                    if let Err(e) = store.save(&calibration) {
                        tracing::warn!("Failed to save calibration: {}", e);
                    }
                }
                for event in reply.into_events() {
                    state.broadcast(event);
                }
            }
            Err(e) => {
                tracing::warn!("Command {} failed: {}", command.name(), e);
                state.broadcast(command.error_event(&e));
            }
        }
        if *shutdown.borrow() {
            break;
        }
    }
    // Dropping the session stops the worker and releases the camera
    tracing::info!("Control thread exiting");
}
