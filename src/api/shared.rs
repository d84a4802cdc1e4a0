//! State shared between the API handlers and the control thread

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::camera::CaptureDevice;
use crate::gaze::{CalibrationState, ScreenSize, SharedMapping};
use crate::tracking::{Command, SessionSnapshot, SharedStatus, TrackingEvent};

/// Broadcast capacity; a preview and a sample per tick need headroom
const EVENT_CAPACITY: usize = 256;

/// Create the event broadcast channel shared by the session and the server
pub fn event_channel() -> broadcast::Sender<TrackingEvent> {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    tx
}

/// Response body of `/api/status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub calibration: CalibrationState,
    pub screen: ScreenSize,
}

/// Shared state accessible by API handlers
pub struct SharedState {
    /// Session snapshot written by the session and its worker
    status: SharedStatus,
    /// Calibration and target screen
    mapping: SharedMapping,
    /// Channel to the control thread
    command_tx: mpsc::UnboundedSender<Command>,
    /// Broadcast channel for WebSocket events
    events_tx: broadcast::Sender<TrackingEvent>,
}

impl SharedState {
    pub fn new(
        status: SharedStatus,
        mapping: SharedMapping,
        events_tx: broadcast::Sender<TrackingEvent>,
        command_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            status,
            mapping,
            command_tx,
            events_tx,
        }
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            version: env!("CARGO_PKG_VERSION"),
            session: self.status.snapshot(),
            calibration: self.mapping.calibration(),
            screen: self.mapping.screen(),
        }
    }

    pub fn devices(&self) -> (Vec<CaptureDevice>, Option<u32>) {
        let snapshot = self.status.snapshot();
        (snapshot.devices, snapshot.device_index)
    }

    /// Current device list as an event
    pub fn device_list_event(&self) -> TrackingEvent {
        let (devices, current_index) = self.devices();
        TrackingEvent::DeviceList {
            devices,
            current_index,
        }
    }

    /// Send a command to the control thread
    pub fn send_command(&self, cmd: Command) -> Result<(), mpsc::error::SendError<Command>> {
        self.command_tx.send(cmd)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events_tx.subscribe()
    }

    /// Broadcast an event to all WebSocket clients
    pub fn broadcast(&self, event: TrackingEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Type alias for the shared state handle used by API handlers
pub type SharedStateHandle = Arc<SharedState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_shared_state;

    #[test]
    fn test_commands_reach_control_channel() {
        let (state, mut rx) = create_shared_state(SharedStatus::default(), SharedMapping::default(), event_channel());
        state.send_command(Command::ListDevices).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Command::ListDevices);
    }

    #[test]
    fn test_broadcast_reaches_subscribers() {
        let (state, _rx) = create_shared_state(SharedStatus::default(), SharedMapping::default(), event_channel());
        let mut events = state.subscribe();
        state.broadcast(state.device_list_event());
        assert!(matches!(
            events.try_recv().unwrap(),
            TrackingEvent::DeviceList { current_index: None, .. }
        ));
    }

    #[test]
    fn test_status_includes_mapping() {
        let mapping = SharedMapping::default();
        mapping.set_screen_size(ScreenSize::new(2560, 1080).unwrap());
        let (state, _rx) = create_shared_state(SharedStatus::default(), mapping, event_channel());
        let json = serde_json::to_value(state.status()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["screen"]["width"], 2560);
        assert!(json["calibration"]["scale_x"].is_number());
    }
}
