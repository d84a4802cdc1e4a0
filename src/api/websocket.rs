//! WebSocket handler for gaze clients
//!
//! Each connection receives a greeting and the device list, then every
//! broadcast event. Text messages are parsed as commands and queued for the
//! control thread.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast::error::RecvError, mpsc};

use super::shared::SharedStateHandle;
use crate::tracking::{Command, TrackingEvent};

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedStateHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Greeting sent to a newly connected client
pub fn connected_event() -> TrackingEvent {
    TrackingEvent::ConnectionStatus {
        status: "connected".to_string(),
        message: "Gaze tracking server ready".to_string(),
    }
}

/// Turn an incoming text frame into a queued command.
///
/// Returns the event to send back to this client when the frame is not a
/// valid command or the control loop is gone.
pub fn handle_text(state: &SharedStateHandle, text: &str) -> Option<TrackingEvent> {
    let cmd = match Command::from_json(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::debug!("Rejected WebSocket message: {}", e);
            return Some(TrackingEvent::TrackingError {
                error: format!("Invalid command: {}", e),
            });
        }
    };
    tracing::debug!("WebSocket command: {}", cmd.name());
    match state.send_command(cmd) {
        Ok(()) => None,
        Err(_) => Some(TrackingEvent::TrackingError {
            error: "Control loop is not running".to_string(),
        }),
    }
}

fn encode(event: &TrackingEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            tracing::warn!("Failed to encode event: {}", e);
            None
        }
    }
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: SharedStateHandle) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the greeting so no event falls in between
    let mut rx = state.subscribe();

    for event in [connected_event(), state.device_list_event()] {
        if let Some(msg) = encode(&event) {
            if sender.send(msg).await.is_err() {
                return;
            }
        }
    }

    tracing::info!("WebSocket client connected");

    // Replies addressed to this client only
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<TrackingEvent>();

    let recv_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Some(reply) = handle_text(&recv_state, &text) {
                        if direct_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    tracing::info!("WebSocket client requested close");
                    break;
                }
                Err(e) => {
                    tracing::warn!("WebSocket receive error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(event) = direct_rx.recv() => event,
                res = rx.recv() => match res {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket client lagged, skipped {} events", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            if let Some(msg) = encode(&event) {
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = recv_task => {},
        _ = send_task => {},
    }

    tracing::info!("WebSocket client disconnected");
}
