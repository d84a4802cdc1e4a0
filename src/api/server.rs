//! Axum server setup and startup

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};

use super::routes::create_router;
use super::shared::{SharedState, SharedStateHandle};
use crate::gaze::SharedMapping;
use crate::settings::ServerSettings;
use crate::tracking::{Command, SharedStatus, TrackingEvent};

/// Run the API server until the shutdown signal fires
pub async fn run_server(
    settings: &ServerSettings,
    shared_state: SharedStateHandle,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    // Clients are served from other origins (file://, dev servers)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(shared_state).layer(cors);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Gaze server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Gaze server shutting down gracefully");
        })
        .await
}

/// Create the shared state and the command channel.
///
/// `events_tx` is the sender the session publishes through. Returns the
/// handle for the API server and the receiver for the control thread.
pub fn create_shared_state(
    status: SharedStatus,
    mapping: SharedMapping,
    events_tx: broadcast::Sender<TrackingEvent>,
) -> (SharedStateHandle, mpsc::UnboundedReceiver<Command>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(SharedState::new(status, mapping, events_tx, tx));
    (state, rx)
}
