//! WebSocket and REST API for gaze clients
//!
//! Clients connect to `/ws`, send JSON commands and receive JSON events.
//! Commands are forwarded to the control thread that owns the session.

pub mod routes;
pub mod server;
pub mod shared;
pub mod websocket;

pub use server::{create_shared_state, run_server};
pub use shared::{event_channel, SharedState, SharedStateHandle, StatusResponse};
