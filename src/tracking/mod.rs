//! Tracking session and its fixed-rate loop
//!
//! The session owns the capture device, estimator and landmark source.
//! While running they live on the `gaze-tracking` worker thread; control
//! commands reach the worker through a single-slot request queue.

pub mod command;
pub mod events;
pub mod failover;
pub mod session;
pub mod tick;

pub use command::{Command, Reply, StartOptions};
pub use events::{PreviewFrame, PublishSink, TrackingEvent, TrackingStatus};
pub use failover::{failover_order, open_with_failover};
pub use session::{SessionSnapshot, SessionState, SharedStatus, TrackingSession};
pub use tick::{LoopExit, TickOutcome, TrackingLoop, WorkerParts, WorkerRequest};
