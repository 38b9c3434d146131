//! Session telemetry for fundwise.
//!
//! The orchestrator hands every finished session to a
//! [`TelemetryRecorder`]; a background task folds records into a
//! [`TelemetryEngine`] whose snapshot backs the usage endpoint. Recording
//! never blocks or fails a session.

pub mod engine;
pub mod model;
pub mod recorder;

pub use engine::TelemetryEngine;
pub use model::{SessionRecord, UsageSnapshot};
pub use recorder::TelemetryRecorder;

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry is disabled")]
    Disabled,

    #[error("telemetry queue is full")]
    QueueFull,

    #[error("telemetry worker has stopped")]
    Closed,
}
