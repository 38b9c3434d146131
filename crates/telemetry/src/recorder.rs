//! Fire-and-forget recorder handed to the orchestrator.
//!
//! `record` never awaits and never fails the caller: records go onto a
//! bounded queue drained by a background task, and a full queue drops the
//! record and counts it.

use crate::TelemetryError;
use crate::engine::TelemetryEngine;
use crate::model::SessionRecord;
use fundwise_config::TelemetryConfig;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct TelemetryRecorder {
    tx: Option<mpsc::Sender<SessionRecord>>,
    engine: Arc<TelemetryEngine>,
}

impl TelemetryRecorder {
    /// Start the draining task. Must be called from within a Tokio runtime.
    pub fn spawn(config: &TelemetryConfig) -> Self {
        let engine = Arc::new(TelemetryEngine::new(config.recent_capacity));
        if !config.enabled {
            return Self { tx: None, engine };
        }

        let (tx, mut rx) = mpsc::channel::<SessionRecord>(config.queue_capacity.max(1));
        let sink = engine.clone();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                tracing::debug!(
                    session = %record.id,
                    success = record.success,
                    duration_ms = record.duration_ms,
                    "Telemetry recorded"
                );
                sink.record(record);
            }
        });

        Self {
            tx: Some(tx),
            engine,
        }
    }

    /// A recorder that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            engine: Arc::new(TelemetryEngine::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Enqueue a record without waiting.
    pub fn try_record(&self, record: SessionRecord) -> Result<(), TelemetryError> {
        let tx = self.tx.as_ref().ok_or(TelemetryError::Disabled)?;
        tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                self.engine.note_dropped();
                TelemetryError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => TelemetryError::Closed,
        })
    }

    /// Enqueue a record, ignoring any failure.
    pub fn record(&self, record: SessionRecord) {
        if let Err(e) = self.try_record(record) {
            if !matches!(e, TelemetryError::Disabled) {
                tracing::debug!(error = %e, "Telemetry record dropped");
            }
        }
    }

    pub fn engine(&self) -> &Arc<TelemetryEngine> {
        &self.engine
    }
}
