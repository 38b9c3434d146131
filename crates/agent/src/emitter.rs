//! Event emitter: the ordered, single-producer record stream a client reads.
//!
//! The emitter owns the sending half of the session channel. A failed send
//! means the receiver is gone, which the round controller treats as a client
//! disconnect.

use crate::stream_event::StreamRecord;
use fundwise_core::error::SessionError;
use fundwise_core::outcome::SessionOutcome;
use fundwise_core::tool::{ToolInvocation, ToolOutcome};
use tokio::sync::mpsc;
use tracing::trace;

pub struct EventEmitter {
    tx: mpsc::Sender<StreamRecord>,
    /// Whether a text fragment has gone out since the last retraction.
    text_pending: bool,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<StreamRecord>) -> Self {
        Self {
            tx,
            text_pending: false,
        }
    }

    /// A connected emitter/receiver pair.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamRecord>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    async fn send(&self, record: StreamRecord) -> Result<(), SessionError> {
        trace!(kind = record.kind(), "Emitting record");
        self.tx
            .send(record)
            .await
            .map_err(|_| SessionError::ClientDisconnected)
    }

    pub async fn progress(&self, label: impl Into<String>) -> Result<(), SessionError> {
        self.send(StreamRecord::Progress(label.into())).await
    }

    pub async fn text(&mut self, fragment: impl Into<String>) -> Result<(), SessionError> {
        let fragment = fragment.into();
        if fragment.is_empty() {
            return Ok(());
        }
        self.send(StreamRecord::Text(fragment)).await?;
        self.text_pending = true;
        Ok(())
    }

    /// Retract the text sent since the last retraction. A no-op when there
    /// is nothing to retract.
    pub async fn clear_text(&mut self) -> Result<(), SessionError> {
        if !self.text_pending {
            return Ok(());
        }
        self.send(StreamRecord::ClearText(true)).await?;
        self.text_pending = false;
        Ok(())
    }

    pub async fn tool_call(&self, invocation: &ToolInvocation) -> Result<(), SessionError> {
        self.send(StreamRecord::tool_call(invocation)).await
    }

    pub async fn tool_call_done(&self, outcome: &ToolOutcome) -> Result<(), SessionError> {
        self.send(StreamRecord::tool_call_done(outcome)).await
    }

    /// Emit the metadata record followed by the terminal marker.
    pub async fn finish(self, outcome: SessionOutcome) -> Result<(), SessionError> {
        self.send(StreamRecord::meta(outcome)).await?;
        self.send(StreamRecord::Done(true)).await
    }

    /// Emit the terminal error record. Nothing is sent for a disconnect.
    pub async fn fail(self, error: &SessionError) {
        if matches!(error, SessionError::ClientDisconnected) {
            return;
        }
        let _ = self.send(StreamRecord::error(error)).await;
    }

    /// Resolves once the client has dropped its receiver.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut rx: mpsc::Receiver<StreamRecord>) -> Vec<StreamRecord> {
        let mut out = Vec::new();
        while let Some(record) = rx.recv().await {
            out.push(record);
        }
        out
    }

    #[tokio::test]
    async fn clear_only_after_text() {
        let (mut emitter, rx) = EventEmitter::channel(16);
        emitter.clear_text().await.unwrap();
        emitter.text("Let me check").await.unwrap();
        assert!(emitter.text_pending);
        emitter.clear_text().await.unwrap();
        emitter.clear_text().await.unwrap();
        emitter.finish(SessionOutcome::new()).await.unwrap();

        let records = drain(rx).await;
        assert_eq!(
            records.iter().map(StreamRecord::kind).collect::<Vec<_>>(),
            vec!["text", "clearText", "meta", "done"]
        );
    }

    #[tokio::test]
    async fn empty_fragment_is_not_sent() {
        let (mut emitter, rx) = EventEmitter::channel(4);
        emitter.text("").await.unwrap();
        assert!(!emitter.text_pending);
        drop(emitter);
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_is_disconnect() {
        let (mut emitter, rx) = EventEmitter::channel(4);
        drop(rx);
        let err = emitter.text("late").await.unwrap_err();
        assert!(matches!(err, SessionError::ClientDisconnected));
        emitter.closed().await;
    }

    #[tokio::test]
    async fn fail_sends_error_record() {
        let (emitter, rx) = EventEmitter::channel(4);
        emitter
            .fail(&SessionError::Input("empty message".into()))
            .await;
        let records = drain(rx).await;
        assert_eq!(records.len(), 1);
        let StreamRecord::Error(error) = &records[0] else {
            panic!("expected an error record");
        };
        assert_eq!(error.status, 400);
    }

    #[tokio::test]
    async fn fail_on_disconnect_is_silent() {
        let (emitter, rx) = EventEmitter::channel(4);
        emitter.fail(&SessionError::ClientDisconnected).await;
        assert!(drain(rx).await.is_empty());
    }
}
