//! Scripted provider and tool handlers for exercising the orchestrator
//! without a live backend.

use async_trait::async_trait;
use fundwise_config::{AppConfig, RetryConfig};
use fundwise_core::error::{ProviderError, ToolError};
use fundwise_core::provider::{
    BlockKind, Delta, EventStream, Provider, ProviderRequest, StopReason, StreamEvent, Usage,
};
use fundwise_core::tool::{ToolContext, ToolHandler};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::stream_event::StreamRecord;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What the scripted backend does for one call.
#[derive(Debug, Clone)]
pub enum RoundScript {
    /// Open successfully and replay these items.
    Events(Vec<Result<StreamEvent, ProviderError>>),
    /// Fail to open.
    OpenError(ProviderError),
}

/// A provider that replays one script per call, in order.
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<RoundScript>>,
    calls: AtomicU32,
    requests: Mutex<Vec<ProviderRequest>>,
    event_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<RoundScript>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            event_delay: None,
        }
    }

    /// Fail the first `n` calls with `error` before any script is used.
    pub fn fail_first(self, n: usize, error: ProviderError) -> Self {
        {
            let mut rounds = lock(&self.rounds);
            for _ in 0..n {
                rounds.push_front(RoundScript::OpenError(error.clone()));
            }
        }
        self
    }

    /// Sleep this long before each replayed event.
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request);

        let script = lock(&self.rounds).pop_front();
        let items = match script {
            Some(RoundScript::Events(items)) => items,
            Some(RoundScript::OpenError(e)) => return Err(e),
            None => {
                return Err(ProviderError::NotConfigured(
                    "scripted provider has no more rounds".into(),
                ));
            }
        };

        let (tx, rx) = mpsc::channel(64);
        let delay = self.event_delay;
        tokio::spawn(async move {
            for item in items {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        input_tokens: 10,
        output_tokens: 5,
    })
}

fn text_block(fragments: &[&str]) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::BlockStart {
        block: BlockKind::Text,
    }];
    events.extend(fragments.iter().map(|f| StreamEvent::Delta {
        delta: Delta::Text((*f).to_string()),
    }));
    events.push(StreamEvent::BlockStop);
    events
}

/// A round that streams `fragments` as one text block and finishes.
pub fn text_round(fragments: &[&str]) -> RoundScript {
    let mut events = text_block(fragments);
    events.push(StreamEvent::MessageStop {
        stop_reason: StopReason::Finished,
        usage: usage(),
    });
    RoundScript::Events(events.into_iter().map(Ok).collect())
}

/// A round that finishes without producing any text.
pub fn silent_round() -> RoundScript {
    RoundScript::Events(vec![Ok(StreamEvent::MessageStop {
        stop_reason: StopReason::Finished,
        usage: usage(),
    })])
}

/// A round that optionally streams `text`, then requests the given tools
/// as `(id, name, input)`.
pub fn tool_round(text: &str, calls: &[(&str, &str, serde_json::Value)]) -> RoundScript {
    let mut events = if text.is_empty() {
        vec![]
    } else {
        text_block(&[text])
    };
    for (id, name, input) in calls {
        events.push(StreamEvent::BlockStart {
            block: BlockKind::ToolUse {
                id: (*id).to_string(),
                name: (*name).to_string(),
            },
        });
        events.push(StreamEvent::Delta {
            delta: Delta::ToolInput(input.to_string()),
        });
        events.push(StreamEvent::BlockStop);
    }
    events.push(StreamEvent::MessageStop {
        stop_reason: StopReason::ToolRequested,
        usage: usage(),
    });
    RoundScript::Events(events.into_iter().map(Ok).collect())
}

/// A round that streams some text and then breaks mid-stream.
pub fn interrupted_round(fragments: &[&str]) -> RoundScript {
    let mut items: Vec<Result<StreamEvent, ProviderError>> = vec![Ok(StreamEvent::BlockStart {
        block: BlockKind::Text,
    })];
    items.extend(fragments.iter().map(|f| {
        Ok(StreamEvent::Delta {
            delta: Delta::Text((*f).to_string()),
        })
    }));
    items.push(Err(ProviderError::StreamInterrupted("connection reset".into())));
    RoundScript::Events(items)
}

/// Configuration with millisecond retry backoff.
pub fn fast_config() -> AppConfig {
    AppConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
        },
        ..AppConfig::default()
    }
}

/// Drain a session's record stream.
pub async fn collect_records(mut rx: mpsc::Receiver<StreamRecord>) -> Vec<StreamRecord> {
    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        records.push(record);
    }
    records
}

// --- Tool handlers ---

/// Returns a fixed value and remembers the contexts it saw.
pub struct StaticTool {
    value: serde_json::Value,
    contexts: Mutex<Vec<ToolContext>>,
}

impl StaticTool {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn contexts(&self) -> Vec<ToolContext> {
        lock(&self.contexts).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.contexts).len()
    }
}

#[async_trait]
impl ToolHandler for StaticTool {
    fn description(&self) -> &str {
        "Returns a fixed result"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(
        &self,
        _input: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        lock(&self.contexts).push(context.clone());
        Ok(self.value.clone())
    }
}

pub struct FailingTool {
    reason: String,
}

impl FailingTool {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for FailingTool {
    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(
        &self,
        _input: serde_json::Value,
        _context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "failing".into(),
            reason: self.reason.clone(),
        })
    }
}

pub struct PanickingTool;

#[async_trait]
impl ToolHandler for PanickingTool {
    fn description(&self) -> &str {
        "Panics when invoked"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(
        &self,
        _input: serde_json::Value,
        _context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        panic!("handler exploded")
    }
}

/// Sleeps, then succeeds. Counts the calls that ran to completion.
pub struct SlowTool {
    delay: Duration,
    completed: Arc<AtomicU32>,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            completed: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolHandler for SlowTool {
    fn description(&self) -> &str {
        "Takes its time"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(
        &self,
        _input: serde_json::Value,
        _context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({"ok": true}))
    }
}
