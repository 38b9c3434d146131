//! Round controller: drives one session from the first backend call to the
//! terminal record.
//!
//! A session moves through `Requesting → Streaming → {AwaitingTools |
//! Finalizing}`. Rounds run strictly one after another; the only concurrency
//! is the fan-out of a single round's tool invocations. The message list is
//! owned by the session task and only changes between rounds.
//!
//! [`Orchestrator::start`] builds the context and opens the first round's
//! stream before returning, so input errors and a backend that is down or
//! misconfigured surface as a plain `Err` instead of a half-started stream.

use crate::assembler::{Assembled, BlockState, RoundBlocks, step};
use crate::completion::CompletionClient;
use crate::context::ContextBuilder;
use crate::emitter::EventEmitter;
use crate::executor::ToolExecutor;
use crate::stream_event::StreamRecord;
use fundwise_config::AppConfig;
use fundwise_core::error::{ProviderError, SessionError};
use fundwise_core::message::{Message, Role, SessionRequest};
use fundwise_core::outcome::SessionOutcome;
use fundwise_core::provider::{EventStream, Provider, StopReason, ToolDefinition};
use fundwise_core::tool::{KnownTool, ToolCatalog, ToolContext, ToolOutcome};
use fundwise_telemetry::{SessionRecord, TelemetryRecorder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const THINKING: &str = "Thinking…";
const ANALYZING: &str = "Analyzing results…";
const BUDGET_FALLBACK: &str = "I wasn't able to finish the analysis within the allowed number of \
                               steps. Please try a narrower question.";
const EMPTY_FALLBACK: &str =
    "I don't have an answer to that right now. Please try rephrasing the question.";

/// Entry point for conversation sessions. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    client: CompletionClient,
    executor: ToolExecutor,
    context: ContextBuilder,
    telemetry: TelemetryRecorder,
    max_rounds: u32,
    session_timeout: Duration,
    tool_timeout: Duration,
    event_buffer: usize,
}

/// A running session: its id and the receiving end of its record stream.
///
/// Dropping `records` is how a client disconnects.
pub struct SessionHandle {
    pub id: String,
    pub records: mpsc::Receiver<StreamRecord>,
}

#[derive(Debug, Default)]
struct SessionStats {
    backend_calls: u32,
    tool_calls: u32,
}

type OpenedStream = (EventStream, u32);

enum RoundFailure {
    Backend(ProviderError),
    Disconnected,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        catalog: Arc<ToolCatalog>,
        telemetry: TelemetryRecorder,
    ) -> Self {
        let client = CompletionClient::new(provider, config, catalog.definitions());
        let orchestrator = &config.orchestrator;
        Self {
            inner: Arc::new(Inner {
                client,
                executor: ToolExecutor::new(catalog),
                context: ContextBuilder::new(orchestrator.max_text_chars),
                telemetry,
                max_rounds: orchestrator.max_rounds.max(1),
                session_timeout: orchestrator.session_timeout(),
                tool_timeout: orchestrator.tool_timeout(),
                event_buffer: orchestrator.event_buffer.max(1),
            }),
        }
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.inner.executor.catalog().definitions()
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.inner.telemetry
    }

    pub fn max_rounds(&self) -> u32 {
        self.inner.max_rounds
    }

    /// Validate the request, open the first round and spawn the session.
    pub async fn start(&self, request: SessionRequest) -> Result<SessionHandle, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.inner.session_timeout;

        info!(
            session = %id,
            message_chars = request.message.chars().count(),
            history = request.history.len(),
            attachments = request.attachments.len(),
            "Session started"
        );

        let mut stats = SessionStats::default();
        let messages = match self.inner.context.build(&request) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(session = %id, error = %e, "Rejected session request");
                self.inner.record(&id, started, Some(&e), &stats, &SessionOutcome::new());
                return Err(e);
            }
        };

        let opened = match tokio::time::timeout_at(deadline, self.inner.client.open(&messages)).await
        {
            Ok(Ok((stream, attempts))) => {
                stats.backend_calls += attempts;
                Ok((stream, attempts))
            }
            Ok(Err((e, attempts))) => {
                stats.backend_calls += attempts;
                Err(SessionError::from_provider(e, attempts))
            }
            Err(_) => Err(SessionError::DeadlineExceeded(
                self.inner.session_timeout.as_secs(),
            )),
        };
        let first = match opened {
            Ok(first) => first,
            Err(e) => {
                warn!(session = %id, error = %e, "First backend call failed");
                self.inner.record(&id, started, Some(&e), &stats, &SessionOutcome::new());
                return Err(e);
            }
        };

        let (emitter, records) = EventEmitter::channel(self.inner.event_buffer);
        let session = Session {
            id: id.clone(),
            inner: self.inner.clone(),
            tool_context: ToolContext {
                session_id: id.clone(),
                data: request.tool_context,
            },
            messages,
            emitter,
            outcome: SessionOutcome::new(),
            stats,
            last_text: None,
            started,
            deadline,
        };
        tokio::spawn(session.run(first));

        Ok(SessionHandle { id, records })
    }
}

impl Inner {
    fn record(
        &self,
        id: &str,
        started: Instant,
        error: Option<&SessionError>,
        stats: &SessionStats,
        outcome: &SessionOutcome,
    ) {
        let mut record = SessionRecord::new(
            started.elapsed().as_millis() as u64,
            error.is_none(),
            error.map(ToString::to_string),
        )
        .with_session_id(id);
        record.backend_calls = stats.backend_calls;
        record.tool_calls = stats.tool_calls;
        record.tools_used = outcome.tools_used.clone();
        record.input_tokens = u64::from(outcome.usage.input_tokens);
        record.output_tokens = u64::from(outcome.usage.output_tokens);
        self.telemetry.record(record);
    }
}

struct Session {
    id: String,
    inner: Arc<Inner>,
    messages: Vec<Message>,
    tool_context: ToolContext,
    emitter: EventEmitter,
    outcome: SessionOutcome,
    stats: SessionStats,
    /// Most recent non-empty text a round produced, retracted or not.
    last_text: Option<String>,
    started: Instant,
    deadline: tokio::time::Instant,
}

impl Session {
    async fn run(mut self, first: OpenedStream) {
        let result = match tokio::time::timeout_at(self.deadline, self.drive(first)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session = %self.id, "Session deadline exceeded");
                Err(SessionError::DeadlineExceeded(
                    self.inner.session_timeout.as_secs(),
                ))
            }
        };

        let Session {
            id,
            inner,
            emitter,
            outcome,
            stats,
            started,
            ..
        } = self;

        let summary = SessionOutcome {
            usage: outcome.usage,
            tools_used: outcome.tools_used.clone(),
            ..SessionOutcome::default()
        };
        let result = match result {
            Ok(()) => emitter.finish(outcome).await,
            Err(e) => {
                emitter.fail(&e).await;
                Err(e)
            }
        };

        match &result {
            Ok(()) => info!(
                session = %id,
                backend_calls = stats.backend_calls,
                tool_calls = stats.tool_calls,
                duration_ms = started.elapsed().as_millis() as u64,
                "Session finished"
            ),
            Err(SessionError::ClientDisconnected) => {
                info!(session = %id, "Client disconnected; session stopped")
            }
            Err(e) => warn!(session = %id, error = %e, "Session aborted"),
        }
        inner.record(&id, started, result.as_ref().err(), &stats, &summary);
    }

    async fn drive(&mut self, first: OpenedStream) -> Result<(), SessionError> {
        self.emitter.progress(THINKING).await?;

        let mut opened = Some(first);
        let mut round: u32 = 1;
        loop {
            let blocks = self.stream_round(round, opened.take()).await?;
            let (stop, usage) = blocks.stop.unwrap_or((StopReason::Finished, None));
            if let Some(usage) = usage {
                self.outcome.usage.add(usage);
            }
            let text = blocks.text();
            if !text.is_empty() {
                self.last_text = Some(text);
            }
            debug!(
                session = %self.id,
                round,
                stop_reason = ?stop,
                tools = blocks.invocations.len(),
                "Round ended"
            );

            match stop {
                StopReason::ToolRequested if !blocks.invocations.is_empty() => {
                    // Text ahead of a tool call was provisional.
                    self.emitter.clear_text().await?;
                    self.run_tools(round, blocks).await?;

                    if round >= self.inner.max_rounds {
                        warn!(
                            session = %self.id,
                            round,
                            "Round budget exhausted; finalizing with the last text"
                        );
                        return self.emit_last_text_or(BUDGET_FALLBACK).await;
                    }
                    round += 1;
                    self.emitter.progress(ANALYZING).await?;
                }
                stop => {
                    match stop {
                        StopReason::ToolRequested => {
                            warn!(session = %self.id, "Tool use requested without a tool block")
                        }
                        StopReason::LengthLimit => {
                            warn!(session = %self.id, "Response cut off by the token limit")
                        }
                        StopReason::Finished => {}
                    }
                    // Text from earlier rounds was retracted and stays retracted.
                    if blocks.fragments_forwarded == 0 {
                        return self.emitter.text(EMPTY_FALLBACK).await;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Stream one round to completion, restarting it from scratch on a
    /// transient mid-stream failure while attempts remain.
    async fn stream_round(
        &mut self,
        round: u32,
        opened: Option<OpenedStream>,
    ) -> Result<RoundBlocks, SessionError> {
        debug!(session = %self.id, round, "Round started");
        let (mut stream, mut attempts) = match opened {
            Some(opened) => opened,
            None => self.open_round().await?,
        };

        loop {
            match self.consume(&mut stream).await {
                Ok(blocks) => return Ok(blocks),
                Err(RoundFailure::Disconnected) => return Err(SessionError::ClientDisconnected),
                Err(RoundFailure::Backend(e)) => {
                    (stream, attempts) = self.reopen(round, attempts, e).await?;
                }
            }
        }
    }

    async fn open_round(&mut self) -> Result<OpenedStream, SessionError> {
        let opened = tokio::select! {
            biased;
            _ = self.emitter.closed() => return Err(SessionError::ClientDisconnected),
            opened = self.inner.client.open(&self.messages) => opened,
        };
        match opened {
            Ok((stream, attempts)) => {
                self.stats.backend_calls += attempts;
                Ok((stream, attempts))
            }
            Err((e, attempts)) => {
                self.stats.backend_calls += attempts;
                Err(SessionError::from_provider(e, attempts))
            }
        }
    }

    async fn reopen(
        &mut self,
        round: u32,
        mut attempts: u32,
        mut error: ProviderError,
    ) -> Result<OpenedStream, SessionError> {
        loop {
            let retry = self.inner.client.retry();
            if !retry.should_retry(&error, attempts) {
                return Err(SessionError::from_provider(error, attempts));
            }
            let delay = retry.backoff(attempts, &error);
            warn!(
                session = %self.id,
                round,
                attempt = attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Round failed; restarting it"
            );

            self.emitter.clear_text().await?;
            tokio::select! {
                biased;
                _ = self.emitter.closed() => return Err(SessionError::ClientDisconnected),
                _ = tokio::time::sleep(delay) => {}
            }

            attempts += 1;
            self.stats.backend_calls += 1;
            match self.inner.client.open_once(&self.messages).await {
                Ok(stream) => return Ok((stream, attempts)),
                Err(e) => error = e,
            }
        }
    }

    /// Feed the round's events through the assembler, forwarding text
    /// fragments as they arrive.
    async fn consume(&mut self, stream: &mut EventStream) -> Result<RoundBlocks, RoundFailure> {
        let mut state = BlockState::Idle;
        let mut blocks = RoundBlocks::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.emitter.closed() => return Err(RoundFailure::Disconnected),
                next = stream.recv() => next,
            };
            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(RoundFailure::Backend(e)),
                None => {
                    return Err(RoundFailure::Backend(ProviderError::StreamInterrupted(
                        "stream ended before the message stopped".into(),
                    )));
                }
            };

            let (next_state, produced) = step(state, event);
            state = next_state;
            for item in &produced {
                if let Assembled::TextFragment(fragment) = item {
                    self.emitter
                        .text(fragment.as_str())
                        .await
                        .map_err(|_| RoundFailure::Disconnected)?;
                }
                blocks.push(item);
            }
            if blocks.stop.is_some() {
                return Ok(blocks);
            }
        }
    }

    /// Record the assistant turn, run its tools and record their results as
    /// one user turn.
    async fn run_tools(&mut self, round: u32, blocks: RoundBlocks) -> Result<(), SessionError> {
        let RoundBlocks {
            blocks: content,
            invocations,
            ..
        } = blocks;
        self.messages
            .push(Message::with_blocks(Role::Assistant, content));

        for invocation in &invocations {
            if KnownTool::parse(&invocation.name).is_some() {
                self.outcome.note_tool_used(&invocation.name);
            }
            self.emitter.tool_call(invocation).await?;
        }

        let remaining = self
            .deadline
            .saturating_duration_since(tokio::time::Instant::now());
        let timeout = self.inner.tool_timeout.min(remaining);
        info!(
            session = %self.id,
            round,
            tools = invocations.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Dispatching tools"
        );

        let mut pending =
            self.inner
                .executor
                .dispatch(invocations.clone(), self.tool_context.clone(), timeout);

        let mut outcomes: Vec<Option<ToolOutcome>> = vec![None; invocations.len()];
        let mut received = 0;
        while received < invocations.len() {
            let next = tokio::select! {
                biased;
                _ = self.emitter.closed() => {
                    info!(session = %self.id, round, "Client gone during tool execution; discarding outcomes");
                    return Err(SessionError::ClientDisconnected);
                }
                next = pending.recv() => next,
            };
            let Some((index, outcome)) = next else {
                break;
            };
            received += 1;
            self.record_outcome(&outcome).await?;
            if let Some(slot) = outcomes.get_mut(index) {
                *slot = Some(outcome);
            }
        }

        let mut results = Vec::with_capacity(invocations.len());
        for (invocation, outcome) in invocations.iter().zip(outcomes) {
            let outcome = match outcome {
                Some(outcome) => outcome,
                None => {
                    let outcome = ToolOutcome::failed(invocation, "Tool produced no outcome", 0);
                    self.record_outcome(&outcome).await?;
                    outcome
                }
            };
            results.push(outcome.to_content_block());
        }
        self.messages.push(Message::with_blocks(Role::User, results));
        Ok(())
    }

    async fn record_outcome(&mut self, outcome: &ToolOutcome) -> Result<(), SessionError> {
        self.stats.tool_calls += 1;
        self.outcome.absorb(outcome);
        self.emitter.tool_call_done(outcome).await
    }

    /// Emit the last text a round produced, or `fallback` if there was none.
    async fn emit_last_text_or(&mut self, fallback: &str) -> Result<(), SessionError> {
        let text = self
            .last_text
            .take()
            .unwrap_or_else(|| fallback.to_string());
        self.emitter.text(text).await
    }
}
