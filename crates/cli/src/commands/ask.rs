//! `fundwise ask`: run one session and render its record stream.

use fundwise_agent::{Orchestrator, StreamRecord};
use fundwise_config::AppConfig;
use fundwise_core::message::SessionRequest;
use fundwise_telemetry::TelemetryRecorder;
use std::io::{IsTerminal, Write};
use std::sync::Arc;
use tracing::debug;

pub async fn run(message: String, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.has_api_key() {
        return Err("No API key configured. Set ANTHROPIC_API_KEY or FUNDWISE_API_KEY.".into());
    }

    let provider = fundwise_providers::build_from_config(&config)?;
    let catalog = Arc::new(fundwise_tools::default_catalog(&config)?);
    let orchestrator = Orchestrator::new(&config, provider, catalog, TelemetryRecorder::disabled());

    let mut handle = orchestrator.start(SessionRequest::new(message)).await?;
    debug!(session = %handle.id, "Session started");

    let stdout = std::io::stdout();
    let mode = if json {
        RenderMode::Json
    } else if stdout.is_terminal() {
        RenderMode::Live
    } else {
        RenderMode::Buffered
    };
    let mut renderer = Renderer::new(stdout.lock(), mode);

    let mut count = 0usize;
    while let Some(record) = handle.records.recv().await {
        renderer.render(&record)?;
        count += 1;
    }
    debug!(session = %handle.id, records = count, "Session stream closed");

    match renderer.finish()? {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderMode {
    /// Raw records, one JSON object per line.
    Json,
    /// Text printed as it arrives; retracted text is erased with ANSI codes.
    Live,
    /// Text held back until it is durable. Used when stdout is not a terminal.
    Buffered,
}

/// Turns stream records into terminal output. Status lines go to stderr.
struct Renderer<W: Write> {
    out: W,
    mode: RenderMode,
    /// Text shown (or held) since the last retraction.
    pending: String,
    error: Option<String>,
}

impl<W: Write> Renderer<W> {
    fn new(out: W, mode: RenderMode) -> Self {
        Self {
            out,
            mode,
            pending: String::new(),
            error: None,
        }
    }

    fn render(&mut self, record: &StreamRecord) -> std::io::Result<()> {
        if self.mode == RenderMode::Json {
            let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
            writeln!(self.out, "{line}")?;
            if let StreamRecord::Error(e) = record {
                self.error = Some(e.message.clone());
            }
            return self.out.flush();
        }

        match record {
            StreamRecord::Progress(label) => eprintln!("  {label}"),
            StreamRecord::Text(fragment) => {
                self.pending.push_str(fragment);
                if self.mode == RenderMode::Live {
                    write!(self.out, "{fragment}")?;
                }
            }
            StreamRecord::ClearText(_) => self.retract()?,
            StreamRecord::ToolCall(notice) => eprintln!("  -> {}", notice.label),
            StreamRecord::ToolCallDone(done) => {
                eprintln!("  <- {} ({} ms)", done.name, done.duration_ms)
            }
            StreamRecord::Meta(meta) => {
                self.commit()?;
                if !meta.citations.is_empty() {
                    writeln!(self.out)?;
                    writeln!(self.out, "Sources:")?;
                    for (i, c) in meta.citations.iter().enumerate() {
                        match &c.url {
                            Some(url) => writeln!(self.out, "  [{}] {} ({}) {url}", i + 1, c.title, c.source)?,
                            None => writeln!(self.out, "  [{}] {} ({})", i + 1, c.title, c.source)?,
                        }
                    }
                }
                if let Some(artifact) = &meta.side_artifact {
                    writeln!(self.out, "Artifact: {} ({})", artifact.filename, artifact.media_type)?;
                }
            }
            StreamRecord::Done(_) => {}
            StreamRecord::Error(e) => {
                self.commit()?;
                eprintln!("  error ({}): {}", e.status, e.message);
                self.error = Some(e.message.clone());
            }
        }
        self.out.flush()
    }

    /// Drop the pending text, erasing it from the terminal in live mode.
    fn retract(&mut self) -> std::io::Result<()> {
        if self.mode == RenderMode::Live && !self.pending.is_empty() {
            let lines = self.pending.matches('\n').count();
            if lines > 0 {
                write!(self.out, "\x1b[{lines}F")?;
            }
            write!(self.out, "\r\x1b[0J")?;
        }
        self.pending.clear();
        Ok(())
    }

    /// The pending text is final: print it if it was held back.
    fn commit(&mut self) -> std::io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.mode == RenderMode::Buffered {
            write!(self.out, "{}", self.pending)?;
        }
        if !self.pending.ends_with('\n') {
            writeln!(self.out)?;
        }
        self.pending.clear();
        Ok(())
    }

    /// Flush remaining output; returns the session error, if any.
    fn finish(mut self) -> std::io::Result<Option<String>> {
        self.commit()?;
        self.out.flush()?;
        Ok(self.error)
    }
}
