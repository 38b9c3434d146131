//! Tool executor: runs one round's invocations concurrently.
//!
//! Every invocation yields exactly one [`ToolOutcome`]. Unknown names,
//! handler errors, timeouts and panics all become error outcomes; nothing a
//! handler does can abort its siblings or the round.

use fundwise_core::error::ToolError;
use fundwise_core::tool::{
    Resolution, ToolCatalog, ToolContext, ToolHandler, ToolInvocation, ToolOutcome,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// An outcome tagged with the position of its invocation in the round.
pub type IndexedOutcome = (usize, ToolOutcome);

#[derive(Clone)]
pub struct ToolExecutor {
    catalog: Arc<ToolCatalog>,
}

impl ToolExecutor {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Start every invocation and return the receiver outcomes arrive on,
    /// in completion order.
    ///
    /// Tasks run detached: dropping the receiver does not cancel them, their
    /// outcomes are simply discarded.
    pub fn dispatch(
        &self,
        invocations: Vec<ToolInvocation>,
        context: ToolContext,
        timeout: Duration,
    ) -> mpsc::Receiver<IndexedOutcome> {
        let (tx, rx) = mpsc::channel(invocations.len().max(1));

        for (index, invocation) in invocations.into_iter().enumerate() {
            let resolution = self.catalog.resolve(&invocation.name);
            let context = context.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let outcome = execute_one(resolution, &invocation, context, timeout).await;
                if tx.send((index, outcome)).await.is_err() {
                    debug!(tool = %invocation.name, "Receiver gone; discarding tool outcome");
                }
            });
        }

        rx
    }
}

async fn execute_one(
    resolution: Resolution,
    invocation: &ToolInvocation,
    context: ToolContext,
    timeout: Duration,
) -> ToolOutcome {
    match resolution {
        Resolution::Unknown(name) => {
            warn!(tool = %name, "Model requested an unknown tool");
            ToolOutcome::failed(invocation, ToolError::NotFound(name).to_string(), 0)
        }
        Resolution::NotRegistered(tool) => {
            warn!(tool = %tool, "Model requested a tool with no handler configured");
            ToolOutcome::failed(
                invocation,
                ToolError::Unavailable(tool.to_string()).to_string(),
                0,
            )
        }
        Resolution::Handler(_, handler) => run_handler(handler, invocation, context, timeout).await,
    }
}

async fn run_handler(
    handler: Arc<dyn ToolHandler>,
    invocation: &ToolInvocation,
    context: ToolContext,
    timeout: Duration,
) -> ToolOutcome {
    debug!(tool = %invocation.name, id = %invocation.id, "Running tool");
    let start = Instant::now();

    // The handler runs in its own task so a panic surfaces as a JoinError.
    let input = invocation.input.clone();
    let mut task = tokio::spawn(async move { handler.invoke(input, &context).await });

    let result = tokio::time::timeout(timeout, &mut task).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let outcome = match result {
        Ok(Ok(Ok(raw))) => ToolOutcome::from_result(invocation, raw, duration_ms),
        Ok(Ok(Err(e))) => ToolOutcome::failed(invocation, e.to_string(), duration_ms),
        Ok(Err(join_err)) if join_err.is_panic() => {
            error!(tool = %invocation.name, "Tool handler panicked");
            ToolOutcome::failed(
                invocation,
                format!("Tool {} panicked", invocation.name),
                duration_ms,
            )
        }
        Ok(Err(join_err)) => {
            ToolOutcome::failed(invocation, format!("Tool task ended: {join_err}"), duration_ms)
        }
        Err(_) => {
            task.abort();
            let e = ToolError::Timeout {
                tool_name: invocation.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            };
            ToolOutcome::failed(invocation, e.to_string(), duration_ms)
        }
    };

    match &outcome.error {
        None => info!(tool = %invocation.name, duration_ms, "Tool completed"),
        Some(e) => warn!(tool = %invocation.name, duration_ms, error = %e, "Tool failed"),
    }
    outcome
}
