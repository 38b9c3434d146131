//! Block assembler: reduces low-level stream events into complete blocks.
//!
//! The accumulator is an explicit state value passed through [`step`], so the
//! reduction is a pure function of (state, event) and can be tested without
//! a live stream. Text fragments are surfaced as soon as they arrive; tool
//! input fragments are buffered and only surface as a finished
//! [`ToolInvocation`].

use fundwise_core::message::ContentBlock;
use fundwise_core::provider::{BlockKind, Delta, StopReason, StreamEvent, Usage};
use fundwise_core::tool::ToolInvocation;
use tracing::{trace, warn};

/// The one open block, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BlockState {
    #[default]
    Idle,
    AccumulatingText(String),
    AccumulatingTool {
        id: String,
        name: String,
        json: String,
    },
}

/// What a step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    /// A text fragment to forward immediately.
    TextFragment(String),
    /// A finished, non-empty text block.
    Text(String),
    /// A finished tool-use block.
    Tool(ToolInvocation),
    /// The backend ended the round.
    Stopped {
        reason: StopReason,
        usage: Option<Usage>,
    },
}

/// Advance the assembler by one event.
pub fn step(state: BlockState, event: StreamEvent) -> (BlockState, Vec<Assembled>) {
    match event {
        StreamEvent::BlockStart { block } => {
            let mut out = Vec::new();
            // A start while a block is open means the backend skipped a stop.
            if state != BlockState::Idle {
                warn!("Block started before the previous block stopped; closing it");
                out.extend(close(state));
            }
            let next = match block {
                BlockKind::Text => BlockState::AccumulatingText(String::new()),
                BlockKind::ToolUse { id, name } => BlockState::AccumulatingTool {
                    id,
                    name,
                    json: String::new(),
                },
            };
            (next, out)
        }

        StreamEvent::Delta {
            delta: Delta::Text(fragment),
        } => match state {
            BlockState::AccumulatingText(mut text) => {
                text.push_str(&fragment);
                let out = if fragment.is_empty() {
                    vec![]
                } else {
                    vec![Assembled::TextFragment(fragment)]
                };
                (BlockState::AccumulatingText(text), out)
            }
            BlockState::Idle => {
                // Text without a start: open one implicitly.
                let out = if fragment.is_empty() {
                    vec![]
                } else {
                    vec![Assembled::TextFragment(fragment.clone())]
                };
                (BlockState::AccumulatingText(fragment), out)
            }
            tool @ BlockState::AccumulatingTool { .. } => {
                trace!("Ignoring text delta inside a tool block");
                (tool, vec![])
            }
        },

        StreamEvent::Delta {
            delta: Delta::ToolInput(fragment),
        } => match state {
            BlockState::AccumulatingTool { id, name, mut json } => {
                json.push_str(&fragment);
                (BlockState::AccumulatingTool { id, name, json }, vec![])
            }
            other => {
                trace!("Ignoring tool input delta outside a tool block");
                (other, vec![])
            }
        },

        StreamEvent::BlockStop => (BlockState::Idle, close(state)),

        StreamEvent::MessageStop { stop_reason, usage } => {
            let mut out = close(state);
            out.push(Assembled::Stopped {
                reason: stop_reason,
                usage,
            });
            (BlockState::Idle, out)
        }
    }
}

/// Finish the open block. Blank text is dropped; malformed tool JSON
/// degrades to an empty object.
fn close(state: BlockState) -> Vec<Assembled> {
    match state {
        BlockState::Idle => vec![],
        BlockState::AccumulatingText(text) => {
            if text.trim().is_empty() {
                vec![]
            } else {
                vec![Assembled::Text(text)]
            }
        }
        BlockState::AccumulatingTool { id, name, json } => {
            let input = parse_tool_input(&name, &json);
            vec![Assembled::Tool(ToolInvocation::new(id, name, input))]
        }
    }
}

fn parse_tool_input(name: &str, json: &str) -> serde_json::Value {
    if json.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            warn!(tool = %name, "Malformed tool input JSON; using an empty object");
            serde_json::json!({})
        }
    }
}

/// Everything one round produced, collected from the assembler's output.
#[derive(Debug, Default)]
pub struct RoundBlocks {
    /// All completed blocks, in stream order.
    pub blocks: Vec<ContentBlock>,
    pub invocations: Vec<ToolInvocation>,
    /// Fragments forwarded to the client this round.
    pub fragments_forwarded: usize,
    pub stop: Option<(StopReason, Option<Usage>)>,
}

impl RoundBlocks {
    /// Record one assembled item.
    pub fn push(&mut self, item: &Assembled) {
        match item {
            Assembled::TextFragment(_) => self.fragments_forwarded += 1,
            Assembled::Text(text) => self.blocks.push(ContentBlock::text(text.clone())),
            Assembled::Tool(invocation) => {
                self.blocks.push(invocation.to_content_block());
                self.invocations.push(invocation.clone());
            }
            Assembled::Stopped { reason, usage } => self.stop = Some((*reason, *usage)),
        }
    }

    /// Concatenated text of the round's completed text blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
