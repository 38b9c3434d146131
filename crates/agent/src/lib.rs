//! The conversation orchestrator: the heart of fundwise.
//!
//! A session follows a bounded **stream → act → feed back** cycle:
//!
//! 1. **Build context** from the request and its history
//! 2. **Stream a round** from the backend, forwarding text as it arrives
//! 3. **If tools were requested**: retract the provisional text, run the
//!    tools concurrently, append their results, and stream the next round
//! 4. **Otherwise** emit the session metadata and the terminal marker
//!
//! The cycle ends when a round finishes without requesting tools, or when
//! the round budget is spent.

pub mod assembler;
pub mod completion;
pub mod context;
pub mod emitter;
pub mod executor;
pub mod orchestrator;
pub mod stream_event;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use assembler::{Assembled, BlockState, RoundBlocks};
pub use completion::CompletionClient;
pub use context::ContextBuilder;
pub use emitter::EventEmitter;
pub use executor::ToolExecutor;
pub use orchestrator::{Orchestrator, SessionHandle};
pub use stream_event::{ErrorRecord, MetaRecord, StreamRecord, ToolCallDone, ToolCallNotice};
