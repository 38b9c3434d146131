//! # fundwise Core
//!
//! Domain types, traits, and error definitions for the fundwise assistant
//! orchestrator. This crate has **no framework dependencies**: it defines
//! the model that the provider, tool, agent and gateway crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every collaborator boundary is a trait here (`Provider`, `ToolHandler`).
//! Implementations live in their own crates, which keeps the orchestrator
//! testable with scripted stand-ins.

pub mod error;
pub mod message;
pub mod outcome;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, SessionError, StatusClass, ToolError};
pub use message::{Attachment, ContentBlock, HistoryTurn, Message, Role, SessionRequest};
pub use outcome::SessionOutcome;
pub use provider::{
    BlockKind, Delta, EventStream, Provider, ProviderRequest, StopReason, StreamEvent,
    ToolDefinition, Usage,
};
pub use tool::{
    Citation, KnownTool, Resolution, SideArtifact, ToolCatalog, ToolContext, ToolHandler,
    ToolInvocation, ToolOutcome,
};
