//! Client-visible stream records.
//!
//! Each record serializes to a single-key JSON object, which the gateway
//! forwards as one SSE `data:` line:
//! - `progress`     : a status label
//! - `text`         : a text fragment
//! - `clearText`    : retract the text shown so far in this round
//! - `toolCall`     : a tool is starting
//! - `toolCallDone` : that tool finished
//! - `meta`         : citations, tools used and the side artifact
//! - `done`         : the session finished normally
//! - `error`        : the session aborted

use fundwise_core::error::{SessionError, StatusClass};
use fundwise_core::outcome::SessionOutcome;
use fundwise_core::tool::{Citation, SideArtifact, ToolInvocation, ToolOutcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamRecord {
    Progress(String),
    Text(String),
    ClearText(bool),
    ToolCall(ToolCallNotice),
    ToolCallDone(ToolCallDone),
    Meta(MetaRecord),
    Done(bool),
    Error(ErrorRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallNotice {
    pub name: String,
    pub label: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallDone {
    pub name: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRecord {
    pub citations: Vec<Citation>,
    pub tools_used: Vec<String>,
    pub side_artifact: Option<SideArtifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub status: u16,
}

impl StreamRecord {
    pub fn tool_call(invocation: &ToolInvocation) -> Self {
        Self::ToolCall(ToolCallNotice {
            name: invocation.name.clone(),
            label: invocation.label(),
            input: invocation.input.clone(),
        })
    }

    pub fn tool_call_done(outcome: &ToolOutcome) -> Self {
        Self::ToolCallDone(ToolCallDone {
            name: outcome.name.clone(),
            duration_ms: outcome.duration_ms,
        })
    }

    pub fn meta(outcome: SessionOutcome) -> Self {
        Self::Meta(MetaRecord {
            citations: outcome.citations,
            tools_used: outcome.tools_used,
            side_artifact: outcome.side_artifact,
        })
    }

    pub fn error(error: &SessionError) -> Self {
        let status: StatusClass = error.status_class();
        Self::Error(ErrorRecord {
            message: error.to_string(),
            status: status.http_status(),
        })
    }

    /// Record kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Text(_) => "text",
            Self::ClearText(_) => "clearText",
            Self::ToolCall(_) => "toolCall",
            Self::ToolCallDone(_) => "toolCallDone",
            Self::Meta(_) => "meta",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
        }
    }

    /// Whether this record ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }
}
