//! Tool catalog: the closed registry of capabilities the model may invoke.
//!
//! Tool identifiers are a compile-time enum ([`KnownTool`]); a name the model
//! produces that matches none of them resolves to [`Resolution::Unknown`]
//! so the executor can answer with a structured error instead of silently
//! doing nothing.

use crate::error::ToolError;
use crate::message::ContentBlock;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Every tool identifier the assistant knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnownTool {
    LookupSecurity,
    SearchDocuments,
    MarketData,
    ReviewDocument,
}

impl KnownTool {
    pub const ALL: [KnownTool; 4] = [
        Self::LookupSecurity,
        Self::SearchDocuments,
        Self::MarketData,
        Self::ReviewDocument,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LookupSecurity => "lookup_security",
            Self::SearchDocuments => "search_documents",
            Self::MarketData => "market_data",
            Self::ReviewDocument => "review_document",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Progress label shown to the user while the tool runs.
    pub fn label(self) -> &'static str {
        match self {
            Self::LookupSecurity => "Looking up security…",
            Self::SearchDocuments => "Searching documents…",
            Self::MarketData => "Fetching market data…",
            Self::ReviewDocument => "Reviewing document…",
        }
    }
}

impl std::fmt::Display for KnownTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation context handed to a handler.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Session the invocation belongs to (for handler-side logging).
    pub session_id: String,
    /// Opaque caller-supplied context from the request.
    pub data: Option<serde_json::Value>,
}

/// An implementation behind one [`KnownTool`].
///
/// Handlers may fail; the executor converts every failure, including a
/// panic, into a [`ToolOutcome`] carrying an error.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the tool. The returned value should be a JSON object.
    async fn invoke(
        &self,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError>;
}

/// Result of looking a model-supplied tool name up in the catalog.
pub enum Resolution {
    Handler(KnownTool, Arc<dyn ToolHandler>),
    /// A known identifier with no handler configured in this deployment.
    NotRegistered(KnownTool),
    Unknown(String),
}

/// Read-only (once built) mapping from known tools to handlers.
#[derive(Default, Clone)]
pub struct ToolCatalog {
    handlers: HashMap<KnownTool, Arc<dyn ToolHandler>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Replaces any existing handler for the same tool.
    pub fn register(&mut self, tool: KnownTool, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(tool, handler);
    }

    pub fn with(mut self, tool: KnownTool, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(tool, handler);
        self
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        match KnownTool::parse(name) {
            Some(tool) => match self.handlers.get(&tool) {
                Some(handler) => Resolution::Handler(tool, handler.clone()),
                None => Resolution::NotRegistered(tool),
            },
            None => Resolution::Unknown(name.to_string()),
        }
    }

    /// Definitions for every registered tool, in a stable order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        KnownTool::ALL
            .into_iter()
            .filter_map(|tool| {
                self.handlers.get(&tool).map(|h| ToolDefinition {
                    name: tool.as_str().to_string(),
                    description: h.description().to_string(),
                    parameters: h.parameters_schema(),
                })
            })
            .collect()
    }

    pub fn registered(&self) -> Vec<KnownTool> {
        KnownTool::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A completed tool-use block, waiting to be executed exactly once.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub started_at: Instant,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            started_at: Instant::now(),
        }
    }

    /// Progress label for the tool-call notice.
    pub fn label(&self) -> String {
        match KnownTool::parse(&self.name) {
            Some(tool) => tool.label().to_string(),
            None => format!("Running {}…", self.name),
        }
    }

    /// The block recorded in the assistant turn that requested this call.
    pub fn to_content_block(&self) -> ContentBlock {
        ContentBlock::ToolUse {
            id: self.id.clone(),
            name: self.name.clone(),
            input: self.input.clone(),
        }
    }
}

// Equality ignores `started_at`.
impl PartialEq for ToolInvocation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name && self.input == other.input
    }
}

/// Provenance record backing a tool outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub title: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Large payload produced by a tool, delivered to the caller only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideArtifact {
    pub filename: String,
    pub media_type: String,
    /// Base64-encoded content.
    pub data: String,
}

/// The caller-facing projection of a tool outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallerPayload {
    pub citations: Vec<Citation>,
    pub artifact: Option<SideArtifact>,
}

/// The result of one invocation. Always produced, success or failure.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub tool_use_id: String,
    pub name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Small payload fed back into the message list.
    pub for_model: serde_json::Value,
    /// Payload retained for the session outcome.
    pub for_caller: CallerPayload,
}

const ERROR_KEY: &str = "error";
const CITATIONS_KEY: &str = "citations";
const ARTIFACT_KEY: &str = "artifact";

impl ToolOutcome {
    /// An outcome for an invocation that failed before or during execution.
    pub fn failed(invocation: &ToolInvocation, error: impl Into<String>, duration_ms: u64) -> Self {
        let error = error.into();
        Self {
            tool_use_id: invocation.id.clone(),
            name: invocation.name.clone(),
            duration_ms,
            for_model: serde_json::json!({ "error": error }),
            error: Some(error),
            for_caller: CallerPayload::default(),
        }
    }

    /// Split a raw handler result into its model and caller projections.
    ///
    /// Reserved keys: `error` marks a failed call, `citations` is lifted
    /// into the caller payload (and kept for the model), and `artifact` is
    /// replaced by a short acknowledgement in the model projection.
    pub fn from_result(invocation: &ToolInvocation, raw: serde_json::Value, duration_ms: u64) -> Self {
        match project(&invocation.name, raw) {
            Ok((for_model, for_caller, error)) => Self {
                tool_use_id: invocation.id.clone(),
                name: invocation.name.clone(),
                duration_ms,
                error,
                for_model,
                for_caller,
            },
            Err(e) => Self::failed(invocation, e.to_string(), duration_ms),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The block appended to the tool-results user turn.
    pub fn to_content_block(&self) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.tool_use_id.clone(),
            content: self.for_model.to_string(),
            is_error: self.is_error(),
        }
    }
}

type Projection = (serde_json::Value, CallerPayload, Option<String>);

fn project(tool_name: &str, raw: serde_json::Value) -> std::result::Result<Projection, ToolError> {
    let malformed = |reason: String| ToolError::MalformedResult {
        tool_name: tool_name.to_string(),
        reason,
    };

    let serde_json::Value::Object(mut fields) = raw else {
        return Err(malformed("expected a JSON object".into()));
    };

    let error = match fields.get(ERROR_KEY) {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => {
            Some("tool reported an unspecified error".to_string())
        }
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    let citations: Vec<Citation> = match fields.get(CITATIONS_KEY) {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| malformed(format!("invalid citations: {e}")))?,
    };

    let artifact = match fields.remove(ARTIFACT_KEY) {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => {
            let artifact: SideArtifact = serde_json::from_value(value)
                .map_err(|e| malformed(format!("invalid artifact: {e}")))?;
            fields.insert(
                ARTIFACT_KEY.into(),
                serde_json::json!({
                    "filename": artifact.filename,
                    "mediaType": artifact.media_type,
                    "sizeBytes": artifact.data.len() / 4 * 3,
                    "note": "The full file will be delivered to the user after this response."
                }),
            );
            Some(artifact)
        }
    };

    Ok((
        serde_json::Value::Object(fields),
        CallerPayload {
            citations,
            artifact,
        },
        error,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn invoke(
            &self,
            input: serde_json::Value,
            _context: &ToolContext,
        ) -> std::result::Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({ "echo": input }))
        }
    }

    fn invocation(name: &str) -> ToolInvocation {
        ToolInvocation::new("toolu_1", name, serde_json::json!({}))
    }

    #[test]
    fn known_tool_names_roundtrip() {
        for tool in KnownTool::ALL {
            assert_eq!(KnownTool::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(KnownTool::parse("lookup_securty"), None);
    }

    #[test]
    fn catalog_resolution() {
        let catalog = ToolCatalog::new().with(KnownTool::LookupSecurity, Arc::new(EchoTool));
        assert!(matches!(
            catalog.resolve("lookup_security"),
            Resolution::Handler(KnownTool::LookupSecurity, _)
        ));
        assert!(matches!(
            catalog.resolve("market_data"),
            Resolution::NotRegistered(KnownTool::MarketData)
        ));
        assert!(matches!(catalog.resolve("rm_rf"), Resolution::Unknown(n) if n == "rm_rf"));
    }

    #[test]
    fn catalog_definitions_only_registered() {
        let catalog = ToolCatalog::new()
            .with(KnownTool::MarketData, Arc::new(EchoTool))
            .with(KnownTool::LookupSecurity, Arc::new(EchoTool));
        let names: Vec<_> = catalog.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["lookup_security", "market_data"]);
    }

    #[test]
    fn outcome_plain_result() {
        let outcome =
            ToolOutcome::from_result(&invocation("market_data"), serde_json::json!({"nav": 101.5}), 12);
        assert!(!outcome.is_error());
        assert_eq!(outcome.for_model["nav"], 101.5);
        assert_eq!(outcome.duration_ms, 12);
    }

    #[test]
    fn outcome_error_key() {
        let outcome = ToolOutcome::from_result(
            &invocation("lookup_security"),
            serde_json::json!({"error": "ISIN not found"}),
            3,
        );
        assert_eq!(outcome.error.as_deref(), Some("ISIN not found"));
        match outcome.to_content_block() {
            ContentBlock::ToolResult { is_error, .. } => assert!(is_error),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn outcome_malformed_result() {
        let outcome =
            ToolOutcome::from_result(&invocation("market_data"), serde_json::json!([1, 2, 3]), 1);
        assert!(outcome.error.unwrap().contains("expected a JSON object"));

        let outcome = ToolOutcome::from_result(
            &invocation("search_documents"),
            serde_json::json!({"citations": "not a list"}),
            1,
        );
        assert!(outcome.error.unwrap().contains("invalid citations"));
    }

    #[test]
    fn outcome_projects_artifact_away_from_model() {
        let outcome = ToolOutcome::from_result(
            &invocation("review_document"),
            serde_json::json!({
                "summary": "Two clauses updated",
                "artifact": {
                    "filename": "agreement.docx",
                    "mediaType": "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                    "data": "QUJDREVGR0g="
                }
            }),
            40,
        );
        let artifact = outcome.for_caller.artifact.as_ref().unwrap();
        assert_eq!(artifact.filename, "agreement.docx");
        assert_eq!(artifact.data, "QUJDREVGR0g=");

        let model_text = outcome.to_content_block();
        let ContentBlock::ToolResult { content, .. } = model_text else {
            panic!("expected tool result");
        };
        assert!(!content.contains("QUJDREVGR0g="));
        assert!(content.contains("agreement.docx"));
        assert!(content.contains("Two clauses updated"));
    }

    #[test]
    fn outcome_lifts_citations() {
        let outcome = ToolOutcome::from_result(
            &invocation("search_documents"),
            serde_json::json!({
                "hits": 1,
                "citations": [{"title": "Prospectus 2024", "source": "doc-17", "excerpt": "fees"}]
            }),
            8,
        );
        assert_eq!(outcome.for_caller.citations.len(), 1);
        assert_eq!(outcome.for_caller.citations[0].source, "doc-17");
        assert!(outcome.for_model.get("citations").is_some());
    }

    #[tokio::test]
    async fn handler_invocation() {
        let catalog = ToolCatalog::new().with(KnownTool::ReviewDocument, Arc::new(EchoTool));
        let Resolution::Handler(_, handler) = catalog.resolve("review_document") else {
            panic!("expected handler");
        };
        let value = handler
            .invoke(serde_json::json!({"x": 1}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(value["echo"]["x"], 1);
    }
}
