//! Session outcome: what the caller receives once a session ends.

use crate::provider::Usage;
use crate::tool::{Citation, SideArtifact, ToolOutcome};
use serde::{Deserialize, Serialize};

/// Accumulated across rounds by the round controller, then moved into the
/// final metadata record. Moving it out is what freezes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    /// Distinct tool names, in first-use order.
    pub tools_used: Vec<String>,
    /// Citations in tool-completion order.
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_artifact: Option<SideArtifact>,
    #[serde(default)]
    pub usage: Usage,
}

impl SessionOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_tool_used(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }

    /// Fold one completed outcome in. A later artifact replaces an earlier one.
    pub fn absorb(&mut self, outcome: &ToolOutcome) {
        self.citations
            .extend(outcome.for_caller.citations.iter().cloned());
        if let Some(artifact) = &outcome.for_caller.artifact {
            self.side_artifact = Some(artifact.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolInvocation;

    #[test]
    fn tools_used_is_deduplicated() {
        let mut outcome = SessionOutcome::new();
        outcome.note_tool_used("lookup_security");
        outcome.note_tool_used("market_data");
        outcome.note_tool_used("lookup_security");
        assert_eq!(outcome.tools_used, vec!["lookup_security", "market_data"]);
    }

    #[test]
    fn absorb_collects_citations_and_artifact() {
        let invocation = ToolInvocation::new("t1", "review_document", serde_json::json!({}));
        let tool_outcome = ToolOutcome::from_result(
            &invocation,
            serde_json::json!({
                "citations": [{"title": "Policy", "source": "p-1"}],
                "artifact": {"filename": "a.pdf", "mediaType": "application/pdf", "data": "AAAA"}
            }),
            5,
        );

        let mut outcome = SessionOutcome::new();
        outcome.absorb(&tool_outcome);
        assert_eq!(outcome.citations.len(), 1);
        assert_eq!(outcome.side_artifact.as_ref().unwrap().filename, "a.pdf");

        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("toolsUsed").is_some());
        assert!(json.get("sideArtifact").is_some());
    }
}
