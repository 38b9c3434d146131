//! Data model for session telemetry records and usage snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One finished orchestration session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    /// Short description of why the session failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    /// Backend calls made, retries included.
    pub backend_calls: u32,
    pub tools_used: Vec<String>,
    pub tool_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl SessionRecord {
    pub fn new(duration_ms: u64, success: bool, error_summary: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            finished_at: Utc::now(),
            duration_ms,
            success,
            error_summary,
            backend_calls: 0,
            tools_used: Vec::new(),
            tool_calls: 0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Point-in-time aggregate served by `/v1/usage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub sessions: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub backend_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub avg_duration_ms: u64,
    /// Invocation counts per tool name.
    pub tool_calls: BTreeMap<String, u64>,
    /// Records lost because the queue was full.
    pub dropped_records: u64,
    /// Most recent sessions, newest first.
    pub recent: Vec<SessionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_camel_case() {
        let mut record = SessionRecord::new(1200, false, Some("backend overloaded".into()))
            .with_session_id("s-42");
        record.input_tokens = 100;
        record.output_tokens = 20;

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "s-42");
        assert_eq!(json["durationMs"], 1200);
        assert_eq!(json["errorSummary"], "backend overloaded");
        assert_eq!(record.total_tokens(), 120);
    }

    #[test]
    fn successful_record_omits_error() {
        let json = serde_json::to_value(SessionRecord::new(5, true, None)).unwrap();
        assert!(json.get("errorSummary").is_none());
    }
}
