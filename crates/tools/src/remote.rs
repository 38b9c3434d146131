//! Remote tool handler: forwards an invocation to an HTTP endpoint.
//!
//! Wire contract: `POST {endpoint}` with `{"input": ..., "context": ...}`,
//! answered by a JSON object. The object may use the reserved `error`,
//! `citations` and `artifact` keys.

use async_trait::async_trait;
use fundwise_config::ToolEndpointConfig;
use fundwise_core::error::ToolError;
use fundwise_core::tool::{KnownTool, ToolContext, ToolHandler};
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const ERROR_BODY_SNIPPET: usize = 300;

pub struct RemoteTool {
    tool: KnownTool,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl RemoteTool {
    pub fn new(tool: KnownTool, config: &ToolEndpointConfig) -> Result<Self, ToolError> {
        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Unavailable(format!("{tool}: HTTP client: {e}")))?;

        Ok(Self {
            tool,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            timeout,
            client,
        })
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.tool.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for RemoteTool {
    fn description(&self) -> &str {
        crate::schemas::description(self.tool)
    }

    fn parameters_schema(&self) -> serde_json::Value {
        crate::schemas::schema(self.tool)
    }

    async fn invoke(
        &self,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        if !input.is_object() {
            return Err(ToolError::InvalidArguments(format!(
                "{}: input must be a JSON object",
                self.tool
            )));
        }

        debug!(tool = %self.tool, endpoint = %self.endpoint, session = %context.session_id, "Calling remote tool");

        let body = serde_json::json!({
            "input": input,
            "context": context.data,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout {
                    tool_name: self.tool.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                ToolError::Unavailable(format!("{}: {e}", self.tool))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(ERROR_BODY_SNIPPET).collect();
            return Err(self.failed(format!("HTTP {}: {snippet}", status.as_u16())));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ToolError::MalformedResult {
                tool_name: self.tool.to_string(),
                reason: format!("response is not JSON: {e}"),
            })
    }
}
