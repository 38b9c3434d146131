//! Completion stream client: builds one round's backend request and opens
//! its event stream, retrying transient failures.

use fundwise_config::AppConfig;
use fundwise_core::error::ProviderError;
use fundwise_core::message::Message;
use fundwise_core::provider::{EventStream, Provider, ProviderRequest, ToolDefinition};
use fundwise_providers::RetryPolicy;
use std::sync::Arc;
use tracing::debug;

pub struct CompletionClient {
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    model: String,
    system: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Vec<ToolDefinition>,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn Provider>, config: &AppConfig, tools: Vec<ToolDefinition>) -> Self {
        let system = Some(config.system_prompt.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            provider,
            retry: RetryPolicy::from(&config.retry),
            model: config.model.clone(),
            system,
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            tools,
        }
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn request_for(&self, messages: &[Message]) -> ProviderRequest {
        ProviderRequest {
            model: self.model.clone(),
            system: self.system.clone(),
            messages: messages.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools.clone(),
        }
    }

    /// One attempt, no retry.
    pub async fn open_once(&self, messages: &[Message]) -> Result<EventStream, ProviderError> {
        self.provider.stream(self.request_for(messages)).await
    }

    /// Open a round's stream, retrying transient failures. Returns the
    /// stream or the last error, each with the number of attempts made.
    pub async fn open(&self, messages: &[Message]) -> Result<(EventStream, u32), (ProviderError, u32)> {
        let provider = &self.provider;
        let request = self.request_for(messages);
        debug!(
            provider = provider.name(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Opening completion stream"
        );
        self.retry
            .execute(|| provider.stream(request.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, text_round};
    use fundwise_config::RetryConfig;

    fn config() -> AppConfig {
        AppConfig {
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                multiplier: 2.0,
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn request_carries_system_and_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let tools = vec![ToolDefinition {
            name: "market_data".into(),
            description: "prices".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let client = CompletionClient::new(provider, &config(), tools);
        let request = client.request_for(&[Message::user("Hej")]);
        assert!(request.system.unwrap().contains("fundwise"));
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.max_tokens, Some(4096));
    }

    #[tokio::test]
    async fn transient_open_failures_are_retried() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![text_round(&["Hej!"])])
                .fail_first(2, ProviderError::Overloaded("busy".into())),
        );
        let client = CompletionClient::new(provider.clone(), &config(), vec![]);
        let (_stream, attempts) = client.open(&[Message::user("Hej")]).await.unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_open_failure_is_not_retried() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![text_round(&["Hej!"])])
                .fail_first(1, ProviderError::AuthenticationFailed("bad key".into())),
        );
        let client = CompletionClient::new(provider.clone(), &config(), vec![]);
        let (err, attempts) = client.open(&[Message::user("Hej")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(attempts, 1);
        assert_eq!(provider.calls(), 1);
    }
}
