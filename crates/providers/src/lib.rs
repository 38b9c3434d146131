//! Completion backend implementations for fundwise.
//!
//! All providers implement the `fundwise_core::Provider` trait. The
//! orchestrator only ever sees `Arc<dyn Provider>`.

pub mod anthropic;
pub mod retry;

use fundwise_config::AppConfig;
use fundwise_core::{Provider, ProviderError};
use std::sync::Arc;

pub use anthropic::AnthropicProvider;
pub use retry::RetryPolicy;

/// Build the configured backend.
///
/// Fails with `NotConfigured` when no API key is available.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            ProviderError::NotConfigured(
                "no API key: set FUNDWISE_API_KEY or ANTHROPIC_API_KEY".into(),
            )
        })?;

    let provider = AnthropicProvider::new(api_key)?.with_base_url(&config.base_url);
    tracing::debug!(provider = provider.name(), base_url = %config.base_url, "Provider ready");
    Ok(Arc::new(provider))
}
