//! Retry with exponential backoff and jitter.
//!
//! A streaming round cannot resume mid-stream, so callers retry by
//! re-issuing the whole round. [`RetryPolicy::execute`] covers the
//! "open the stream" step; the orchestrator uses [`RetryPolicy::backoff`]
//! directly when a stream fails after it opened.

use fundwise_config::RetryConfig;
use fundwise_core::ProviderError;
use std::future::Future;
use std::time::Duration;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, error: &ProviderError, attempts: u32) -> bool {
        error.is_transient() && attempts < self.max_attempts
    }

    /// Sleep before attempt number `attempts + 1` (1-based `attempts`).
    ///
    /// A rate-limit error carrying `retry_after_secs` is honoured when it
    /// exceeds the computed backoff, still capped at `max_backoff`.
    pub fn backoff(&self, attempts: u32, error: &ProviderError) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16) as i32;
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let jitter_factor = 0.75 + (rand_factor() * 0.5);
        let mut secs = (base * jitter_factor).min(self.max_backoff.as_secs_f64());

        if let ProviderError::RateLimited { retry_after_secs } = error {
            secs = secs
                .max(*retry_after_secs as f64)
                .min(self.max_backoff.as_secs_f64());
        }

        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Execute an async operation with retry.
    ///
    /// Returns the value together with the number of attempts made, or the
    /// last error together with the attempts made.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<(T, u32), (ProviderError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => return Ok((value, attempts)),
                Err(e) => {
                    if !self.should_retry(&e, attempts) {
                        return Err((e, attempts));
                    }

                    let delay = self.backoff(attempts, &e);
                    tracing::warn!(
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
