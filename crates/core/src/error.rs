//! Error types for the fundwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each boundary has its
//! own enum; [`SessionError`] is the taxonomy a caller of the orchestrator
//! actually observes.

use thiserror::Error;

/// The top-level error type for all fundwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Auth, configuration and 4xx request errors are fatal; everything that
    /// smells like load or a flaky connection is transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::Overloaded(_)
            | Self::StreamInterrupted(_)
            | Self::Timeout(_)
            | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500 || *status_code == 408,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Tool not available: {0}")]
    Unavailable(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Malformed tool result from {tool_name}: {reason}")]
    MalformedResult { tool_name: String, reason: String },
}

/// HTTP-style classification of a failed session, used by the gateway to
/// pick a status code and by the in-stream error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    BadInput,
    RateLimited,
    UpstreamUnavailable,
    Internal,
}

impl StatusClass {
    pub fn http_status(self) -> u16 {
        match self {
            Self::BadInput => 400,
            Self::RateLimited => 429,
            Self::UpstreamUnavailable => 503,
            Self::Internal => 502,
        }
    }
}

/// Failures that end an orchestration session.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Empty or invalid request. Raised before any backend call.
    #[error("Invalid request: {0}")]
    Input(String),

    /// Backend kept failing transiently after all retry attempts.
    #[error("Backend unavailable after {attempts} attempt(s): {source}")]
    BackendTransient {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// Auth/config failure at the backend; never retried.
    #[error("Backend rejected the request: {0}")]
    BackendFatal(ProviderError),

    /// The overall session deadline elapsed mid-round.
    #[error("Session exceeded its deadline of {0}s")]
    DeadlineExceeded(u64),

    /// The client went away; no further work is issued.
    #[error("Client disconnected")]
    ClientDisconnected,
}

impl SessionError {
    /// Classify a backend failure once retries are exhausted (or skipped).
    pub fn from_provider(error: ProviderError, attempts: u32) -> Self {
        if error.is_transient() {
            Self::BackendTransient {
                attempts,
                source: error,
            }
        } else {
            Self::BackendFatal(error)
        }
    }

    pub fn status_class(&self) -> StatusClass {
        match self {
            Self::Input(_) => StatusClass::BadInput,
            Self::BackendTransient {
                source: ProviderError::RateLimited { .. },
                ..
            } => StatusClass::RateLimited,
            Self::BackendTransient { .. } | Self::DeadlineExceeded(_) => {
                StatusClass::UpstreamUnavailable
            }
            Self::BackendFatal(_) | Self::ClientDisconnected => StatusClass::Internal,
        }
    }
}
