//! Shared error taxonomy for the admitflow LLM call layer.
//!
//! This crate provides the foundational types used across the other admitflow crates:
//! - `LlmError`: unified error taxonomy for provider calls
//! - `ProviderFailure`: one provider's terminal failure inside an aggregate error
//! - `truncate_body`: bounded rendering of provider response bodies for diagnostics

use std::fmt;

/// Maximum number of characters of a provider response body kept in an error.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Unified error type for all admitflow LLM calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    // === Retryable provider errors ===
    #[error("Rate limited by {provider} (HTTP {status}): {body}")]
    RateLimited {
        provider: String,
        status: u16,
        body: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Provider {provider} returned HTTP {status}: {body}")]
    ServerError {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Network error talking to {provider}: {message}")]
    NetworkError { provider: String, message: String },

    #[error("Model '{model}' on {provider} was still loading after waiting {waited_secs}s")]
    ModelLoadTimeout {
        provider: String,
        model: String,
        waited_secs: u64,
    },

    // === Non-retryable provider errors ===
    #[error("Authentication failed for provider {provider} (HTTP {status}): {body}")]
    AuthError {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Configuration error for {provider}: {message}")]
    ConfigurationError { provider: String, message: String },

    #[error("Malformed response from {provider}{}: {message}", status_suffix(.status))]
    MalformedResponse {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    // === Caller errors ===
    #[error("Invalid completion request: {0}")]
    InvalidRequest(String),

    // === Aggregate ===
    #[error("All providers failed: {}", summarize(.failures))]
    Exhausted { failures: Vec<ProviderFailure> },
}

impl LlmError {
    /// Returns `true` if the error is transient and the same provider may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::ServerError { .. }
                | LlmError::Timeout { .. }
                | LlmError::NetworkError { .. }
                | LlmError::ModelLoadTimeout { .. }
        )
    }

    /// Returns `true` if another provider is worth trying after this error.
    ///
    /// Caller mistakes and aggregate failures never move to a fallback.
    pub fn allows_fallback(&self) -> bool {
        !matches!(
            self,
            LlmError::InvalidRequest(_) | LlmError::Exhausted { .. }
        )
    }

    /// The provider that produced the error, if the error belongs to one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            LlmError::RateLimited { provider, .. }
            | LlmError::ServerError { provider, .. }
            | LlmError::Timeout { provider, .. }
            | LlmError::NetworkError { provider, .. }
            | LlmError::ModelLoadTimeout { provider, .. }
            | LlmError::AuthError { provider, .. }
            | LlmError::ConfigurationError { provider, .. }
            | LlmError::MalformedResponse { provider, .. } => Some(provider),
            LlmError::InvalidRequest(_) | LlmError::Exhausted { .. } => None,
        }
    }

    /// The HTTP status the provider answered with, when there was one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            LlmError::RateLimited { status, .. }
            | LlmError::ServerError { status, .. }
            | LlmError::AuthError { status, .. } => Some(*status),
            LlmError::MalformedResponse { status, .. } => *status,
            LlmError::ModelLoadTimeout { .. } => Some(503),
            _ => None,
        }
    }

    /// Short stable label used in logs and aggregate summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::RateLimited { .. } => "rate_limited",
            LlmError::ServerError { .. } => "server_error",
            LlmError::Timeout { .. } => "timeout",
            LlmError::NetworkError { .. } => "network_error",
            LlmError::ModelLoadTimeout { .. } => "model_load_timeout",
            LlmError::AuthError { .. } => "auth_error",
            LlmError::ConfigurationError { .. } => "configuration_error",
            LlmError::MalformedResponse { .. } => "malformed_response",
            LlmError::InvalidRequest(_) => "invalid_request",
            LlmError::Exhausted { .. } => "exhausted",
        }
    }
}

/// A convenience alias for `Result<T, LlmError>`.
pub type Result<T> = std::result::Result<T, LlmError>;

// ---------------------------------------------------------------------------
// ProviderFailure: one entry of an aggregate error
// ---------------------------------------------------------------------------

/// Terminal failure of a single provider profile during one invocation.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub model: String,
    pub attempts: u32,
    pub error: LlmError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts == 0 {
            return write!(f, "{}/{} not attempted: {}", self.provider, self.model, self.error);
        }
        write!(
            f,
            "{}/{} after {} attempt{}: {}",
            self.provider,
            self.model,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.error
        )
    }
}

fn summarize(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no provider was attempted".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Cut a response body down to [`MAX_ERROR_BODY_CHARS`] characters, marking the cut.
pub fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}…[truncated]", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
