use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use admitflow_types::LlmError;

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// Closed set of hosted inference providers the call layer can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    OpenAi,
    Gemini,
    HuggingFace,
}

impl ProviderKind {
    /// Fixed resolution order used when no provider is named explicitly.
    pub const PRIORITY: [ProviderKind; 4] = [
        ProviderKind::Groq,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::HuggingFace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::HuggingFace => "huggingface",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::HuggingFace => "mistralai/Mistral-7B-Instruct-v0.3",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::HuggingFace => "https://api-inference.huggingface.co",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(ProviderKind::Groq),
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "huggingface" | "hf" => Ok(ProviderKind::HuggingFace),
            other => Err(LlmError::ConfigurationError {
                provider: other.to_string(),
                message: "unsupported provider (expected groq, openai, gemini or huggingface)"
                    .into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderProfile
// ---------------------------------------------------------------------------

/// Everything needed to call one provider: credentials, model, endpoint and timeout.
///
/// Fields are private; the `with_*` builders consume the profile and return a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    provider: ProviderKind,
    api_key: String,
    model: String,
    base_url: Option<String>,
    endpoint_url: Option<String>,
    timeout_secs: u64,
}

impl ProviderProfile {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    pub fn new(
        provider: ProviderKind,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            provider,
            api_key: api_key.into().trim().to_string(),
            model: if model.trim().is_empty() {
                provider.default_model().to_string()
            } else {
                model.trim().to_string()
            },
            base_url: None,
            endpoint_url: None,
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = non_empty_url(url.into());
        self
    }

    /// Dedicated endpoint that replaces `{base_url}/models/{model}` (HuggingFace only).
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = non_empty_url(url.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model.trim().to_string();
        }
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Configured base URL, or the provider's public default.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Last four characters of the key, for display.
    pub fn redacted_key(&self) -> String {
        if self.api_key.is_empty() {
            return "<missing>".to_string();
        }
        let tail: String = self
            .api_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    }

    /// `provider/model`, used in logs and failure summaries.
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl fmt::Debug for ProviderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderProfile")
            .field("provider", &self.provider)
            .field("api_key", &self.redacted_key())
            .field("model", &self.model)
            .field("base_url", &self.base_url())
            .field("endpoint_url", &self.endpoint_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn non_empty_url(url: String) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ---------------------------------------------------------------------------
// CompletionRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Text => "text",
            ResponseFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

impl CompletionRequest {
    pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
    pub const DEFAULT_TEMPERATURE: f32 = 0.2;
    pub const MAX_TEMPERATURE: f32 = 2.0;

    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_tokens: Self::DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: Self::DEFAULT_TEMPERATURE,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Shorthand for `with_response_format(ResponseFormat::Json)`.
    pub fn json(self) -> Self {
        self.with_response_format(ResponseFormat::Json)
    }

    pub fn wants_json(&self) -> bool {
        self.response_format == ResponseFormat::Json
    }

    /// Reject requests no provider could serve, before anything goes on the wire.
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.prompt.trim().is_empty() {
            return Err(LlmError::InvalidRequest("prompt must not be empty".into()));
        }
        if self.max_output_tokens == 0 {
            return Err(LlmError::InvalidRequest(
                "max_output_tokens must be positive".into(),
            ));
        }
        if !(0.0..=Self::MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(LlmError::InvalidRequest(format!(
                "temperature {} outside [0, {}]",
                self.temperature,
                Self::MAX_TEMPERATURE
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CompletionResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Complete,
    MaxTokens,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    pub text: String,
    pub raw: serde_json::Value,
    pub finish_reason: FinishReason,
    pub provider: ProviderKind,
    pub model: String,
    pub cached: bool,
}

impl CompletionResult {
    /// True when the provider stopped at the token cap and `text` is partial.
    pub fn is_truncated(&self) -> bool {
        self.finish_reason == FinishReason::MaxTokens
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_aliases() {
        assert_eq!("groq".parse::<ProviderKind>().unwrap(), ProviderKind::Groq);
        assert_eq!(" OpenAI ".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert_eq!("hf".parse::<ProviderKind>().unwrap(), ProviderKind::HuggingFace);

        let err = "anthropic".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(
            err,
            LlmError::ConfigurationError { ref provider, .. } if provider == "anthropic"
        ));
    }

    #[test]
    fn provider_kind_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ProviderKind::HuggingFace).unwrap();
        assert_eq!(json, "\"huggingface\"");
        let kind: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
    }

    #[test]
    fn profile_defaults_and_builders() {
        let profile = ProviderProfile::new(ProviderKind::Groq, " gsk_abcdef1234 ", "");
        assert_eq!(profile.api_key(), "gsk_abcdef1234");
        assert_eq!(profile.model(), "llama-3.3-70b-versatile");
        assert_eq!(profile.base_url(), "https://api.groq.com/openai/v1");
        assert_eq!(profile.timeout_secs(), ProviderProfile::DEFAULT_TIMEOUT_SECS);
        assert!(profile.has_credentials());

        let profile = profile
            .with_base_url("http://localhost:9000/v1/")
            .with_timeout_secs(0)
            .with_model("llama-3.1-8b-instant");
        assert_eq!(profile.base_url(), "http://localhost:9000/v1");
        assert_eq!(profile.timeout_secs(), 1);
        assert_eq!(profile.model(), "llama-3.1-8b-instant");
        assert_eq!(profile.label(), "groq/llama-3.1-8b-instant");
    }

    #[test]
    fn profile_debug_redacts_key() {
        let profile =
            ProviderProfile::new(ProviderKind::OpenAi, "sk-secret-value-9876", "gpt-4o-mini");
        let debug = format!("{profile:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("…9876"));

        let empty = ProviderProfile::new(ProviderKind::OpenAi, "", "gpt-4o-mini");
        assert!(!empty.has_credentials());
        assert_eq!(empty.redacted_key(), "<missing>");
    }

    #[test]
    fn request_validation() {
        assert!(CompletionRequest::new("Score this resume").validate().is_ok());
        assert!(CompletionRequest::new("   ").validate().is_err());
        assert!(CompletionRequest::new("x")
            .with_max_output_tokens(0)
            .validate()
            .is_err());
        assert!(CompletionRequest::new("x")
            .with_temperature(2.5)
            .validate()
            .is_err());
        assert!(CompletionRequest::new("x")
            .with_temperature(-0.1)
            .validate()
            .is_err());
        assert!(CompletionRequest::new("x").with_temperature(2.0).validate().is_ok());
    }

    #[test]
    fn request_json_shorthand() {
        let req = CompletionRequest::new("x").json();
        assert!(req.wants_json());
        assert_eq!(req.response_format.as_str(), "json");
    }
}
