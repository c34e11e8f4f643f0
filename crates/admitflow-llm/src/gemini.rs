use async_trait::async_trait;
use serde_json::json;

use admitflow_types::Result;

use crate::http::{self, malformed};
use crate::{
    CompletionRequest, CompletionResult, FinishReason, ProviderAdapter, ProviderProfile,
};

/// Shortest partial answer worth returning when Gemini stops at the token cap.
pub const MIN_TRUNCATED_CHARS: usize = 50;

// ---------------------------------------------------------------------------
// GeminiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut gen_config = json!({
            "temperature": request.temperature,
            "maxOutputTokens": request.max_output_tokens,
        });
        if request.wants_json() {
            gen_config["responseMimeType"] = json!("application/json");
        }

        json!({
            "contents": [{ "parts": [{ "text": request.prompt }] }],
            "generationConfig": gen_config,
        })
    }

    fn parse_response(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
        status: u16,
        json: serde_json::Value,
    ) -> Result<CompletionResult> {
        if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
            return Err(malformed(
                profile,
                Some(status),
                format!("prompt blocked by provider: {reason}"),
            ));
        }

        let candidate = json["candidates"]
            .as_array()
            .and_then(|candidates| candidates.first())
            .ok_or_else(|| malformed(profile, Some(status), "missing candidates in response"))?;

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let raw_finish = candidate["finishReason"].as_str().unwrap_or("STOP");
        let finish_reason = if raw_finish == "MAX_TOKENS" {
            let usable = text.trim().chars().count();
            if usable < MIN_TRUNCATED_CHARS {
                return Err(malformed(
                    profile,
                    Some(status),
                    format!(
                        "generation hit MAX_TOKENS after {usable} characters with \
                         max_output_tokens={}; increase max_output_tokens or shorten \
                         the prompt",
                        request.max_output_tokens
                    ),
                ));
            }
            tracing::warn!(
                provider = %profile.provider(),
                model = %profile.model(),
                chars = usable,
                "Gemini output truncated at MAX_TOKENS, returning partial text"
            );
            FinishReason::MaxTokens
        } else {
            FinishReason::Complete
        };

        if text.trim().is_empty() {
            return Err(malformed(
                profile,
                Some(status),
                format!("empty candidate text (finishReason: {raw_finish})"),
            ));
        }

        Ok(CompletionResult {
            text,
            raw: json,
            finish_reason,
            provider: profile.provider(),
            model: profile.model().to_string(),
            cached: false,
        })
    }
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn complete(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
    ) -> Result<CompletionResult> {
        let body = self.build_request_body(request);
        let url = format!(
            "{}/models/{}:generateContent",
            profile.base_url(),
            profile.model()
        );

        let builder = self
            .client
            .post(&url)
            .query(&[("key", profile.api_key())]);
        let reply = http::send_json(builder, profile, &body).await?;

        if !reply.status.is_success() {
            return Err(http::map_status(profile, &reply));
        }

        let json = http::parse_json(profile, &reply)?;
        self.parse_response(profile, request, reply.status.as_u16(), json)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
