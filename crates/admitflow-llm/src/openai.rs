use async_trait::async_trait;
use serde_json::json;

use admitflow_types::Result;

use crate::http::{self, malformed};
use crate::{
    CompletionRequest, CompletionResult, FinishReason, ProviderAdapter, ProviderProfile,
};

// ---------------------------------------------------------------------------
// OpenAiCompatibleAdapter
// ---------------------------------------------------------------------------

/// Chat-completions wire format. Serves OpenAI and Groq (which exposes the same API
/// under its own base URL).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleAdapter {
    client: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request_body(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
    ) -> serde_json::Value {
        let mut body = json!({
            "model": profile.model(),
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
        });

        if request.wants_json() {
            body["response_format"] = json!({ "type": "json_object" });
        }

        body
    }

    fn parse_response(
        &self,
        profile: &ProviderProfile,
        status: u16,
        body: serde_json::Value,
    ) -> Result<CompletionResult> {
        let choice = body["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .ok_or_else(|| malformed(profile, Some(status), "missing choices[0] in response"))?;

        let text = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                malformed(profile, Some(status), "missing choices[0].message.content in response")
            })?
            .to_string();

        let finish_reason = match choice["finish_reason"].as_str() {
            Some("length") => FinishReason::MaxTokens,
            _ => FinishReason::Complete,
        };

        if text.trim().is_empty() {
            return Err(malformed(
                profile,
                Some(status),
                format!(
                    "empty message content (finish_reason: {})",
                    choice["finish_reason"].as_str().unwrap_or("unknown")
                ),
            ));
        }

        let model = body["model"]
            .as_str()
            .unwrap_or(profile.model())
            .to_string();

        Ok(CompletionResult {
            text,
            raw: body,
            finish_reason,
            provider: profile.provider(),
            model,
            cached: false,
        })
    }
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    async fn complete(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
    ) -> Result<CompletionResult> {
        let body = self.build_request_body(profile, request);
        let url = format!("{}/chat/completions", profile.base_url());

        let builder = self.client.post(&url).bearer_auth(profile.api_key());
        let reply = http::send_json(builder, profile, &body).await?;

        if !reply.status.is_success() {
            return Err(http::map_status(profile, &reply));
        }

        let json = http::parse_json(profile, &reply)?;
        self.parse_response(profile, reply.status.as_u16(), json)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
