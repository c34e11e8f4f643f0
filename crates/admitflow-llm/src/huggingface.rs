use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use admitflow_types::{LlmError, Result};

use crate::http::{self, malformed};
use crate::{
    CompletionRequest, CompletionResult, FinishReason, ProviderAdapter, ProviderProfile,
};

/// Keys that carry generated text, in the order they are tried.
const TEXT_KEYS: [&str; 3] = ["generated_text", "text", "output"];

// ---------------------------------------------------------------------------
// LoadingPolicy
// ---------------------------------------------------------------------------

/// How long to wait for a cold model to load before giving up.
#[derive(Debug, Clone)]
pub struct LoadingPolicy {
    /// Cap on a single sleep, whatever the provider estimates.
    pub max_wait_per_attempt: Duration,
    /// Cap on the sum of all sleeps for one call.
    pub max_total_wait: Duration,
    /// Floor on a single sleep so a zero estimate cannot spin.
    pub min_wait: Duration,
}

impl Default for LoadingPolicy {
    fn default() -> Self {
        Self {
            max_wait_per_attempt: Duration::from_secs(30),
            max_total_wait: Duration::from_secs(120),
            min_wait: Duration::from_secs(1),
        }
    }
}

impl LoadingPolicy {
    /// Non-finite or negative estimates wait the minimum.
    fn wait_for(&self, estimated_secs: f64) -> Duration {
        if !estimated_secs.is_finite() || estimated_secs < 0.0 {
            return self.min_wait.max(Duration::from_millis(1));
        }
        Duration::try_from_secs_f64(estimated_secs)
            .unwrap_or(self.max_wait_per_attempt)
            .min(self.max_wait_per_attempt)
            .max(self.min_wait)
            .max(Duration::from_millis(1))
    }
}

// ---------------------------------------------------------------------------
// HuggingFaceAdapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HuggingFaceAdapter {
    client: reqwest::Client,
    loading: LoadingPolicy,
}

impl HuggingFaceAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            loading: LoadingPolicy::default(),
        }
    }

    pub fn with_loading_policy(mut self, loading: LoadingPolicy) -> Self {
        self.loading = loading;
        self
    }

    fn url(&self, profile: &ProviderProfile) -> String {
        match profile.endpoint_url() {
            Some(endpoint) => endpoint.to_string(),
            None => format!("{}/models/{}", profile.base_url(), profile.model()),
        }
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        json!({
            "inputs": request.prompt,
            "parameters": {
                "max_new_tokens": request.max_output_tokens,
                "temperature": request.temperature,
                "return_full_text": false,
                "do_sample": request.temperature > 0.0,
            },
            "options": { "wait_for_model": true },
        })
    }

    /// Decode the generated text from whichever shape the endpoint returned.
    fn parse_response(
        &self,
        profile: &ProviderProfile,
        status: u16,
        body: &str,
    ) -> Result<CompletionResult> {
        let raw = serde_json::from_str::<serde_json::Value>(body)
            .unwrap_or_else(|_| serde_json::Value::String(body.to_string()));

        if let Some(error) = raw.get("error").and_then(|e| e.as_str()) {
            return Err(malformed(profile, Some(status), format!("provider error: {error}")));
        }

        let text = extract_generated_text(&raw).ok_or_else(|| {
            malformed(
                profile,
                Some(status),
                "no generated_text, text or output field in response",
            )
        })?;

        if text.trim().is_empty() {
            return Err(malformed(profile, Some(status), "empty generated text"));
        }

        Ok(CompletionResult {
            text,
            raw,
            finish_reason: FinishReason::Complete,
            provider: profile.provider(),
            model: profile.model().to_string(),
            cached: false,
        })
    }
}

fn extract_generated_text(value: &serde_json::Value) -> Option<String> {
    let from_object = |v: &serde_json::Value| {
        TEXT_KEYS
            .iter()
            .find_map(|key| v.get(*key).and_then(|t| t.as_str()))
            .map(String::from)
    };

    match value {
        serde_json::Value::Array(items) => match items.first()? {
            serde_json::Value::String(s) => Some(s.clone()),
            first => from_object(first),
        },
        serde_json::Value::Object(_) => from_object(value),
        serde_json::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// `estimated_time` from a 503 body, present only while the model is cold-loading.
fn loading_estimate(body: &str) -> Option<f64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("estimated_time")?
        .as_f64()
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for HuggingFaceAdapter {
    async fn complete(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
    ) -> Result<CompletionResult> {
        let body = self.build_request_body(request);
        let url = self.url(profile);
        let mut waited = Duration::ZERO;

        loop {
            let builder = self.client.post(&url).bearer_auth(profile.api_key());
            let reply = http::send_json(builder, profile, &body).await?;

            if reply.status.as_u16() == 503 {
                if let Some(estimate) = loading_estimate(&reply.body) {
                    let wait = self.loading.wait_for(estimate);
                    if waited + wait > self.loading.max_total_wait {
                        return Err(LlmError::ModelLoadTimeout {
                            provider: profile.provider().as_str().to_string(),
                            model: profile.model().to_string(),
                            waited_secs: waited.as_secs(),
                        });
                    }
                    tracing::info!(
                        model = %profile.model(),
                        estimated_secs = estimate,
                        wait_ms = wait.as_millis() as u64,
                        "Model is loading, waiting before retrying"
                    );
                    tokio::time::sleep(wait).await;
                    waited += wait;
                    continue;
                }
            }

            if !reply.status.is_success() {
                return Err(http::map_status(profile, &reply));
            }

            return self.parse_response(profile, reply.status.as_u16(), &reply.body);
        }
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
