//! Transport plumbing shared by every adapter: send one JSON POST with the profile's
//! timeout and translate HTTP outcomes into the uniform error taxonomy.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};

use admitflow_types::{truncate_body, LlmError, Result};

use crate::ProviderProfile;

/// Status, body and rate-limit hint of one HTTP exchange.
#[derive(Debug)]
pub(crate) struct HttpReply {
    pub status: StatusCode,
    pub body: String,
    pub retry_after_ms: Option<u64>,
}

/// POST `body` as JSON with the profile's timeout enforced.
pub(crate) async fn send_json(
    builder: RequestBuilder,
    profile: &ProviderProfile,
    body: &serde_json::Value,
) -> Result<HttpReply> {
    let provider = profile.provider().as_str();

    let resp = builder
        .timeout(profile.timeout())
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(profile, e))?;

    let status = resp.status();
    let retry_after_ms = retry_after_ms(resp.headers());
    let body = resp.text().await.map_err(|e| transport_error(profile, e))?;

    tracing::debug!(provider, status = status.as_u16(), bytes = body.len(), "Provider replied");

    Ok(HttpReply {
        status,
        body,
        retry_after_ms,
    })
}

/// The request URL is dropped from the message: Gemini carries the key in its query.
fn transport_error(profile: &ProviderProfile, err: reqwest::Error) -> LlmError {
    let provider = profile.provider().as_str().to_string();
    let err = err.without_url();
    if err.is_timeout() {
        LlmError::Timeout {
            provider,
            timeout_ms: profile.timeout().as_millis() as u64,
        }
    } else {
        LlmError::NetworkError {
            provider,
            message: err.to_string(),
        }
    }
}

fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let secs: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0) as u64)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Map a non-success reply onto the error taxonomy. Identical for every provider.
pub(crate) fn map_status(profile: &ProviderProfile, reply: &HttpReply) -> LlmError {
    let provider = profile.provider().as_str().to_string();
    let status = reply.status.as_u16();
    let body = truncate_body(&extract_error_message(&reply.body));

    match status {
        429 => LlmError::RateLimited {
            provider,
            status,
            body,
            retry_after_ms: reply.retry_after_ms,
        },
        401 | 403 => LlmError::AuthError {
            provider,
            status,
            body,
        },
        404 => LlmError::ConfigurationError {
            provider,
            message: format!(
                "model '{}' or endpoint not found (HTTP 404): {body}",
                profile.model()
            ),
        },
        500..=599 => LlmError::ServerError {
            provider,
            status,
            body,
        },
        _ => LlmError::MalformedResponse {
            provider,
            status: Some(status),
            message: format!("unexpected HTTP status: {body}"),
        },
    }
}

/// Pull the human-readable message out of the common error envelopes, falling back to
/// the raw body.
fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    value["error"]["message"]
        .as_str()
        .or_else(|| value["error"].as_str())
        .or_else(|| value["message"].as_str())
        .map(String::from)
        .unwrap_or_else(|| body.to_string())
}

/// Parse a success body as JSON.
pub(crate) fn parse_json(
    profile: &ProviderProfile,
    reply: &HttpReply,
) -> Result<serde_json::Value> {
    serde_json::from_str(&reply.body).map_err(|e| LlmError::MalformedResponse {
        provider: profile.provider().as_str().to_string(),
        status: Some(reply.status.as_u16()),
        message: format!(
            "failed to parse response JSON: {e}; body: {}",
            truncate_body(&reply.body)
        ),
    })
}

/// Build a `MalformedResponse` for `profile` with the given message.
pub(crate) fn malformed(
    profile: &ProviderProfile,
    status: Option<u16>,
    message: impl Into<String>,
) -> LlmError {
    LlmError::MalformedResponse {
        provider: profile.provider().as_str().to_string(),
        status,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
