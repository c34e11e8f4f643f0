use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use admitflow_types::{LlmError, ProviderFailure, Result};

use crate::retry::{run_with_retry, RetryOutcome, RetryPolicy};
use crate::{
    extract_json, AdapterRegistry, CacheKey, CachedCompletion, CompletionRequest,
    CompletionResult, InMemoryCache, ProviderKind, ProviderProfile, ResponseCache, Settings,
};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Hooks around every outbound attempt (retries and fallbacks included).
pub trait Middleware: Send + Sync {
    fn before(&self, _profile: &ProviderProfile, _request: &CompletionRequest) {}
    fn after(&self, _profile: &ProviderProfile, _result: &CompletionResult) {}
    fn on_error(&self, _profile: &ProviderProfile, _error: &LlmError) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, profile: &ProviderProfile, request: &CompletionRequest) {
        tracing::info!(
            provider = %profile.provider(),
            model = %profile.model(),
            prompt_chars = request.prompt.chars().count(),
            max_tokens = request.max_output_tokens,
            format = request.response_format.as_str(),
            "LLM request"
        );
    }

    fn after(&self, profile: &ProviderProfile, result: &CompletionResult) {
        tracing::info!(
            provider = %profile.provider(),
            model = %result.model,
            output_chars = result.text.chars().count(),
            finish = ?result.finish_reason,
            "LLM response"
        );
    }

    fn on_error(&self, profile: &ProviderProfile, error: &LlmError) {
        tracing::warn!(
            provider = %profile.provider(),
            model = %profile.model(),
            kind = error.kind(),
            status = ?error.http_status(),
            error = %error,
            "LLM call failed"
        );
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: CallStatsMiddleware
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCallStats {
    pub calls: u64,
    pub failures: u64,
    pub output_chars: u64,
}

/// Per-provider outbound call counters. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct CallStatsMiddleware {
    stats: Arc<Mutex<HashMap<ProviderKind, ProviderCallStats>>>,
}

impl CallStatsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self, kind: ProviderKind) -> ProviderCallStats {
        self.with_stats(|stats| stats.get(&kind).copied().unwrap_or_default())
    }

    pub fn total_calls(&self) -> u64 {
        self.with_stats(|stats| stats.values().map(|s| s.calls).sum())
    }

    fn with_stats<R>(
        &self,
        f: impl FnOnce(&mut HashMap<ProviderKind, ProviderCallStats>) -> R,
    ) -> R {
        let mut guard = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl Middleware for CallStatsMiddleware {
    fn before(&self, profile: &ProviderProfile, _request: &CompletionRequest) {
        self.with_stats(|stats| stats.entry(profile.provider()).or_default().calls += 1);
    }

    fn after(&self, profile: &ProviderProfile, result: &CompletionResult) {
        self.with_stats(|stats| {
            let chars = result.text.chars().count() as u64;
            stats.entry(profile.provider()).or_default().output_chars += chars;
        });
    }

    fn on_error(&self, profile: &ProviderProfile, _error: &LlmError) {
        self.with_stats(|stats| stats.entry(profile.provider()).or_default().failures += 1);
    }
}

// ---------------------------------------------------------------------------
// LlmInvoker
// ---------------------------------------------------------------------------

/// Single entry point for LLM calls: cache, retry with backoff, then provider fallback.
pub struct LlmInvoker {
    adapters: AdapterRegistry,
    retry: RetryPolicy,
    cache: Option<Arc<dyn ResponseCache>>,
    pipeline_version: String,
    cache_bust: Option<String>,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmInvoker {
    /// Invoker with default retry policy and no cache.
    pub fn new(adapters: AdapterRegistry) -> Self {
        Self {
            adapters,
            retry: RetryPolicy::default(),
            cache: None,
            pipeline_version: env!("CARGO_PKG_VERSION").to_string(),
            cache_bust: None,
            middleware: Vec::new(),
        }
    }

    /// Invoker wired from settings: built-in adapters, in-memory cache unless
    /// `PIPELINE_DISABLE_CACHE` is set, and request logging.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut invoker = Self::new(AdapterRegistry::default())
            .with_pipeline_version(settings.pipeline_version.clone())
            .with_middleware(LoggingMiddleware);
        if let Some(token) = &settings.cache_bust {
            invoker = invoker.with_cache_bust(token.clone());
        }
        if !settings.cache_disabled {
            invoker = invoker.with_cache(Arc::new(InMemoryCache::new()));
        }
        invoker
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_pipeline_version(mut self, version: impl Into<String>) -> Self {
        self.pipeline_version = version.into();
        self
    }

    pub fn with_cache_bust(mut self, token: impl Into<String>) -> Self {
        self.cache_bust = Some(token.into());
        self
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn cache(&self) -> Option<&Arc<dyn ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn cache_key(&self, profile: &ProviderProfile, request: &CompletionRequest) -> CacheKey {
        CacheKey::compute(
            profile,
            request,
            &self.pipeline_version,
            self.cache_bust.as_deref(),
        )
    }

    /// Run `request` against `primary`, then `fallback`, returning the first success.
    ///
    /// Fails with [`LlmError::Exhausted`] listing every attempted profile's final
    /// error, or [`LlmError::InvalidRequest`] before any call is made.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        primary: &ProviderProfile,
        fallback: Option<&ProviderProfile>,
    ) -> Result<CompletionResult> {
        request.validate()?;

        let key = self.cache.as_ref().map(|_| self.cache_key(primary, request));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(
                    provider = %primary.provider(),
                    model = %primary.model(),
                    key = %key,
                    "Cache hit"
                );
                return Ok(CompletionResult {
                    text: hit.text,
                    raw: serde_json::Value::Null,
                    finish_reason: hit.finish_reason,
                    provider: primary.provider(),
                    model: primary.model().to_string(),
                    cached: true,
                });
            }
        }

        let mut failures = Vec::new();
        for profile in std::iter::once(primary).chain(fallback) {
            if !failures.is_empty() {
                tracing::info!(
                    from = %primary.label(),
                    to = %profile.label(),
                    "Falling back to secondary provider"
                );
            }

            let RetryOutcome { result, attempts } = self.attempt_profile(profile, request).await;
            match result {
                Ok(result) => {
                    if let (Some(cache), Some(key)) = (&self.cache, &key) {
                        cache.insert(key.clone(), CachedCompletion::from(&result));
                    }
                    return Ok(result);
                }
                Err(error) => {
                    tracing::warn!(
                        provider = %profile.provider(),
                        model = %profile.model(),
                        attempts,
                        kind = error.kind(),
                        status = ?error.http_status(),
                        error = %error,
                        "Provider exhausted"
                    );
                    let stop = !error.allows_fallback();
                    failures.push(ProviderFailure {
                        provider: profile.provider().as_str().to_string(),
                        model: profile.model().to_string(),
                        attempts,
                        error,
                    });
                    if stop {
                        break;
                    }
                }
            }
        }

        Err(LlmError::Exhausted { failures })
    }

    /// [`complete`](Self::complete), returning only the text.
    pub async fn invoke(
        &self,
        request: &CompletionRequest,
        primary: &ProviderProfile,
        fallback: Option<&ProviderProfile>,
    ) -> Result<String> {
        self.complete(request, primary, fallback)
            .await
            .map(|result| result.text)
    }

    /// Resolve primary and fallback from `settings`, then [`complete`](Self::complete).
    pub async fn complete_with_settings(
        &self,
        settings: &Settings,
        request: &CompletionRequest,
        explicit: Option<ProviderKind>,
    ) -> Result<CompletionResult> {
        let primary = settings.resolve_primary(explicit);
        let fallback = settings.resolve_fallback(&primary);
        self.complete(request, &primary, fallback.as_ref()).await
    }

    /// Complete and parse the output as JSON.
    pub async fn invoke_json(
        &self,
        request: &CompletionRequest,
        primary: &ProviderProfile,
        fallback: Option<&ProviderProfile>,
    ) -> Result<serde_json::Value> {
        let result = self.complete(request, primary, fallback).await?;
        extract_json(&result.text).ok_or_else(|| LlmError::MalformedResponse {
            provider: result.provider.as_str().to_string(),
            status: None,
            message: format!(
                "no JSON object or array in {} characters of output",
                result.text.len()
            ),
        })
    }

    /// [`invoke_json`](Self::invoke_json), substituting `default` on any failure.
    pub async fn invoke_json_or(
        &self,
        request: &CompletionRequest,
        primary: &ProviderProfile,
        fallback: Option<&ProviderProfile>,
        default: serde_json::Value,
    ) -> serde_json::Value {
        match self.invoke_json(request, primary, fallback).await {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(error = %error, "LLM call failed, using fallback payload");
                default
            }
        }
    }

    async fn attempt_profile(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
    ) -> RetryOutcome<CompletionResult> {
        if !profile.has_credentials() {
            return RetryOutcome {
                result: Err(LlmError::ConfigurationError {
                    provider: profile.provider().as_str().to_string(),
                    message: "no API key configured".into(),
                }),
                attempts: 0,
            };
        }

        let adapter = match self.adapters.get(profile.provider()) {
            Ok(adapter) => adapter,
            Err(error) => {
                return RetryOutcome {
                    result: Err(error),
                    attempts: 0,
                }
            }
        };

        let middleware = &self.middleware;
        run_with_retry(&self.retry, &profile.label(), move |_attempt| async move {
            for m in middleware {
                m.before(profile, request);
            }

            let outcome = adapter
                .complete(profile, request)
                .await
                .and_then(|result| ensure_text(profile, result));

            match &outcome {
                Ok(result) => middleware.iter().for_each(|m| m.after(profile, result)),
                Err(error) => middleware.iter().for_each(|m| m.on_error(profile, error)),
            }
            outcome
        })
        .await
    }
}

/// Empty text never reaches a caller as a success.
fn ensure_text(profile: &ProviderProfile, result: CompletionResult) -> Result<CompletionResult> {
    if result.text.trim().is_empty() {
        return Err(LlmError::MalformedResponse {
            provider: profile.provider().as_str().to_string(),
            status: None,
            message: "provider returned empty text".into(),
        });
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, ProviderAdapter};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adapter that replays a script of outcomes and counts calls.
    struct ScriptedAdapter {
        script: Mutex<VecDeque<Result<String>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedAdapter {
        fn new(script: Vec<Result<String>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    script: Mutex::new(script.into()),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        async fn complete(
            &self,
            profile: &ProviderProfile,
            _request: &CompletionRequest,
        ) -> Result<CompletionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("default answer".into()));
            next.map(|text| CompletionResult {
                text,
                raw: serde_json::Value::Null,
                finish_reason: FinishReason::Complete,
                provider: profile.provider(),
                model: profile.model().to_string(),
                cached: false,
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn rate_limited(provider: &str) -> LlmError {
        LlmError::RateLimited {
            provider: provider.into(),
            status: 429,
            body: "rate limit reached".into(),
            retry_after_ms: None,
        }
    }

    fn auth_error(provider: &str) -> LlmError {
        LlmError::AuthError {
            provider: provider.into(),
            status: 401,
            body: "invalid api key".into(),
        }
    }

    fn groq() -> ProviderProfile {
        ProviderProfile::new(ProviderKind::Groq, "gsk", "")
    }

    fn openai() -> ProviderProfile {
        ProviderProfile::new(ProviderKind::OpenAi, "sk", "")
    }

    struct Harness {
        invoker: LlmInvoker,
        groq_calls: Arc<AtomicUsize>,
        openai_calls: Arc<AtomicUsize>,
    }

    fn harness(groq_script: Vec<Result<String>>, openai_script: Vec<Result<String>>) -> Harness {
        let (groq_adapter, groq_calls) = ScriptedAdapter::new(groq_script);
        let (openai_adapter, openai_calls) = ScriptedAdapter::new(openai_script);
        let mut registry = AdapterRegistry::empty();
        registry.register(ProviderKind::Groq, groq_adapter);
        registry.register(ProviderKind::OpenAi, openai_adapter);
        Harness {
            invoker: LlmInvoker::new(registry).with_retry_policy(RetryPolicy::immediate(3)),
            groq_calls,
            openai_calls,
        }
    }

    #[tokio::test]
    async fn rate_limited_twice_then_success_never_touches_fallback() {
        let h = harness(
            vec![Err(rate_limited("groq")), Err(rate_limited("groq")), Ok("final".into())],
            vec![],
        );
        let text = h
            .invoker
            .invoke(&CompletionRequest::new("hi"), &groq(), Some(&openai()))
            .await
            .unwrap();
        assert_eq!(text, "final");
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.openai_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_retryable_error_goes_straight_to_fallback() {
        let h = harness(vec![Err(auth_error("groq"))], vec![Ok("from openai".into())]);
        let result = h
            .invoker
            .complete(&CompletionRequest::new("hi"), &groq(), Some(&openai()))
            .await
            .unwrap();
        assert_eq!(result.text, "from openai");
        assert_eq!(result.provider, ProviderKind::OpenAi);
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.openai_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_exhausted_reports_every_provider() {
        let h = harness(
            vec![Err(rate_limited("groq")), Err(rate_limited("groq")), Err(rate_limited("groq"))],
            vec![Err(auth_error("openai"))],
        );
        let err = h
            .invoker
            .complete(&CompletionRequest::new("hi"), &groq(), Some(&openai()))
            .await
            .unwrap_err();

        match &err {
            LlmError::Exhausted { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].provider, "groq");
                assert_eq!(failures[0].attempts, 3);
                assert!(matches!(failures[0].error, LlmError::RateLimited { .. }));
                assert_eq!(failures[1].provider, "openai");
                assert_eq!(failures[1].attempts, 1);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("rate limit reached"));
        assert!(msg.contains("invalid api key"));
    }

    #[tokio::test]
    async fn no_fallback_means_single_failure() {
        let h = harness(vec![Err(auth_error("groq"))], vec![]);
        let err = h
            .invoker
            .complete(&CompletionRequest::new("hi"), &groq(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Exhausted { ref failures } if failures.len() == 1));
    }

    #[tokio::test]
    async fn caller_error_from_adapter_skips_fallback() {
        let h = harness(
            vec![Err(LlmError::InvalidRequest("prompt exceeds context window".into()))],
            vec![Ok("should not be used".into())],
        );
        let err = h
            .invoker
            .complete(&CompletionRequest::new("hi"), &groq(), Some(&openai()))
            .await
            .unwrap_err();

        match err {
            LlmError::Exhausted { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].provider, "groq");
                assert!(matches!(failures[0].error, LlmError::InvalidRequest(_)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.openai_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_any_call() {
        let h = harness(vec![], vec![]);
        let err = h
            .invoker
            .complete(&CompletionRequest::new(""), &groq(), Some(&openai()))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credentials_skip_to_fallback_without_calling() {
        let h = harness(vec![], vec![Ok("openai answer".into())]);
        let keyless = ProviderProfile::new(ProviderKind::Groq, "", "");
        let text = h
            .invoker
            .invoke(&CompletionRequest::new("hi"), &keyless, Some(&openai()))
            .await
            .unwrap();
        assert_eq!(text, "openai answer");
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 0);

        let err = h
            .invoker
            .complete(&CompletionRequest::new("hi"), &keyless, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not attempted"));
        assert!(err.to_string().contains("no API key configured"));
    }

    #[tokio::test]
    async fn unregistered_provider_is_a_configuration_failure() {
        let h = harness(vec![], vec![]);
        let gemini = ProviderProfile::new(ProviderKind::Gemini, "g", "");
        let err = h
            .invoker
            .complete(&CompletionRequest::new("hi"), &gemini, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no adapter registered"));
    }

    #[tokio::test]
    async fn empty_text_is_converted_to_malformed_response() {
        let h = harness(vec![Ok("   ".into())], vec![]);
        let err = h
            .invoker
            .complete(&CompletionRequest::new("hi"), &groq(), None)
            .await
            .unwrap_err();
        match err {
            LlmError::Exhausted { failures } => {
                assert!(matches!(failures[0].error, LlmError::MalformedResponse { .. }));
                assert_eq!(failures[0].attempts, 1);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cache_serves_identical_requests_once() {
        let h = harness(vec![Ok("first".into()), Ok("second".into())], vec![]);
        let cache: Arc<dyn ResponseCache> = Arc::new(InMemoryCache::new());
        let invoker = h.invoker.with_cache(cache.clone());
        let req = CompletionRequest::new("same prompt");

        let a = invoker.complete(&req, &groq(), None).await.unwrap();
        let b = invoker.complete(&req, &groq(), None).await.unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "first");
        assert!(!a.cached);
        assert!(b.cached);
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        let c = invoker
            .complete(&req.clone().with_temperature(0.9), &groq(), None)
            .await
            .unwrap();
        assert_eq!(c.text, "second");
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_hit_replays_truncation() {
        let h = harness(vec![], vec![]);
        let cache: Arc<dyn ResponseCache> = Arc::new(InMemoryCache::new());
        let invoker = h.invoker.with_cache(cache.clone());
        let req = CompletionRequest::new("long essay");
        cache.insert(
            invoker.cache_key(&groq(), &req),
            CachedCompletion {
                text: "partial essay".into(),
                finish_reason: FinishReason::MaxTokens,
            },
        );

        let result = invoker.complete(&req, &groq(), None).await.unwrap();
        assert!(result.cached);
        assert!(result.is_truncated());
        assert_eq!(result.text, "partial essay");
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn without_cache_every_call_goes_out() {
        let h = harness(vec![Ok("first".into()), Ok("second".into())], vec![]);
        let req = CompletionRequest::new("same prompt");
        let a = h.invoker.invoke(&req, &groq(), None).await.unwrap();
        let b = h.invoker.invoke(&req, &groq(), None).await.unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("first", "second"));
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_bust_token_separates_entries() {
        let h = harness(vec![Ok("first".into()), Ok("second".into())], vec![]);
        let cache: Arc<dyn ResponseCache> = Arc::new(InMemoryCache::new());
        let req = CompletionRequest::new("same prompt");

        let first = LlmInvoker::new(AdapterRegistry::empty()).with_cache(cache.clone());
        let busted = LlmInvoker::new(AdapterRegistry::empty())
            .with_cache(cache.clone())
            .with_cache_bust("run-2");
        assert_ne!(first.cache_key(&groq(), &req), busted.cache_key(&groq(), &req));

        let invoker = h.invoker.with_cache(cache);
        invoker.invoke(&req, &groq(), None).await.unwrap();
        assert_eq!(h.groq_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn call_stats_count_characters_not_bytes() {
        let stats = CallStatsMiddleware::new();
        let result = CompletionResult {
            text: "École supérieure".into(),
            raw: serde_json::Value::Null,
            finish_reason: FinishReason::Complete,
            provider: ProviderKind::Gemini,
            model: "gemini-2.0-flash".into(),
            cached: false,
        };
        stats.after(&ProviderProfile::new(ProviderKind::Gemini, "g", ""), &result);
        assert_eq!(stats.stats(ProviderKind::Gemini).output_chars, 16);
    }

    #[tokio::test]
    async fn middleware_sees_every_attempt() {
        let stats = CallStatsMiddleware::new();
        let h = harness(
            vec![Err(rate_limited("groq")), Ok("ok".into())],
            vec![],
        );
        let invoker = h.invoker.with_middleware(stats.clone());
        invoker
            .invoke(&CompletionRequest::new("hi"), &groq(), Some(&openai()))
            .await
            .unwrap();

        let groq_stats = stats.stats(ProviderKind::Groq);
        assert_eq!(groq_stats.calls, 2);
        assert_eq!(groq_stats.failures, 1);
        assert_eq!(groq_stats.output_chars, 2);
        assert_eq!(stats.stats(ProviderKind::OpenAi), ProviderCallStats::default());
        assert_eq!(stats.total_calls(), 2);
    }

    #[tokio::test]
    async fn invoke_json_extracts_structured_output() {
        let h = harness(
            vec![Ok("```json\n{\"tier\": \"T1\"}\n```".into()), Ok("not json".into())],
            vec![],
        );
        let value = h
            .invoker
            .invoke_json(&CompletionRequest::new("hi").json(), &groq(), None)
            .await
            .unwrap();
        assert_eq!(value["tier"], "T1");

        let err = h
            .invoker
            .invoke_json(&CompletionRequest::new("hi").json(), &groq(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LlmError::MalformedResponse { ref provider, .. } if provider == "groq"
        ));
    }

    #[tokio::test]
    async fn invoke_json_or_degrades_to_default() {
        let h = harness(vec![Err(auth_error("groq"))], vec![]);
        let value = h
            .invoker
            .invoke_json_or(
                &CompletionRequest::new("hi"),
                &groq(),
                None,
                serde_json::json!({"tier": "unknown"}),
            )
            .await;
        assert_eq!(value["tier"], "unknown");
    }

    #[tokio::test]
    async fn complete_with_settings_resolves_profiles() {
        let h = harness(vec![Err(auth_error("groq"))], vec![Ok("via settings".into())]);
        let settings = Settings::from_lookup(|k| match k {
            "GROQ_API_KEY" => Some("gsk".into()),
            "OPENAI_API_KEY" => Some("sk".into()),
            _ => None,
        })
        .unwrap();
        let result = h
            .invoker
            .complete_with_settings(&settings, &CompletionRequest::new("hi"), None)
            .await
            .unwrap();
        assert_eq!(result.text, "via settings");
        assert_eq!(result.provider, ProviderKind::OpenAi);
    }

    #[test]
    fn from_settings_respects_cache_flag() {
        let enabled = Settings::from_lookup(|_| None).unwrap();
        assert!(LlmInvoker::from_settings(&enabled).cache().is_some());

        let disabled =
            Settings::from_lookup(|k| (k == "PIPELINE_DISABLE_CACHE").then(|| "1".into())).unwrap();
        let invoker = LlmInvoker::from_settings(&disabled);
        assert!(invoker.cache().is_none());
        assert_eq!(invoker.retry_policy().max_attempts, 3);
    }
}
