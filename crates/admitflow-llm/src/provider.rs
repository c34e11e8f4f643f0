use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use admitflow_types::{LlmError, Result};

use crate::{
    CompletionRequest, CompletionResult, GeminiAdapter, HuggingFaceAdapter,
    OpenAiCompatibleAdapter, ProviderKind, ProviderProfile,
};

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// Translates one request for one profile into exactly one provider call.
///
/// Adapters hold no credentials; everything call-specific comes from the profile.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
    ) -> Result<CompletionResult>;

    /// Wire format name, for logs.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// AdapterRegistry
// ---------------------------------------------------------------------------

/// Lookup table from provider kind to the adapter that speaks its wire format.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry. Every kind used must be registered before invoking.
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the built-in adapter for every provider kind, sharing `client`.
    pub fn with_client(client: reqwest::Client) -> Self {
        let openai_compatible: Arc<dyn ProviderAdapter> =
            Arc::new(OpenAiCompatibleAdapter::new(client.clone()));

        let mut registry = Self::empty();
        registry
            .adapters
            .insert(ProviderKind::Groq, openai_compatible.clone());
        registry
            .adapters
            .insert(ProviderKind::OpenAi, openai_compatible);
        registry.register(ProviderKind::Gemini, GeminiAdapter::new(client.clone()));
        registry.register(ProviderKind::HuggingFace, HuggingFaceAdapter::new(client));
        registry
    }

    pub fn register(&mut self, kind: ProviderKind, adapter: impl ProviderAdapter + 'static) {
        self.adapters.insert(kind, Arc::new(adapter));
    }

    pub fn get(&self, kind: ProviderKind) -> Result<&dyn ProviderAdapter> {
        self.adapters
            .get(&kind)
            .map(|a| a.as_ref())
            .ok_or_else(|| LlmError::ConfigurationError {
                provider: kind.as_str().to_string(),
                message: "no adapter registered for provider".into(),
            })
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_client(reqwest::Client::new())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FinishReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockAdapter {
        call_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProviderAdapter for MockAdapter {
        async fn complete(
            &self,
            profile: &ProviderProfile,
            request: &CompletionRequest,
        ) -> Result<CompletionResult> {
            self.call_count.fetch_add(1, Ordering::Relaxed);
            Ok(CompletionResult {
                text: format!("echo: {}", request.prompt),
                raw: serde_json::Value::Null,
                finish_reason: FinishReason::Complete,
                provider: profile.provider(),
                model: profile.model().to_string(),
                cached: false,
            })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    #[test]
    fn default_registry_covers_every_provider() {
        let registry = AdapterRegistry::default();
        for kind in ProviderKind::PRIORITY {
            assert!(registry.contains(kind), "missing adapter for {kind}");
        }
        assert_eq!(registry.get(ProviderKind::Groq).unwrap().name(), "openai-compatible");
        assert_eq!(registry.get(ProviderKind::OpenAi).unwrap().name(), "openai-compatible");
        assert_eq!(registry.get(ProviderKind::Gemini).unwrap().name(), "gemini");
        assert_eq!(
            registry.get(ProviderKind::HuggingFace).unwrap().name(),
            "huggingface"
        );
    }

    #[test]
    fn empty_registry_reports_configuration_error() {
        let registry = AdapterRegistry::empty();
        let err = registry.get(ProviderKind::Gemini).err().unwrap();
        assert!(matches!(
            err,
            LlmError::ConfigurationError { ref provider, .. } if provider == "gemini"
        ));
    }

    #[tokio::test]
    async fn registered_adapter_is_dispatched_by_kind() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = AdapterRegistry::empty();
        registry.register(
            ProviderKind::Groq,
            MockAdapter {
                call_count: calls.clone(),
            },
        );

        let profile = ProviderProfile::new(ProviderKind::Groq, "gsk", "");
        let adapter = registry.get(ProviderKind::Groq).unwrap();
        let result = adapter
            .complete(&profile, &CompletionRequest::new("hello"))
            .await
            .unwrap();

        assert_eq!(result.text, "echo: hello");
        assert_eq!(result.provider, ProviderKind::Groq);
        assert_eq!(result.model, "llama-3.3-70b-versatile");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
