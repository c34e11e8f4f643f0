//! Response cache keyed on everything that can change a completion.
//!
//! The cache is an injected object, not a global: the invoker holds an
//! `Arc<dyn ResponseCache>`, so tests get isolated instances and a bounded or
//! persistent store can replace [`InMemoryCache`] without touching call sites.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::{CompletionRequest, CompletionResult, FinishReason, ProviderProfile};

// ---------------------------------------------------------------------------
// CacheKey
// ---------------------------------------------------------------------------

/// Hex SHA-256 over provider, model, sampling parameters, prompt, pipeline version
/// and cache-bust token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(
        profile: &ProviderProfile,
        request: &CompletionRequest,
        pipeline_version: &str,
        cache_bust: Option<&str>,
    ) -> Self {
        // serde_json objects serialize with sorted keys, so the material is canonical.
        let material = json!({
            "provider": profile.provider().as_str(),
            "model": profile.model(),
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
            "response_format": request.response_format.as_str(),
            "prompt": request.prompt,
            "pipeline_version": pipeline_version,
            "cache_bust": cache_bust.unwrap_or_default(),
        });

        let mut hasher = Sha256::new();
        hasher.update(material.to_string().as_bytes());
        CacheKey(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ResponseCache
// ---------------------------------------------------------------------------

/// What a cache hit replays: the text and whether it was cut off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCompletion {
    pub text: String,
    pub finish_reason: FinishReason,
}

impl From<&CompletionResult> for CachedCompletion {
    fn from(result: &CompletionResult) -> Self {
        Self {
            text: result.text.clone(),
            finish_reason: result.finish_reason,
        }
    }
}

pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CachedCompletion>;
    fn insert(&self, key: CacheKey, entry: CachedCompletion);
    fn len(&self) -> usize;
    fn clear(&self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local cache with no eviction. Entries live until `clear` or process exit.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<CacheKey, CachedCompletion>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CachedCompletion>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResponseCache for InMemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CachedCompletion> {
        self.lock().get(key).cloned()
    }

    fn insert(&self, key: CacheKey, entry: CachedCompletion) {
        if entry.text.trim().is_empty() {
            return;
        }
        self.lock().insert(key, entry);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
