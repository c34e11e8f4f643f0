//! Resilient multi-provider LLM invocation (Groq, OpenAI, Gemini, HuggingFace).
//!
//! Provides the `Settings` resolver, one `ProviderAdapter` per wire format,
//! retry/backoff policies, a response cache, and `LlmInvoker`, which ties them
//! together with provider fallback.

mod cache;
mod client;
mod gemini;
mod http;
mod huggingface;
mod json;
mod openai;
mod provider;
pub mod retry;
mod settings;
mod types;

pub use cache::{CacheKey, CachedCompletion, InMemoryCache, ResponseCache};
pub use client::*;
pub use gemini::{GeminiAdapter, MIN_TRUNCATED_CHARS};
pub use huggingface::{HuggingFaceAdapter, LoadingPolicy};
pub use json::extract_json;
pub use openai::OpenAiCompatibleAdapter;
pub use provider::*;
pub use retry::{BackoffPolicy, RetryPolicy};
pub use settings::*;
pub use types::*;

pub use admitflow_types::{LlmError, ProviderFailure, Result};
