//! Environment-driven provider selection.
//!
//! [`Settings`] is a snapshot of configuration state. Resolution of the primary and
//! fallback profiles is a pure function of that snapshot, so tests build settings from
//! a plain map instead of mutating the process environment.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use admitflow_types::{LlmError, Result};

use crate::{ProviderKind, ProviderProfile};

/// Per-provider configuration as read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub endpoint_url: Option<String>,
    pub fallback_model: Option<String>,
}

impl ProviderSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Environment variable names for one provider.
struct EnvKeys {
    api_key: &'static [&'static str],
    model: &'static [&'static str],
    base_url: &'static str,
    endpoint_url: Option<&'static str>,
    fallback_model: &'static str,
}

fn env_keys(kind: ProviderKind) -> EnvKeys {
    match kind {
        ProviderKind::Groq => EnvKeys {
            api_key: &["GROQ_API_KEY"],
            model: &["GROQ_MODEL"],
            base_url: "GROQ_API_URL",
            endpoint_url: None,
            fallback_model: "GROQ_FALLBACK_MODEL",
        },
        ProviderKind::OpenAi => EnvKeys {
            api_key: &["OPENAI_API_KEY"],
            model: &["OPENAI_PRIMARY_MODEL", "OPENAI_MODEL"],
            base_url: "OPENAI_BASE_URL",
            endpoint_url: None,
            fallback_model: "OPENAI_FALLBACK_MODEL",
        },
        ProviderKind::Gemini => EnvKeys {
            api_key: &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            model: &["GEMINI_PRIMARY_MODEL", "GEMINI_MODEL"],
            base_url: "GEMINI_BASE_URL",
            endpoint_url: None,
            fallback_model: "GEMINI_FALLBACK_MODEL",
        },
        ProviderKind::HuggingFace => EnvKeys {
            api_key: &["HF_API_KEY", "HUGGINGFACE_API_KEY"],
            model: &["HF_MODEL"],
            base_url: "HF_BASE_URL",
            endpoint_url: Some("HF_ENDPOINT_URL"),
            fallback_model: "HF_FALLBACK_MODEL",
        },
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Settings {
    /// Value of `LLM_PROVIDER`, if set.
    pub preferred_provider: Option<ProviderKind>,
    pub timeout_secs: u64,
    pub cache_bust: Option<String>,
    pub cache_disabled: bool,
    pub pipeline_version: String,
    providers: HashMap<ProviderKind, ProviderSettings>,
}

impl Settings {
    /// Snapshot the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let first = |keys: &[&str]| keys.iter().copied().find_map(&get);

        let mut providers = HashMap::new();
        for kind in ProviderKind::PRIORITY {
            let keys = env_keys(kind);
            providers.insert(
                kind,
                ProviderSettings {
                    api_key: first(keys.api_key).unwrap_or_default(),
                    model: first(keys.model),
                    base_url: get(keys.base_url),
                    endpoint_url: keys.endpoint_url.and_then(get),
                    fallback_model: get(keys.fallback_model),
                },
            );
        }

        let preferred_provider = get("LLM_PROVIDER")
            .map(|name| name.parse::<ProviderKind>())
            .transpose()?;

        let timeout_secs = match get("LLM_TIMEOUT_SECONDS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| LlmError::ConfigurationError {
                provider: "settings".into(),
                message: format!(
                    "LLM_TIMEOUT_SECONDS must be a whole number of seconds, got '{raw}'"
                ),
            })?,
            None => ProviderProfile::DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            preferred_provider,
            timeout_secs,
            cache_bust: get("PIPELINE_CACHE_BUST"),
            cache_disabled: get("PIPELINE_DISABLE_CACHE").is_some_and(|v| is_truthy(&v)),
            pipeline_version: get("PIPELINE_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            providers,
        })
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        self.providers.get(&kind)
    }

    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.provider(kind).is_some_and(ProviderSettings::is_configured)
    }

    /// Providers with a credential, in priority order.
    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::PRIORITY
            .into_iter()
            .filter(|k| self.is_configured(*k))
            .collect()
    }

    /// Build the profile for `kind` from these settings. The key may be empty.
    pub fn profile_for(&self, kind: ProviderKind) -> ProviderProfile {
        let entry = self.provider(kind).cloned().unwrap_or_default();
        let mut profile = ProviderProfile::new(
            kind,
            entry.api_key,
            entry.model.unwrap_or_default(),
        )
        .with_timeout_secs(self.timeout_secs);
        if let Some(url) = entry.base_url {
            profile = profile.with_base_url(url);
        }
        if let Some(url) = entry.endpoint_url {
            profile = profile.with_endpoint_url(url);
        }
        profile
    }

    /// Pick the primary profile.
    ///
    /// An explicit provider wins when it has credentials, then `LLM_PROVIDER`, then the
    /// first configured provider in priority order. With nothing configured the result
    /// has an empty key; callers check [`ProviderProfile::has_credentials`].
    pub fn resolve_primary(&self, explicit: Option<ProviderKind>) -> ProviderProfile {
        for kind in [explicit, self.preferred_provider].into_iter().flatten() {
            if self.is_configured(kind) {
                return self.profile_for(kind);
            }
            tracing::warn!(provider = %kind, "Requested provider has no API key, trying others");
        }

        if let Some(kind) = self.configured_providers().into_iter().next() {
            return self.profile_for(kind);
        }

        let kind = explicit
            .or(self.preferred_provider)
            .unwrap_or(ProviderKind::PRIORITY[0]);
        tracing::warn!(provider = %kind, "No LLM provider API keys configured");
        self.profile_for(kind)
    }

    /// Pick a fallback for `primary`, preferring a different provider.
    ///
    /// When no other provider is configured, the primary's provider is reused with its
    /// `<PROVIDER>_FALLBACK_MODEL`, if that names a different model.
    pub fn resolve_fallback(&self, primary: &ProviderProfile) -> Option<ProviderProfile> {
        if let Some(kind) = self
            .configured_providers()
            .into_iter()
            .find(|k| *k != primary.provider())
        {
            return Some(self.profile_for(kind));
        }

        let kind = primary.provider();
        let fallback_model = self.provider(kind)?.fallback_model.as_deref()?;
        if !self.is_configured(kind) || fallback_model == primary.model() {
            return None;
        }
        Some(self.profile_for(kind).with_model(fallback_model))
    }

    /// Turn a loosely specified override into a full profile, filling gaps from these
    /// settings. This is the only place caller-supplied configuration is interpreted.
    pub fn coerce(&self, over: &ProfileOverride) -> Result<ProviderProfile> {
        let mut profile = match over.provider.as_deref() {
            Some(name) => self.profile_for(name.parse()?),
            None => self.resolve_primary(None),
        };

        if let Some(key) = over.api_key.as_deref() {
            profile = ProviderProfile::new(profile.provider(), key, profile.model())
                .with_timeout_secs(profile.timeout_secs())
                .with_base_url(profile.base_url())
                .with_endpoint_url(profile.endpoint_url().unwrap_or_default());
        }
        if let Some(model) = over.model.as_deref() {
            profile = profile.with_model(model);
        }
        if let Some(url) = over.base_url.as_deref() {
            profile = profile.with_base_url(url);
        }
        if let Some(url) = over.endpoint_url.as_deref() {
            profile = profile.with_endpoint_url(url);
        }
        if let Some(secs) = over.timeout_seconds {
            profile = profile.with_timeout_secs(secs);
        }
        Ok(profile)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// ProfileOverride
// ---------------------------------------------------------------------------

/// Caller-supplied, partially specified profile. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileOverride {
    #[serde(default, alias = "provider_name", alias = "llm_provider")]
    pub provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default, alias = "model_identifier", alias = "model_name")]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default, alias = "timeout")]
    pub timeout_seconds: Option<u64>,
}

impl ProfileOverride {
    /// Parse an override from an arbitrary JSON object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| LlmError::ConfigurationError {
            provider: "settings".into(),
            message: format!("invalid provider override: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
