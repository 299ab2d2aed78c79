use crate::failover::RetryPolicy;
use conductor_core::{ConductorError, ConductorResult, RoutingProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions.
    OpenAi,
    /// OpenRouter, OpenAI-compatible API.
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
    /// Local Ollama server, OpenAI-compatible API on port 11434.
    Ollama,
    /// Anthropic Messages API.
    Claude,
}

impl ProviderKind {
    /// Base URL used when the settings give none.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::OpenRouter => "https://openrouter.ai/api",
            ProviderKind::Groq => "https://api.groq.com/openai",
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::Claude => "https://api.anthropic.com",
        }
    }

    fn is_local_by_default(&self) -> bool {
        matches!(self, ProviderKind::Ollama)
    }
}

/// Price of a model in currency units per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price of one million prompt tokens.
    #[serde(default)]
    pub input_per_million: f64,
    /// Price of one million completion tokens.
    #[serde(default)]
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Prices per one million input and output tokens.
    pub fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Cost of a call with the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_million
            + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// Token-bucket settings for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Sustained request rate.
    pub requests_per_minute: f64,
    /// Maximum burst; defaults to one minute's worth of requests.
    #[serde(default)]
    pub burst: Option<f64>,
}

/// Settings for one named provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Wire protocol.
    pub kind: ProviderKind,
    /// Overrides the kind's default base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Lower values are preferred.
    #[serde(default)]
    pub priority: u32,
    /// Disabled providers are never selected or tried.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the kind's default locality (only Ollama is local by default).
    #[serde(default)]
    pub local: Option<bool>,
    /// Overrides the kind's default model control (only Ollama has it).
    #[serde(default)]
    pub supports_model_control: Option<bool>,
    /// Limit for one call, including the whole body of a stream.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Token bucket applied before every call.
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,
    /// Model used when no preferred model applies.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Models this provider serves, with their prices.
    #[serde(default)]
    pub models: BTreeMap<String, ModelPricing>,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    120
}

impl ProviderSettings {
    /// Enabled settings with defaults for `kind`.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            base_url: None,
            api_key_env: None,
            priority: 0,
            enabled: true,
            local: None,
            supports_model_control: None,
            timeout_secs: default_timeout_secs(),
            rate_limit: None,
            default_model: None,
            models: BTreeMap::new(),
        }
    }

    /// Set the priority; lower is preferred.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a priced model.
    pub fn with_model(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.models.insert(model.into(), pricing);
        self
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Disable the provider.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Configured base URL, else the kind's default.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
            .trim_end_matches('/')
    }

    /// Runs on this machine.
    pub fn is_local(&self) -> bool {
        self.local.unwrap_or_else(|| self.kind.is_local_by_default())
    }

    /// Can load models on demand.
    pub fn supports_model_control(&self) -> bool {
        self.supports_model_control
            .unwrap_or_else(|| self.kind.is_local_by_default())
    }

    /// `model` is the default model or has a price entry.
    pub fn lists_model(&self, model: &str) -> bool {
        self.models.contains_key(model) || self.default_model.as_deref() == Some(model)
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }
}

/// Per-profile routing preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// Models in order of preference, either bare (`llama3.1:8b`) or
    /// qualified with a provider name (`groq/llama-3.3-70b-versatile`).
    pub preferred_models: Vec<String>,
    /// Planner warns when a phase's estimated input exceeds this.
    pub max_context_tokens: Option<u64>,
}

/// Built-in profile settings used when the configuration omits a profile.
pub fn default_profiles() -> BTreeMap<String, ProfileSettings> {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        RoutingProfile::Cheap.as_str().to_string(),
        ProfileSettings {
            preferred_models: Vec::new(),
            max_context_tokens: Some(8_192),
        },
    );
    profiles.insert(
        RoutingProfile::Balanced.as_str().to_string(),
        ProfileSettings {
            preferred_models: Vec::new(),
            max_context_tokens: Some(32_768),
        },
    );
    profiles.insert(
        RoutingProfile::Premium.as_str().to_string(),
        ProfileSettings {
            preferred_models: Vec::new(),
            max_context_tokens: Some(200_000),
        },
    );
    profiles
}

/// Everything the router needs to know about providers and profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfiguration {
    /// Used when no fallback chain entry is enabled.
    pub default_provider: Option<String>,
    /// Providers by name.
    pub providers: BTreeMap<String, ProviderSettings>,
    /// Profile settings by profile name.
    pub profiles: BTreeMap<String, ProfileSettings>,
    /// Provider names tried in order after the selected one.
    pub fallback_chain: Vec<String>,
    /// Retries of one provider before moving down the chain.
    pub retry: RetryPolicy,
    /// Fraction of `max_tokens` a phase is expected to produce.
    pub output_ratio: f64,
}

impl Default for RoutingConfiguration {
    fn default() -> Self {
        Self {
            default_provider: None,
            providers: BTreeMap::new(),
            profiles: default_profiles(),
            fallback_chain: Vec::new(),
            retry: RetryPolicy::default(),
            output_ratio: 0.5,
        }
    }
}

impl RoutingConfiguration {
    /// Add or replace a provider.
    pub fn with_provider(mut self, name: impl Into<String>, settings: ProviderSettings) -> Self {
        self.providers.insert(name.into(), settings);
        self
    }

    /// Set the fallback chain.
    pub fn with_fallback_chain<I, S>(mut self, chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_chain = chain.into_iter().map(Into::into).collect();
        self
    }

    /// Replace one profile's settings.
    pub fn with_profile(mut self, profile: RoutingProfile, settings: ProfileSettings) -> Self {
        self.profiles.insert(profile.as_str().to_string(), settings);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Settings for a profile, falling back to the built-in defaults.
    pub fn profile(&self, profile: RoutingProfile) -> ProfileSettings {
        self.profiles
            .get(profile.as_str())
            .cloned()
            .or_else(|| default_profiles().remove(profile.as_str()))
            .unwrap_or_default()
    }

    /// Price entry for a provider's model.
    pub fn pricing(&self, provider: &str, model: &str) -> Option<ModelPricing> {
        self.providers
            .get(provider)
            .and_then(|p| p.models.get(model))
            .copied()
    }

    /// Reject references to providers that are not configured.
    pub fn validate(&self) -> ConductorResult<()> {
        for name in &self.fallback_chain {
            if !self.providers.contains_key(name) {
                return Err(ConductorError::Config(format!(
                    "fallback chain references unknown provider '{name}'"
                )));
            }
        }
        if let Some(default) = &self.default_provider {
            if !self.providers.contains_key(default) {
                return Err(ConductorError::Config(format!(
                    "default provider '{default}' is not configured"
                )));
            }
        }
        for profile in self.profiles.keys() {
            profile.parse::<RoutingProfile>().map_err(|_| {
                ConductorError::Config(format!("unknown routing profile '{profile}'"))
            })?;
        }
        if !(self.output_ratio > 0.0 && self.output_ratio <= 1.0) {
            return Err(ConductorError::Config(format!(
                "output_ratio must be in (0, 1], got {}",
                self.output_ratio
            )));
        }
        Ok(())
    }
}
