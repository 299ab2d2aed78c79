use conductor_core::Message;
use serde::{Deserialize, Serialize};

/// Static capabilities of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Name the provider is registered under in the routing configuration.
    pub name: String,
    /// Runs on this machine; local calls are priced at zero.
    pub is_local: bool,
    /// Can load or switch models on demand (e.g. Ollama).
    pub supports_model_control: bool,
}

impl ProviderInfo {
    /// A remote provider without model control.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_local: false,
            supports_model_control: false,
        }
    }

    /// Mark the provider as running on this machine.
    pub fn local(mut self, is_local: bool) -> Self {
        self.is_local = is_local;
        self
    }

    /// Mark the provider as able to load models on demand.
    pub fn with_model_control(mut self, supports: bool) -> Self {
        self.supports_model_control = supports;
        self
    }
}

/// A single chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to call.
    pub model_id: String,
    /// Sent before the messages, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Conversation so far; one user message per phase.
    pub messages: Vec<Message>,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl CompletionRequest {
    /// A request for a single user prompt with default sampling settings.
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            system_prompt: None,
            messages: vec![Message::user(prompt)],
            max_tokens: 2048,
            temperature: 0.7,
        }
    }

    /// Set or clear the system prompt.
    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    /// Set the completion token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// All prompt text (system prompt plus messages), used when the backend
    /// does not report token usage.
    pub fn prompt_text(&self) -> String {
        let mut text = self.system_prompt.clone().unwrap_or_default();
        for m in &self.messages {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&m.content);
        }
        text
    }
}

/// The aggregated result of a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text.
    pub content: String,
    /// Model reported by the provider.
    pub model_used: String,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}
