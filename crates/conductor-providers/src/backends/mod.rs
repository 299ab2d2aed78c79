/// Anthropic Messages API backend.
pub mod claude;
/// Backend for OpenAI-compatible chat completion APIs.
pub mod openai;

use crate::config::{ProviderKind, ProviderSettings};
use crate::stream::StreamEvent;
use crate::types::{CompletionRequest, CompletionResponse, ProviderInfo};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Trait for language-model provider backends.
///
/// Each backend handles the wire protocol of one API family. The router only
/// sees this trait, so tests can substitute in-process mocks.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `Provider` for your struct
/// 3. Add the variant to `ProviderKind` in `config.rs`
/// 4. Wire it up in [`build_provider`]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name and capabilities.
    fn info(&self) -> &ProviderInfo;

    /// Non-streaming chat completion.
    async fn complete(&self, request: &CompletionRequest) -> ConductorResult<CompletionResponse>;

    /// Streaming chat completion.
    ///
    /// Returns a receiver for stream events and a join handle that resolves
    /// to the final aggregated response.
    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> ConductorResult<(
        mpsc::Receiver<StreamEvent>,
        JoinHandle<ConductorResult<CompletionResponse>>,
    )>;
}

/// Build the backend for a configured provider.
///
/// The HTTP client is shared by every backend.
pub fn build_provider(
    name: &str,
    settings: &ProviderSettings,
    http: reqwest::Client,
) -> Arc<dyn Provider> {
    let info = ProviderInfo::new(name)
        .local(settings.is_local())
        .with_model_control(settings.supports_model_control());
    match settings.kind {
        ProviderKind::Claude => Arc::new(claude::ClaudeBackend::new(info, settings, http)),
        ProviderKind::OpenAi
        | ProviderKind::OpenRouter
        | ProviderKind::Groq
        | ProviderKind::Ollama => Arc::new(openai::OpenAiBackend::new(info, settings, http)),
    }
}

/// Map a transport error so retry classification sees timeouts and
/// connection failures.
pub(crate) fn send_error(provider: &str, err: reqwest::Error) -> ConductorError {
    if err.is_timeout() {
        ConductorError::Provider(format!("{provider}: request timeout: {err}"))
    } else if err.is_connect() {
        ConductorError::Provider(format!("{provider}: connection failed: {err}"))
    } else {
        ConductorError::Http(format!("{provider}: {err}"))
    }
}

/// Drain complete lines from an SSE buffer, returning the `data:` payloads.
pub(crate) fn drain_sse_data(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(line_end) = buffer.find('\n') {
        let line = buffer[..line_end].trim().to_string();
        buffer.drain(..=line_end);

        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            payloads.push(data.trim_start().to_string());
        }
    }
    payloads
}
