use super::{drain_sse_data, send_error, Provider};
use crate::config::{ProviderKind, ProviderSettings};
use crate::estimate::{HeuristicTokenCounter, TokenCounter};
use crate::stream::StreamEvent;
use crate::types::{CompletionRequest, CompletionResponse, ProviderInfo};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, Role};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiBackend {
    info: ProviderInfo,
    kind: ProviderKind,
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// A backend for an OpenAI-compatible endpoint.
    pub fn new(info: ProviderInfo, settings: &ProviderSettings, http: reqwest::Client) -> Self {
        Self {
            info,
            kind: settings.kind,
            base_url: settings.base_url().to_string(),
            api_key: settings.api_key(),
            http,
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = &request.system_prompt {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        for m in &request.messages {
            api_messages.push(serde_json::json!({
                "role": match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                },
                "content": m.content
            }));
        }

        api_messages
    }

    fn build_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model_id,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": Self::build_messages(request),
        });
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        let request = match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        };

        // OpenRouter requires extra headers
        if matches!(self.kind, ProviderKind::OpenRouter) {
            request
                .header("HTTP-Referer", "https://github.com/fboiero/Conductor")
                .header("X-Title", "Conductor")
        } else {
            request
        }
    }

    async fn send(&self, body: &serde_json::Value) -> ConductorResult<reqwest::Response> {
        let resp = self
            .add_provider_headers(self.http.post(self.url()))
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(&self.info.name, e))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ConductorError::Provider(format!(
                "{} API error {}: {}",
                self.info.name, status, error_body
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Provider for OpenAiBackend {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn complete(&self, request: &CompletionRequest) -> ConductorResult<CompletionResponse> {
        let body = Self::build_body(request, false);
        let resp = self.send(&body).await?;

        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ConductorError::Http(e.to_string()))?;

        parse_openai_response(&resp_body, request)
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> ConductorResult<(
        mpsc::Receiver<StreamEvent>,
        JoinHandle<ConductorResult<CompletionResponse>>,
    )> {
        let body = Self::build_body(request, true);
        let resp = self.send(&body).await?;

        let (tx, rx) = mpsc::channel::<StreamEvent>(256);
        let byte_stream = resp.bytes_stream();
        let prompt_text = request.prompt_text();
        let requested_model = request.model_id.clone();

        let handle = tokio::spawn(async move {
            let mut stream = byte_stream;
            let mut model_used = requested_model;
            let mut buffer = String::new();
            let mut full_text = String::new();
            let mut usage: Option<(u64, u64)> = None;

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: format!("Stream read error: {e}"),
                            })
                            .await;
                        return Err(ConductorError::Provider(format!("Stream read error: {e}")));
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                for data in drain_sse_data(&mut buffer) {
                    if data == "[DONE]" {
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if let Some(model) = event["model"].as_str() {
                        model_used = model.to_string();
                    }

                    if let Some(parsed) = parse_usage(&event["usage"]) {
                        usage = Some(parsed);
                        let _ = tx
                            .send(StreamEvent::Usage {
                                input_tokens: parsed.0,
                                output_tokens: parsed.1,
                            })
                            .await;
                    }

                    if let Some(content) = event["choices"][0]["delta"]["content"].as_str() {
                        if !content.is_empty() {
                            full_text.push_str(content);
                            let _ = tx
                                .send(StreamEvent::TextDelta {
                                    text: content.to_string(),
                                })
                                .await;
                        }
                    }
                }
            }

            let _ = tx.send(StreamEvent::Done).await;

            let counter = HeuristicTokenCounter;
            let (input_tokens, output_tokens) = usage
                .unwrap_or_else(|| (counter.count(&prompt_text), counter.count(&full_text)));
            Ok(CompletionResponse {
                content: full_text,
                model_used,
                input_tokens,
                output_tokens,
            })
        });

        Ok((rx, handle))
    }
}

fn parse_usage(usage: &serde_json::Value) -> Option<(u64, u64)> {
    let input = usage["prompt_tokens"].as_u64()?;
    let output = usage["completion_tokens"].as_u64().unwrap_or(0);
    Some((input, output))
}

/// Parse a non-streaming chat completions body.
///
/// Token counts fall back to the heuristic counter when the server omits `usage`.
pub fn parse_openai_response(
    body: &serde_json::Value,
    request: &CompletionRequest,
) -> ConductorResult<CompletionResponse> {
    let message = &body["choices"][0]["message"];
    let content = message["content"].as_str().ok_or_else(|| {
        ConductorError::Provider(format!("Missing message content in response: {body}"))
    })?;

    let counter = HeuristicTokenCounter;
    let (input_tokens, output_tokens) = parse_usage(&body["usage"])
        .unwrap_or_else(|| (counter.count(&request.prompt_text()), counter.count(content)));

    Ok(CompletionResponse {
        content: content.to_string(),
        model_used: body["model"]
            .as_str()
            .unwrap_or(request.model_id.as_str())
            .to_string(),
        input_tokens,
        output_tokens,
    })
}
