use super::{drain_sse_data, send_error, Provider};
use crate::config::ProviderSettings;
use crate::stream::StreamEvent;
use crate::types::{CompletionRequest, CompletionResponse, ProviderInfo};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, Role};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Claude (Anthropic) Messages API backend.
pub struct ClaudeBackend {
    info: ProviderInfo,
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl ClaudeBackend {
    /// A backend for the Anthropic Messages API.
    pub fn new(info: ProviderInfo, settings: &ProviderSettings, http: reqwest::Client) -> Self {
        Self {
            info,
            base_url: settings.base_url().to_string(),
            api_key: settings.api_key(),
            http,
        }
    }

    fn build_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        // System messages are folded into the top-level `system` field.
        let mut system: Vec<&str> = request.system_prompt.iter().map(String::as_str).collect();
        let api_messages: Vec<ClaudeMessage> = request
            .messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => {
                    system.push(&m.content);
                    None
                }
                Role::User => Some(ClaudeMessage {
                    role: "user",
                    content: &m.content,
                }),
                Role::Assistant => Some(ClaudeMessage {
                    role: "assistant",
                    content: &m.content,
                }),
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model_id,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": api_messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> ConductorResult<reqwest::Response> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ConductorError::Provider(format!("{}: missing API key", self.info.name))
        })?;

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
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
impl Provider for ClaudeBackend {
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

        parse_claude_response(&resp_body, &request.model_id)
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
        let requested_model = request.model_id.clone();

        let handle = tokio::spawn(async move {
            let mut stream = byte_stream;
            let mut buffer = String::new();
            let mut full_text = String::new();
            let mut model_used = requested_model;
            let mut input_tokens = 0u64;
            let mut output_tokens = 0u64;

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
                    let event: serde_json::Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    match event["type"].as_str().unwrap_or("") {
                        "message_start" => {
                            let message = &event["message"];
                            if let Some(model) = message["model"].as_str() {
                                model_used = model.to_string();
                            }
                            input_tokens = message["usage"]["input_tokens"].as_u64().unwrap_or(0);
                        }

                        "content_block_delta" => {
                            let delta = &event["delta"];
                            if delta["type"].as_str() == Some("text_delta") {
                                if let Some(text) = delta["text"].as_str() {
                                    full_text.push_str(text);
                                    let _ = tx
                                        .send(StreamEvent::TextDelta {
                                            text: text.to_string(),
                                        })
                                        .await;
                                }
                            }
                        }

                        "message_delta" => {
                            if let Some(n) = event["usage"]["output_tokens"].as_u64() {
                                output_tokens = n;
                                let _ = tx
                                    .send(StreamEvent::Usage {
                                        input_tokens,
                                        output_tokens,
                                    })
                                    .await;
                            }
                        }

                        "message_stop" => {
                            let _ = tx.send(StreamEvent::Done).await;
                        }

                        "error" => {
                            let message = event["error"]["message"]
                                .as_str()
                                .unwrap_or("unknown stream error")
                                .to_string();
                            let _ = tx
                                .send(StreamEvent::Error {
                                    message: message.clone(),
                                })
                                .await;
                            return Err(ConductorError::Provider(message));
                        }

                        _ => {}
                    }
                }
            }

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

// -- Claude wire types --

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Parse a non-streaming Messages API response body.
pub fn parse_claude_response(
    body: &serde_json::Value,
    requested_model: &str,
) -> ConductorResult<CompletionResponse> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| ConductorError::Provider("Missing content in Claude response".into()))?;

    let text: Vec<&str> = content
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .collect();

    Ok(CompletionResponse {
        content: text.join("\n"),
        model_used: body["model"].as_str().unwrap_or(requested_model).to_string(),
        input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::Message;

    #[test]
    fn test_parse_claude_response() {
        let body = serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"}
            ],
            "usage": {"input_tokens": 40, "output_tokens": 9}
        });
        let resp = parse_claude_response(&body, "claude-sonnet-4").unwrap();
        assert_eq!(resp.content, "first\nsecond");
        assert_eq!(resp.model_used, "claude-sonnet-4-20250514");
        assert_eq!(resp.input_tokens, 40);
        assert_eq!(resp.output_tokens, 9);
    }

    #[test]
    fn test_parse_claude_response_missing_content() {
        let body = serde_json::json!({"type": "error"});
        assert!(parse_claude_response(&body, "m").is_err());
    }

    #[test]
    fn test_system_messages_move_to_system_field() {
        let mut req = CompletionRequest::new("claude-sonnet-4", "question")
            .with_system_prompt(Some("phase rules".into()));
        req.messages.insert(0, Message::system("shared memory"));

        let body = ClaudeBackend::build_body(&req, false);
        assert_eq!(body["system"], "phase rules\n\nshared memory");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert!(body.get("stream").is_none());
    }
}
