//! Anthropic Messages API adapter.
//!
//! System prompts ride in a dedicated field, tool results are content
//! blocks on a user message, and `json_mode` is sanitized away (the
//! API has no response-format switch).

use std::time::Instant;

use serde_json::{json, Value};

use mg_domain::error::{Error, Result};
use mg_domain::llm::{Message, Role, ToolCall, Usage};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 2048;

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest, model: &str) -> Value {
        let mut system = Vec::new();
        let mut messages = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system.push(msg.content.clone()),
                Role::User => messages.push(json!({"role": "user", "content": msg.content})),
                Role::Assistant => {
                    let mut content = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(json!({"type": "text", "text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        content.push(json!({
                            "type": "tool_use",
                            "id": call.call_id,
                            "name": call.tool_name,
                            "input": call.arguments,
                        }));
                    }
                    messages.push(json!({"role": "assistant", "content": content}));
                }
                Role::Tool => {
                    messages.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": msg.tool_call_id,
                            "content": msg.content,
                        }],
                    }));
                }
            }
        }

        let mut body = json!({
            "model": model,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.join("\n\n"));
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = json!(temperature);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if req.json_mode {
            // No JSON mode on this API; drop the flag rather than fail.
            tracing::debug!(provider = %self.id, "dropping unsupported json_mode parameter");
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());
        let body = self.build_body(&req, &model);
        let url = format!("{}/v1/messages", self.base_url);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("{status}: {payload}"),
            });
        }

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in payload
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    content.push_str(block.get("text").and_then(Value::as_str).unwrap_or(""));
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCall {
                        call_id: block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                        tool_name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                        arguments: block.get("input").cloned().unwrap_or(json!({})),
                        provider_metadata: None,
                    });
                }
                _ => {}
            }
        }

        let usage = payload.get("usage").map(|u| {
            let prompt = u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
            let completion = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
            Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        });

        Ok(ChatResponse {
            content,
            tool_calls,
            usage,
            model,
            finish_reason: payload
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(str::to_owned),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("anthropic", "https://api.anthropic.com", "k", "claude-test")
            .unwrap()
    }

    #[test]
    fn system_messages_move_to_the_system_field() {
        let req = ChatRequest {
            messages: vec![Message::system("rules"), Message::user("hi")],
            ..Default::default()
        };
        let body = provider().build_body(&req, "claude-test");
        assert_eq!(body["system"], "rules");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_results_become_user_content_blocks() {
        let req = ChatRequest {
            messages: vec![Message::tool_result("call-1", "{\"ok\":true}")],
            ..Default::default()
        };
        let body = provider().build_body(&req, "claude-test");
        let block = &body["messages"][0]["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "call-1");
    }

    #[test]
    fn json_mode_is_sanitized_away() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            json_mode: true,
            ..Default::default()
        };
        let body = provider().build_body(&req, "claude-test");
        assert!(body.get("response_format").is_none());
    }
}
