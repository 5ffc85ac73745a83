//! OpenAI-compatible adapter.
//!
//! Works with OpenAI and any endpoint following the chat completions
//! contract (vLLM, Together, GLM gateways, …).

use std::time::Instant;

use serde_json::{json, Value};

use mg_domain::error::{Error, Result};
use mg_domain::llm::{Message, Role, ToolCall, ToolDefinition, Usage};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
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
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_openai).collect());
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if req.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.call_id,
                        "type": "function",
                        "function": {
                            "name": call.tool_name,
                            "arguments": call.arguments.to_string(),
                        },
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": msg.content,
                "tool_calls": tool_calls,
            })
        }
        _ => json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

/// Parse a tool call from the wire; arguments arrive as a JSON string.
fn parse_tool_call(value: &Value) -> Option<ToolCall> {
    let function = value.get("function")?;
    let arguments = function
        .get("arguments")
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| json!({}));
    Some(ToolCall {
        call_id: value.get("id")?.as_str()?.to_owned(),
        tool_name: function.get("name")?.as_str()?.to_owned(),
        arguments,
        provider_metadata: None,
    })
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());
        let body = self.build_body(&req, &model);
        let url = format!("{}/chat/completions", self.base_url);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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

        let choice = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "response without choices".into(),
            })?;
        let message = choice.get("message").cloned().unwrap_or(Value::Null);

        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
            .unwrap_or_default();

        let usage = payload.get("usage").map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            completion_tokens: u
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        });

        Ok(ChatResponse {
            content: message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            tool_calls,
            usage,
            model: payload
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&model)
                .to_owned(),
            finish_reason: choice
                .get("finish_reason")
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

    #[test]
    fn assistant_message_carries_tool_calls_on_the_wire() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall {
                call_id: "call-1".into(),
                tool_name: "check_availability".into(),
                arguments: json!({"preferred_date": "2025-11-25"}),
                provider_metadata: None,
            }],
        );
        let wire = msg_to_openai(&msg);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "check_availability");
        // Arguments are string-encoded on the OpenAI wire.
        assert!(wire["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn tool_call_arguments_parse_from_string() {
        let wire = json!({
            "id": "call-1",
            "type": "function",
            "function": {"name": "f", "arguments": "{\"a\": 1}"},
        });
        let call = parse_tool_call(&wire).unwrap();
        assert_eq!(call.arguments["a"], 1);
    }

    #[test]
    fn malformed_arguments_degrade_to_empty_object() {
        let wire = json!({
            "id": "call-1",
            "type": "function",
            "function": {"name": "f", "arguments": "not json"},
        });
        let call = parse_tool_call(&wire).unwrap();
        assert_eq!(call.arguments, json!({}));
    }
}
