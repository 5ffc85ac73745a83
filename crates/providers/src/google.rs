//! Google Gemini adapter.
//!
//! Roles map to user/model, tool calls are functionCall parts, and a
//! thought signature returned with a function call MUST be echoed back
//! on the next request or the API rejects the turn. The signature rides
//! in the tool call's opaque `provider_metadata`.

use std::time::Instant;

use serde_json::{json, Value};

use mg_domain::error::{Error, Result};
use mg_domain::llm::{Message, Role, ToolCall, Usage};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

pub struct GoogleProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl GoogleProvider {
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

    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut system = Vec::new();
        let mut contents = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system.push(msg.content.clone()),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": msg.content}],
                })),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(json!({"text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        let mut part = json!({
                            "functionCall": {
                                "name": call.tool_name,
                                "args": call.arguments,
                            },
                        });
                        // Echo the thought signature exactly as received.
                        if let Some(signature) = call
                            .provider_metadata
                            .as_ref()
                            .and_then(|m| m.get("thought_signature"))
                        {
                            part["thoughtSignature"] = signature.clone();
                        }
                        parts.push(part);
                    }
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                Role::Tool => {
                    // Function responses are keyed by name; the call id
                    // encodes "name:counter".
                    let name = msg
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| id.split(':').next())
                        .unwrap_or("tool");
                    contents.push(json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": name,
                                "response": {"content": msg.content},
                            },
                        }],
                    }));
                }
            }
        }

        let mut body = json!({"contents": contents});
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system.join("\n\n")}]});
        }

        let mut generation = json!({});
        if let Some(temperature) = req.temperature {
            generation["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            generation["maxOutputTokens"] = json!(max_tokens);
        }
        if req.json_mode {
            generation["responseMimeType"] = json!("application/json");
        }
        if generation.as_object().is_some_and(|o| !o.is_empty()) {
            body["generationConfig"] = generation;
        }

        if !req.tools.is_empty() {
            let declarations: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for GoogleProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());
        let body = self.build_body(&req);
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
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

        let candidate = payload
            .get("candidates")
            .and_then(|c| c.get(0))
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "response without candidates".into(),
            })?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for (index, part) in candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
        {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                content.push_str(text);
            }
            if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let provider_metadata = part
                    .get("thoughtSignature")
                    .map(|sig| json!({"thought_signature": sig}));
                tool_calls.push(ToolCall {
                    call_id: format!("{name}:{index}"),
                    tool_name: name,
                    arguments: call.get("args").cloned().unwrap_or(json!({})),
                    provider_metadata,
                });
            }
        }

        let usage = payload.get("usageMetadata").map(|u| {
            let prompt = u
                .get("promptTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            let completion = u
                .get("candidatesTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
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
            finish_reason: candidate
                .get("finishReason")
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

    fn provider() -> GoogleProvider {
        GoogleProvider::new(
            "google",
            "https://generativelanguage.googleapis.com",
            "k",
            "gemini-test",
        )
        .unwrap()
    }

    #[test]
    fn thought_signature_round_trips() {
        let call = ToolCall {
            call_id: "check_availability:0".into(),
            tool_name: "check_availability".into(),
            arguments: json!({"preferred_date": "2025-11-25"}),
            provider_metadata: Some(json!({"thought_signature": "sig-abc"})),
        };
        let req = ChatRequest {
            messages: vec![Message::assistant_with_tools("", vec![call])],
            ..Default::default()
        };
        let body = provider().build_body(&req);
        assert_eq!(body["contents"][0]["parts"][0]["thoughtSignature"], "sig-abc");
    }

    #[test]
    fn tool_result_uses_function_name_from_call_id() {
        let req = ChatRequest {
            messages: vec![Message::tool_result("check_availability:0", "{}")],
            ..Default::default()
        };
        let body = provider().build_body(&req);
        assert_eq!(
            body["contents"][0]["parts"][0]["functionResponse"]["name"],
            "check_availability"
        );
    }

    #[test]
    fn json_mode_maps_to_mime_type() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            json_mode: true,
            ..Default::default()
        };
        let body = provider().build_body(&req);
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }
}
