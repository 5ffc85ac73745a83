//! LLM orchestration: tier resolution + the bounded tool-calling loop.
//!
//! The loop calls the model, dispatches any tool calls through the
//! executor in the order the model returned them, appends the assistant
//! message and the tool results, and repeats — at most
//! `max_tool_turns` times under a combined deadline. On exhaustion the
//! last content wins; on failure a tier-routed single-shot fallback
//! runs without tools.

use std::sync::Arc;
use std::time::Duration;

use mg_domain::error::{Error, Result};
use mg_domain::llm::Message;
use mg_domain::trace::TraceEvent;
use mg_providers::{ChatRequest, ModelTier, ProviderRegistry, TierRegistry};

use crate::executor::ToolExecutor;
use crate::tools;

pub struct OrchestratorConfig {
    pub max_tool_turns: u32,
    pub tool_loop_deadline: Duration,
    pub fallback_deadline: Duration,
}

pub struct LlmOrchestrator {
    providers: Arc<ProviderRegistry>,
    tiers: Arc<TierRegistry>,
    config: OrchestratorConfig,
}

/// What a turn produced.
pub struct TurnOutcome {
    pub content: String,
    pub turns_used: u32,
    pub fell_back: bool,
}

impl LlmOrchestrator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        tiers: Arc<TierRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            providers,
            tiers,
            config,
        }
    }

    /// Run the tool-calling loop for one turn.
    pub async fn run_turn(
        &self,
        mut messages: Vec<Message>,
        executor: &mut ToolExecutor,
        clinic_id: &str,
        session_id: &str,
    ) -> Result<TurnOutcome> {
        let deadline = tokio::time::Instant::now() + self.config.tool_loop_deadline;

        let resolution = self
            .tiers
            .resolve(
                ModelTier::ToolCalling,
                Some(clinic_id),
                Some(session_id),
                None,
            )
            .await?;
        let adapter = self
            .providers
            .adapter(&resolution.provider, &resolution.model_name)?;
        let tool_defs = tools::build_tool_definitions();

        let mut last_content = String::new();
        for turn in 0..self.config.max_tool_turns {
            let request = ChatRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                temperature: Some(0.3),
                max_tokens: Some(1_024),
                json_mode: false,
                model: Some(resolution.model_name.clone()),
            };

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                tracing::warn!(turn, "tool loop deadline exhausted");
                break;
            }
            let response = tokio::time::timeout(remaining, adapter.chat(request))
                .await
                .map_err(|_| Error::Timeout("tool loop LLM call".into()))??;

            TraceEvent::LlmRequest {
                provider: resolution.provider.clone(),
                model: resolution.model_name.clone(),
                tier: resolution.tier.to_string(),
                duration_ms: response.latency_ms,
                prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
                completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
            }
            .emit();

            if response.tool_calls.is_empty() {
                return Ok(TurnOutcome {
                    content: response.content,
                    turns_used: turn + 1,
                    fell_back: false,
                });
            }

            last_content = response.content.clone();
            messages.push(Message::assistant_with_tools(
                response.content,
                response.tool_calls.clone(),
            ));

            // Tool calls run in the order the model returned them;
            // prior results are visible to later tools this turn.
            for call in &response.tool_calls {
                let result = executor.execute(call).await;
                messages.push(Message::tool_result(call.call_id.clone(), result.content));
            }
        }

        // Turn limit (or deadline) exhausted: the last content stands.
        Ok(TurnOutcome {
            content: last_content,
            turns_used: self.config.max_tool_turns,
            fell_back: false,
        })
    }

    /// Single-shot fallback, tier-routed, no tools.
    pub async fn fallback_generate(
        &self,
        messages: Vec<Message>,
        clinic_id: &str,
        session_id: &str,
    ) -> Result<TurnOutcome> {
        let resolution = self
            .tiers
            .resolve(
                ModelTier::ToolCalling,
                Some(clinic_id),
                Some(session_id),
                None,
            )
            .await?;
        let adapter = self
            .providers
            .adapter(&resolution.provider, &resolution.model_name)?;

        let request = ChatRequest {
            messages,
            tools: Vec::new(),
            temperature: Some(0.3),
            max_tokens: Some(512),
            json_mode: false,
            model: Some(resolution.model_name.clone()),
        };

        let response = tokio::time::timeout(self.config.fallback_deadline, adapter.chat(request))
            .await
            .map_err(|_| Error::Timeout("fallback LLM call".into()))??;

        Ok(TurnOutcome {
            content: response.content,
            turns_used: 1,
            fell_back: true,
        })
    }
}
