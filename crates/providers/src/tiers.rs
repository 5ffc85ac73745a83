//! Semantic model tiers.
//!
//! Code addresses models by tier, never by name. Tier names are stored
//! in the database as strings: renaming one is a data migration, treat
//! the wire values as stable API.

use serde::{Deserialize, Serialize};

use mg_domain::capability::ModelCapability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Fast, cheap: classification, routing, simple decisions.
    Routing,
    /// Reliable function calling, structured output.
    ToolCalling,
    /// Complex analysis, extraction, multi-step reasoning.
    Reasoning,
    /// Session summaries, context compression.
    Summarization,
    /// Image/PDF processing, vision tasks.
    Multimodal,
    /// Latency-critical voice agents. Reserved.
    Voice,
}

impl ModelTier {
    pub const ALL: [ModelTier; 6] = [
        ModelTier::Routing,
        ModelTier::ToolCalling,
        ModelTier::Reasoning,
        ModelTier::Summarization,
        ModelTier::Multimodal,
        ModelTier::Voice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Routing => "routing",
            ModelTier::ToolCalling => "tool_calling",
            ModelTier::Reasoning => "reasoning",
            ModelTier::Summarization => "summarization",
            ModelTier::Multimodal => "multimodal",
            ModelTier::Voice => "voice",
        }
    }

    /// The `TIER_<NAME>_MODEL` environment override for this tier.
    pub fn env_var(self) -> String {
        format!("TIER_{}_MODEL", self.as_str().to_uppercase())
    }

    /// Compiled-in default (model, provider) — the safety net that must
    /// work with no store and no environment.
    pub fn default_model(self) -> (&'static str, &'static str) {
        match self {
            ModelTier::Routing => ("gpt-5-mini", "openai"),
            ModelTier::ToolCalling => ("gpt-5-mini", "openai"),
            ModelTier::Reasoning => ("gemini-3-flash-preview", "google"),
            ModelTier::Summarization => ("gpt-5-mini", "openai"),
            ModelTier::Multimodal => ("gemini-3-flash-preview", "google"),
            ModelTier::Voice => ("gpt-5-mini", "openai"),
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability rows for the compiled-in defaults.
pub fn builtin_capabilities() -> Vec<ModelCapability> {
    vec![
        ModelCapability {
            model_name: "gpt-5-mini".into(),
            provider: "openai".into(),
            supports_tool_calling: true,
            supports_parallel_tools: true,
            supports_json_mode: true,
            input_price_per_1m: 0.25,
            output_price_per_1m: 2.0,
            p95_latency_ms: Some(1_800),
            is_active: true,
        },
        ModelCapability {
            model_name: "gemini-3-flash-preview".into(),
            provider: "google".into(),
            supports_tool_calling: true,
            supports_parallel_tools: true,
            supports_json_mode: true,
            input_price_per_1m: 0.3,
            output_price_per_1m: 2.5,
            p95_latency_ms: Some(2_200),
            is_active: true,
        },
    ]
}

/// Infer a provider from a model name (environment overrides carry no
/// provider column).
pub fn infer_provider(model_name: &str) -> &'static str {
    let model = model_name.to_lowercase();
    if model.contains("gpt") || model.starts_with("o1") {
        "openai"
    } else if model.contains("gemini") {
        "google"
    } else if model.contains("claude") {
        "anthropic"
    } else if model.contains("glm") {
        "glm"
    } else if model.contains("deepseek") {
        "deepseek"
    } else {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_names() {
        assert_eq!(ModelTier::ToolCalling.env_var(), "TIER_TOOL_CALLING_MODEL");
        assert_eq!(ModelTier::Routing.env_var(), "TIER_ROUTING_MODEL");
    }

    #[test]
    fn provider_inference() {
        assert_eq!(infer_provider("gpt-5-mini"), "openai");
        assert_eq!(infer_provider("gemini-3-flash-preview"), "google");
        assert_eq!(infer_provider("claude-sonnet"), "anthropic");
        assert_eq!(infer_provider("mystery-model"), "openai");
    }

    #[test]
    fn every_tier_has_a_builtin_capability_row() {
        let capabilities = builtin_capabilities();
        for tier in ModelTier::ALL {
            let (model, _) = tier.default_model();
            assert!(
                capabilities.iter().any(|c| c.model_name == model),
                "missing capability row for {model}"
            );
        }
    }
}
