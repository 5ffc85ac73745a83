use serde::{Deserialize, Serialize};

/// Capability row for one model — every resolved tier candidate is checked
/// against this before use. Rows are authored in the store; the compiled-in
/// defaults carry their own rows so the registry works without a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapability {
    pub model_name: String,
    pub provider: String,
    pub supports_tool_calling: bool,
    #[serde(default)]
    pub supports_parallel_tools: bool,
    #[serde(default)]
    pub supports_json_mode: bool,
    /// USD per 1M input tokens.
    #[serde(default)]
    pub input_price_per_1m: f64,
    /// USD per 1M output tokens.
    #[serde(default)]
    pub output_price_per_1m: f64,
    #[serde(default)]
    pub p95_latency_ms: Option<u32>,
    #[serde(default = "d_true")]
    pub is_active: bool,
}

fn d_true() -> bool {
    true
}

impl ModelCapability {
    /// Whether this model can serve a tool-calling workload.
    pub fn usable_for_tools(&self) -> bool {
        self.is_active && self.supports_tool_calling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_model_is_not_usable() {
        let cap = ModelCapability {
            model_name: "m".into(),
            provider: "openai".into(),
            supports_tool_calling: true,
            supports_parallel_tools: false,
            supports_json_mode: true,
            input_price_per_1m: 0.1,
            output_price_per_1m: 0.4,
            p95_latency_ms: Some(900),
            is_active: false,
        };
        assert!(!cap.usable_for_tools());
    }
}
