use serde::Serialize;

/// Structured trace events emitted across all MedGate crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_id: String,
        clinic_id: String,
        is_new: bool,
    },
    SessionReset {
        old_session_id: String,
        new_session_id: String,
        reset: String,
        split_score: f64,
    },
    FastPath {
        lane: String,
        latency_ms: u64,
    },
    ToolBlocked {
        tool_name: String,
        reason: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        tier: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    EscalationCreated {
        escalation_id: String,
        clinic_id: String,
        reason: String,
    },
    HoldConfirmed {
        appointment_id: String,
        calendar_synced: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "mg_event");
    }
}
