//! Conversation turn logging.
//!
//! One record per processed turn, written through a narrow sink so a
//! store-backed implementation can batch conversation content and
//! metrics into a single call. Logging is background work and never
//! fails the request — unless the operator set
//! `CONVERSATION_LOG_FAIL_FAST`, in which case a failed write aborts
//! the turn instead of silently dropping the record.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mg_domain::Result;

/// Everything worth keeping about one processed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub clinic_id: Uuid,
    pub message_sid: String,
    pub language: String,
    pub user_message: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
    pub fast_path: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_called: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraint_blocked: Vec<String>,
    pub hallucination_flagged: bool,
    pub at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ConversationLog: Send + Sync {
    /// Persist one turn record. Implementations over external stores
    /// are expected to fail here when the store does.
    async fn log_turn(&self, record: TurnRecord) -> Result<()>;
}

/// In-process sink backing tests and local runs.
#[derive(Default)]
pub struct MemoryConversationLog {
    records: RwLock<Vec<TurnRecord>>,
}

impl MemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TurnRecord> {
        self.records.read().clone()
    }
}

#[async_trait::async_trait]
impl ConversationLog for MemoryConversationLog {
    async fn log_turn(&self, record: TurnRecord) -> Result<()> {
        tracing::info!(
            session_id = %record.session_id,
            lane = record.lane.as_deref().unwrap_or("-"),
            fast_path = record.fast_path,
            response_chars = record.response.chars().count(),
            "conversation turn"
        );
        self.records.write().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str) -> TurnRecord {
        TurnRecord {
            session_id: session_id.into(),
            clinic_id: Uuid::new_v4(),
            message_sid: "sid-1".into(),
            language: "en".into(),
            user_message: "hi".into(),
            response: "hello".into(),
            lane: Some("complex".into()),
            fast_path: false,
            tools_called: Vec::new(),
            constraint_blocked: Vec::new(),
            hallucination_flagged: false,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_sink_keeps_records_in_order() {
        let log = MemoryConversationLog::new();
        log.log_turn(record("s1")).await.unwrap();
        log.log_turn(record("s2")).await.unwrap();

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].session_id, "s1");
        assert_eq!(records[1].session_id, "s2");
    }
}
