//! Session persistence contract and the in-memory repository.
//!
//! The relational store is an external collaborator; the gateway and
//! tests run on [`MemorySessionRepo`], a production deployment
//! implements [`SessionRepo`] over SQL. At most one *active* session
//! exists per (phone, clinic) — `insert` enforces it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use mg_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Dormant,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Pending,
    Ready,
    Failed,
}

/// A conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub phone: String,
    pub clinic_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_status: Option<SummaryStatus>,
}

impl Session {
    pub fn new(
        phone: impl Into<String>,
        clinic_id: impl Into<String>,
        now: DateTime<Utc>,
        prev_session_id: Option<String>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            phone: phone.into(),
            clinic_id: clinic_id.into(),
            state: SessionState::Active,
            started_at: now,
            last_activity_at: now,
            ended_at: None,
            prev_session_id,
            summary: None,
            summary_status: None,
        }
    }
}

/// One transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Per-episode conversation memory. Lives with the session, cleared on
/// hard reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_service_mentioned: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_status: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repository contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait SessionRepo: Send + Sync {
    /// Insert a new active session. Fails if an active session already
    /// exists for the (phone, clinic) pair.
    async fn insert(&self, session: Session) -> Result<()>;

    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    async fn find_active(&self, phone: &str, clinic_id: &str) -> Result<Option<Session>>;

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Close a session and mark its summary pending. Idempotent:
    /// returns `false` when the session was already closed.
    async fn archive(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<bool>;

    async fn store_summary(
        &self,
        session_id: &str,
        summary: Option<String>,
        status: SummaryStatus,
    ) -> Result<()>;

    async fn append_transcript(&self, session_id: &str, message: TranscriptMessage) -> Result<()>;

    /// Most recent transcript lines, newest last, bounded by an
    /// approximate token budget rather than a hard message count.
    async fn recent_transcript(
        &self,
        session_id: &str,
        token_budget: usize,
    ) -> Result<Vec<TranscriptMessage>>;

    async fn episode_state(&self, session_id: &str) -> Result<EpisodeState>;

    async fn set_episode_state(&self, session_id: &str, state: EpisodeState) -> Result<()>;

    /// Queue a promised follow-up for staff tooling to deliver.
    async fn queue_followup(&self, session_id: &str, action: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    transcripts: HashMap<String, Vec<TranscriptMessage>>,
    episodes: HashMap<String, EpisodeState>,
    followups: Vec<(String, String)>,
}

#[derive(Default)]
pub struct MemorySessionRepo {
    inner: RwLock<Inner>,
}

impl MemorySessionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued follow-ups, for tests and staff tooling.
    pub fn followups(&self) -> Vec<(String, String)> {
        self.inner.read().followups.clone()
    }
}

/// Rough token estimate: four characters per token.
fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[async_trait::async_trait]
impl SessionRepo for MemorySessionRepo {
    async fn insert(&self, session: Session) -> Result<()> {
        let mut inner = self.inner.write();
        let duplicate = inner.sessions.values().any(|s| {
            s.phone == session.phone
                && s.clinic_id == session.clinic_id
                && s.state == SessionState::Active
        });
        if duplicate {
            return Err(Error::Store(format!(
                "active session already exists for {}:{}",
                session.clinic_id, session.phone
            )));
        }
        inner.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.inner.read().sessions.get(session_id).cloned())
    }

    async fn find_active(&self, phone: &str, clinic_id: &str) -> Result<Option<Session>> {
        Ok(self
            .inner
            .read()
            .sessions
            .values()
            .find(|s| {
                s.phone == phone && s.clinic_id == clinic_id && s.state == SessionState::Active
            })
            .cloned())
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(session) = self.inner.write().sessions.get_mut(session_id) {
            session.last_activity_at = at;
        }
        Ok(())
    }

    async fn archive(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if session.state == SessionState::Closed {
            return Ok(false);
        }
        session.state = SessionState::Closed;
        session.ended_at = Some(ended_at);
        session.summary_status = Some(SummaryStatus::Pending);
        Ok(true)
    }

    async fn store_summary(
        &self,
        session_id: &str,
        summary: Option<String>,
        status: SummaryStatus,
    ) -> Result<()> {
        if let Some(session) = self.inner.write().sessions.get_mut(session_id) {
            session.summary = summary;
            session.summary_status = Some(status);
        }
        Ok(())
    }

    async fn append_transcript(&self, session_id: &str, message: TranscriptMessage) -> Result<()> {
        self.inner
            .write()
            .transcripts
            .entry(session_id.to_owned())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn recent_transcript(
        &self,
        session_id: &str,
        token_budget: usize,
    ) -> Result<Vec<TranscriptMessage>> {
        let inner = self.inner.read();
        let Some(messages) = inner.transcripts.get(session_id) else {
            return Ok(Vec::new());
        };

        let mut selected = Vec::new();
        let mut budget = token_budget;
        for message in messages.iter().rev() {
            let cost = estimate_tokens(&message.content);
            if cost > budget && !selected.is_empty() {
                break;
            }
            budget = budget.saturating_sub(cost);
            selected.push(message.clone());
            if budget == 0 {
                break;
            }
        }
        selected.reverse();
        Ok(selected)
    }

    async fn episode_state(&self, session_id: &str) -> Result<EpisodeState> {
        Ok(self
            .inner
            .read()
            .episodes
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_episode_state(&self, session_id: &str, state: EpisodeState) -> Result<()> {
        self.inner
            .write()
            .episodes
            .insert(session_id.to_owned(), state);
        Ok(())
    }

    async fn queue_followup(&self, session_id: &str, action: &str) -> Result<()> {
        self.inner
            .write()
            .followups
            .push((session_id.to_owned(), action.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_active_session_per_phone_clinic() {
        let repo = MemorySessionRepo::new();
        let now = Utc::now();
        repo.insert(Session::new("+1", "c1", now, None)).await.unwrap();

        let err = repo
            .insert(Session::new("+1", "c1", now, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));

        // A different clinic is fine.
        repo.insert(Session::new("+1", "c2", now, None)).await.unwrap();
    }

    #[tokio::test]
    async fn archive_is_idempotent() {
        let repo = MemorySessionRepo::new();
        let now = Utc::now();
        let session = Session::new("+1", "c1", now, None);
        let id = session.session_id.clone();
        repo.insert(session).await.unwrap();

        assert!(repo.archive(&id, now).await.unwrap());
        assert!(!repo.archive(&id, now).await.unwrap());

        let stored = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Closed);
        assert_eq!(stored.summary_status, Some(SummaryStatus::Pending));
    }

    #[tokio::test]
    async fn archive_frees_the_active_slot() {
        let repo = MemorySessionRepo::new();
        let now = Utc::now();
        let session = Session::new("+1", "c1", now, None);
        let id = session.session_id.clone();
        repo.insert(session).await.unwrap();
        repo.archive(&id, now).await.unwrap();

        repo.insert(Session::new("+1", "c1", now, Some(id)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transcript_honors_token_budget() {
        let repo = MemorySessionRepo::new();
        let now = Utc::now();
        for i in 0..10 {
            repo.append_transcript(
                "s1",
                TranscriptMessage {
                    role: "user".into(),
                    content: format!("message number {i} with some padding text"),
                    at: now,
                },
            )
            .await
            .unwrap();
        }

        let all = repo.recent_transcript("s1", 10_000).await.unwrap();
        assert_eq!(all.len(), 10);

        let some = repo.recent_transcript("s1", 20).await.unwrap();
        assert!(some.len() < 10);
        // Newest messages win.
        assert!(some.last().unwrap().content.contains("number 9"));
    }
}
