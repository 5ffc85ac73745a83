//! Background session summarization.
//!
//! Fired by archival; never blocks the foreground request. Reads the
//! archived session's transcript, asks the `summarization` tier for a
//! compressed record, and stores the result (or the failure) on the
//! session row.

use std::sync::Arc;

use mg_domain::llm::Message;
use mg_providers::{ChatRequest, ModelTier, ProviderRegistry, TierRegistry};
use mg_sessions::{SessionRepo, SummaryStatus};

const SUMMARY_TOKEN_BUDGET: usize = 2_000;

const SYSTEM_PROMPT: &str = "You are a medical conversation analyst. Summarize this \
patient-clinic conversation.\n\nInclude:\n1. PRIMARY INTENT: what did the patient want? \
(1 sentence)\n2. KEY INFORMATION: important details collected (2-3 bullets)\n3. OUTCOME: \
booked / cancelled / pending / incomplete\n4. UNRESOLVED: what wasn't addressed, if \
anything\n\nBe concise — 150 words maximum.";

pub struct Summarizer {
    sessions: Arc<dyn SessionRepo>,
    providers: Arc<ProviderRegistry>,
    tiers: Arc<TierRegistry>,
}

impl Summarizer {
    pub fn new(
        sessions: Arc<dyn SessionRepo>,
        providers: Arc<ProviderRegistry>,
        tiers: Arc<TierRegistry>,
    ) -> Self {
        Self {
            sessions,
            providers,
            tiers,
        }
    }

    /// Spawn summary generation for an archived session.
    pub fn spawn(self: Arc<Self>, session_id: String, clinic_id: String) {
        tokio::spawn(async move {
            if let Err(e) = self.generate_and_store(&session_id, &clinic_id).await {
                tracing::warn!(session_id, error = %e, "summary generation failed");
                let _ = self
                    .sessions
                    .store_summary(&session_id, None, SummaryStatus::Failed)
                    .await;
            }
        });
    }

    async fn generate_and_store(
        &self,
        session_id: &str,
        clinic_id: &str,
    ) -> mg_domain::Result<()> {
        let transcript = self
            .sessions
            .recent_transcript(session_id, SUMMARY_TOKEN_BUDGET)
            .await?;

        if transcript.is_empty() {
            self.sessions
                .store_summary(
                    session_id,
                    Some("Empty session - no messages exchanged".into()),
                    SummaryStatus::Ready,
                )
                .await?;
            return Ok(());
        }

        let conversation: String = transcript
            .iter()
            .map(|m| format!("{}: {}\n", m.role, m.content))
            .collect();

        let resolution = self
            .tiers
            .resolve(
                ModelTier::Summarization,
                Some(clinic_id),
                Some(session_id),
                None,
            )
            .await?;
        let adapter = self
            .providers
            .adapter(&resolution.provider, &resolution.model_name)?;

        let response = adapter
            .chat(ChatRequest {
                messages: vec![
                    Message::system(SYSTEM_PROMPT),
                    Message::user(format!("Conversation:\n{conversation}\nGenerate summary:")),
                ],
                tools: Vec::new(),
                temperature: Some(0.3),
                max_tokens: Some(300),
                json_mode: false,
                model: Some(resolution.model_name.clone()),
            })
            .await?;

        let summary = response.content.trim().to_owned();
        tracing::info!(
            session_id,
            chars = summary.len(),
            messages = transcript.len(),
            "generated session summary"
        );
        self.sessions
            .store_summary(session_id, Some(summary), SummaryStatus::Ready)
            .await
    }
}
