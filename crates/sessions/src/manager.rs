//! Session boundary management.
//!
//! `check_boundary` runs inside the distributed boundary lock: it
//! scores the split signals, archives + replaces the session when a
//! reset fires, and hands back enough context for the caller to spawn
//! summarization and seed carryover. Archival itself never blocks on
//! summary generation — the caller owns that background task.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use mg_domain::trace::TraceEvent;
use mg_domain::Result;

use crate::boundary::{split_score, ResetKind, SplitSignals};
use crate::lock::BoundaryLock;
use crate::store::{Session, SessionRepo};

/// What the boundary check decided.
#[derive(Debug, Clone)]
pub struct BoundaryOutcome {
    pub session: Session,
    pub is_new_session: bool,
    pub reset: ResetKind,
    pub split_score: f64,
    /// The session that was archived by this boundary, if any. The
    /// caller spawns summary generation for it.
    pub archived_session_id: Option<String>,
    /// Summary of the previous session, present on SOFT resets when
    /// one was already generated.
    pub previous_summary: Option<String>,
}

pub struct SessionManager {
    repo: Arc<dyn SessionRepo>,
    lock: BoundaryLock,
}

impl SessionManager {
    pub fn new(repo: Arc<dyn SessionRepo>, lock: BoundaryLock) -> Self {
        Self { repo, lock }
    }

    pub fn repo(&self) -> &Arc<dyn SessionRepo> {
        &self.repo
    }

    /// Run the boundary check for an inbound message.
    ///
    /// Serialized per (phone, clinic) by the boundary lock; at most one
    /// session creation/archival proceeds at a time.
    pub async fn check_boundary(
        &self,
        phone: &str,
        clinic_id: &str,
        mut signals: SplitSignals,
        now: DateTime<Utc>,
    ) -> Result<BoundaryOutcome> {
        let guard = self.lock.acquire(clinic_id, phone).await?;
        let outcome = self
            .check_boundary_locked(phone, clinic_id, &mut signals, now)
            .await;
        self.lock.release(guard).await?;
        outcome
    }

    async fn check_boundary_locked(
        &self,
        phone: &str,
        clinic_id: &str,
        signals: &mut SplitSignals,
        now: DateTime<Utc>,
    ) -> Result<BoundaryOutcome> {
        let Some(current) = self.repo.find_active(phone, clinic_id).await? else {
            // First contact, or the previous session expired out of the
            // store: open fresh with hard-reset semantics.
            let session = Session::new(phone, clinic_id, now, None);
            self.repo.insert(session.clone()).await?;
            TraceEvent::SessionResolved {
                session_id: session.session_id.clone(),
                clinic_id: clinic_id.to_owned(),
                is_new: true,
            }
            .emit();
            return Ok(BoundaryOutcome {
                session,
                is_new_session: true,
                reset: ResetKind::Hard,
                split_score: 0.0,
                archived_session_id: None,
                previous_summary: None,
            });
        };

        signals.time_gap_hours =
            (now - current.last_activity_at).num_seconds() as f64 / 3600.0;
        let (score, reset) = split_score(*signals);

        match reset {
            ResetKind::None => {
                self.repo.touch(&current.session_id, now).await?;
                Ok(BoundaryOutcome {
                    session: current,
                    is_new_session: false,
                    reset: ResetKind::None,
                    split_score: score,
                    archived_session_id: None,
                    previous_summary: None,
                })
            }
            ResetKind::Soft | ResetKind::Hard => {
                self.repo.archive(&current.session_id, now).await?;

                let replacement =
                    Session::new(phone, clinic_id, now, Some(current.session_id.clone()));
                self.repo.insert(replacement.clone()).await?;

                TraceEvent::SessionReset {
                    old_session_id: current.session_id.clone(),
                    new_session_id: replacement.session_id.clone(),
                    reset: reset.to_string(),
                    split_score: score,
                }
                .emit();

                // Soft continuity: the previous summary rides along when
                // the background summarizer already produced one.
                let previous_summary = match reset {
                    ResetKind::Soft => current.summary.clone(),
                    _ => None,
                };

                Ok(BoundaryOutcome {
                    session: replacement,
                    is_new_session: true,
                    reset,
                    split_score: score,
                    archived_session_id: Some(current.session_id),
                    previous_summary,
                })
            }
        }
    }

    /// Archive a session directly (outcome events, shutdown paths).
    /// Idempotent; returns whether this call performed the archival.
    pub async fn archive(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let archived = self.repo.archive(session_id, now).await?;
        if archived {
            tracing::info!(session_id, "archived session");
        } else {
            tracing::debug!(session_id, "session already archived, skipping");
        }
        Ok(archived)
    }
}
