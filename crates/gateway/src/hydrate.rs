//! Context hydration.
//!
//! One parallel fetch per request assembles everything the pipeline
//! needs: clinic profile, patient, constraint block, episode state, and
//! recent history (token-budgeted). Clinic profiles sit in a warm
//! per-process cache; stale entries are served immediately and
//! refreshed off-path, throttled by a per-clinic in-flight flag.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use mg_constraints::{ConstraintBlock, ConstraintsStore};
use mg_domain::{Error, Language, Result};
use mg_sessions::{EpisodeState, Session, SessionRepo, TranscriptMessage};

use crate::directory::{ClinicDirectory, ClinicProfile, PatientDirectory, PatientProfile};

/// Token budget for the history slice handed to the LLM.
const HISTORY_TOKEN_BUDGET: usize = 1_500;

/// The immutable context object consumed by the rest of the pipeline.
#[derive(Clone)]
pub struct HydratedContext {
    pub clinic: ClinicProfile,
    pub patient: PatientProfile,
    pub constraints: ConstraintBlock,
    pub episode: EpisodeState,
    pub history: Vec<TranscriptMessage>,
    /// Summary of the previous session, present after a soft reset.
    pub previous_summary: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Warm clinic cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ClinicCache {
    directory: Arc<dyn ClinicDirectory>,
    warm_ttl: Duration,
    entries: Mutex<HashMap<Uuid, (ClinicProfile, Instant)>>,
    refreshing: Arc<Mutex<HashSet<Uuid>>>,
}

impl ClinicCache {
    pub fn new(directory: Arc<dyn ClinicDirectory>, warm_ttl: Duration) -> Self {
        Self {
            directory,
            warm_ttl,
            entries: Mutex::new(HashMap::new()),
            refreshing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Fetch a clinic, serving a stale cached copy while a background
    /// task refreshes it.
    pub async fn get(self: &Arc<Self>, clinic_id: Uuid) -> Result<Option<ClinicProfile>> {
        let cached = self.entries.lock().get(&clinic_id).cloned();
        if let Some((profile, at)) = cached {
            if at.elapsed() >= self.warm_ttl {
                self.spawn_refresh(clinic_id);
            }
            return Ok(Some(profile));
        }

        let Some(profile) = self.directory.clinic(clinic_id).await? else {
            return Ok(None);
        };
        self.entries
            .lock()
            .insert(clinic_id, (profile.clone(), Instant::now()));
        Ok(Some(profile))
    }

    fn spawn_refresh(self: &Arc<Self>, clinic_id: Uuid) {
        // One refresh in flight per clinic.
        if !self.refreshing.lock().insert(clinic_id) {
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            match cache.directory.clinic(clinic_id).await {
                Ok(Some(profile)) => {
                    cache
                        .entries
                        .lock()
                        .insert(clinic_id, (profile, Instant::now()));
                    tracing::debug!(%clinic_id, "refreshed warm clinic cache");
                }
                Ok(None) => {
                    cache.entries.lock().remove(&clinic_id);
                }
                Err(e) => tracing::warn!(%clinic_id, error = %e, "warm refresh failed"),
            }
            cache.refreshing.lock().remove(&clinic_id);
        });
    }

    /// Test hook: drop all cached clinics.
    pub fn flush(&self) {
        self.entries.lock().clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hydrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ContextHydrator {
    clinics: Arc<ClinicCache>,
    patients: Arc<dyn PatientDirectory>,
    sessions: Arc<dyn SessionRepo>,
    constraints: Arc<ConstraintsStore>,
}

impl ContextHydrator {
    pub fn new(
        clinics: Arc<ClinicCache>,
        patients: Arc<dyn PatientDirectory>,
        sessions: Arc<dyn SessionRepo>,
        constraints: Arc<ConstraintsStore>,
    ) -> Self {
        Self {
            clinics,
            patients,
            sessions,
            constraints,
        }
    }

    /// Fetch everything in parallel and assemble one context object.
    pub async fn hydrate(
        &self,
        clinic_id: Uuid,
        phone: &str,
        profile_name: Option<&str>,
        language: Language,
        session: &Session,
        previous_summary: Option<String>,
    ) -> Result<HydratedContext> {
        let session_id = session.session_id.as_str();

        let (clinic, patient, constraints, episode, history) = tokio::join!(
            self.clinics.get(clinic_id),
            self.patients.upsert(clinic_id, phone, profile_name, language),
            self.constraints.get(session_id),
            self.sessions.episode_state(session_id),
            self.sessions.recent_transcript(session_id, HISTORY_TOKEN_BUDGET),
        );

        let clinic = clinic?
            .ok_or_else(|| Error::Store(format!("unknown clinic {clinic_id}")))?;

        Ok(HydratedContext {
            clinic,
            patient: patient?,
            constraints: constraints?,
            episode: episode?,
            history: history?,
            previous_summary,
        })
    }
}
