use std::sync::Arc;

use mg_constraints::{ConstraintExtractor, ConstraintsStore};
use mg_domain::config::Config;
use mg_policy::PolicyCompiler;
use mg_providers::{ProviderRegistry, TierRegistry};
use mg_scheduling::{SchedulingEngine, SchedulingRepo};
use mg_sessions::{SessionManager, SessionRepo};
use mg_store::KvStore;

use crate::directory::PatientDirectory;
use crate::hydrate::{ClinicCache, ContextHydrator};
use crate::language::LanguageService;
use crate::logging::ConversationLog;
use crate::orchestrator::LlmOrchestrator;
use crate::outbound::OutboundMessenger;
use crate::summarizer::Summarizer;

/// Shared application state passed to all API handlers.
///
/// Every collaborator is an explicitly-constructed `Arc`; nothing is a
/// process global, so tests wire fakes through the same front door.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── storage ───────────────────────────────────────────────────
    pub kv: Arc<dyn KvStore>,
    pub session_repo: Arc<dyn SessionRepo>,
    pub scheduling_repo: Arc<dyn SchedulingRepo>,
    pub patients: Arc<dyn PatientDirectory>,

    // ── conversation services ─────────────────────────────────────
    pub language: Arc<LanguageService>,
    pub sessions: Arc<SessionManager>,
    pub constraints: Arc<ConstraintsStore>,
    pub extractor: Arc<ConstraintExtractor>,
    pub clinics: Arc<ClinicCache>,
    pub hydrator: Arc<ContextHydrator>,

    // ── scheduling & policy ───────────────────────────────────────
    pub engine: Arc<SchedulingEngine>,
    pub compiler: Arc<PolicyCompiler>,

    // ── LLM ───────────────────────────────────────────────────────
    pub providers: Arc<ProviderRegistry>,
    pub tiers: Arc<TierRegistry>,
    pub orchestrator: Arc<LlmOrchestrator>,
    pub summarizer: Arc<Summarizer>,

    // ── transport & observability ─────────────────────────────────
    pub outbound: Arc<OutboundMessenger>,
    pub conversation_log: Arc<dyn ConversationLog>,
}
