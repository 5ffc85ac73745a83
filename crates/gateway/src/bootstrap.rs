//! Wiring: build the application state from configuration.
//!
//! Every collaborator is constructed here and nowhere else. The store
//! implementations are the in-memory ones; a deployment backed by SQL
//! and Redis implements the same traits and swaps them in this one
//! place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Weekday;
use uuid::Uuid;

use mg_constraints::{ConstraintExtractor, ConstraintsStore};
use mg_domain::config::Config;
use mg_policy::{canonical::bundle_digest, starter::starter_pack_bundle, PolicyCompiler};
use mg_providers::{
    MemoryTierStore, ProviderCredentials, ProviderRegistry, TierRegistry,
};
use mg_scheduling::{
    DisabledCalendarSync, Doctor, DoctorSchedule, MemorySchedulingRepo, PolicySnapshot, Room,
    SchedSettings, SchedulingEngine, SchedulingRepo, Service, SnapshotStatus,
};
use mg_sessions::{BoundaryLock, MemorySessionRepo, SessionManager};
use mg_store::{KvStore, MemoryKv};

use crate::directory::{
    ClinicProfile, MemoryClinicDirectory, MemoryPatientDirectory,
};
use crate::hydrate::{ClinicCache, ContextHydrator};
use crate::language::LanguageService;
use crate::logging::MemoryConversationLog;
use crate::orchestrator::{LlmOrchestrator, OrchestratorConfig};
use crate::outbound::OutboundMessenger;
use crate::state::AppState;
use crate::summarizer::Summarizer;

/// Build the full application state.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let session_repo = Arc::new(MemorySessionRepo::new());
    let scheduling_memory = Arc::new(MemorySchedulingRepo::new());
    let scheduling_repo: Arc<dyn SchedulingRepo> = scheduling_memory.clone();
    let clinic_directory = Arc::new(MemoryClinicDirectory::new());
    let patients = Arc::new(MemoryPatientDirectory::new(Duration::from_secs(
        config.caches.patient_upsert_cache_seconds,
    )));

    let language = Arc::new(LanguageService::new(
        kv.clone(),
        Duration::from_secs(config.caches.language_cache_ttl_days * 86_400),
    ));

    let sessions = Arc::new(SessionManager::new(
        session_repo.clone(),
        BoundaryLock::new(
            kv.clone(),
            config.sessions.boundary_lock_ttl_ms,
            config.sessions.boundary_lock_retries,
        ),
    ));

    let constraints = Arc::new(ConstraintsStore::new(
        kv.clone(),
        Duration::from_secs(config.constraints.ttl_secs),
    ));

    let compiler = Arc::new(PolicyCompiler::new());
    let engine = Arc::new(SchedulingEngine::new(
        scheduling_repo.clone(),
        compiler.clone(),
        kv.clone(),
        Arc::new(DisabledCalendarSync),
    ));

    let providers = Arc::new(ProviderRegistry::new(ProviderCredentials::from_env()));
    let tiers = Arc::new(TierRegistry::new(Box::new(MemoryTierStore::new())));

    let orchestrator = Arc::new(LlmOrchestrator::new(
        providers.clone(),
        tiers.clone(),
        OrchestratorConfig {
            max_tool_turns: config.llm.max_tool_turns,
            tool_loop_deadline: Duration::from_secs(config.llm.tool_loop_deadline_secs),
            fallback_deadline: Duration::from_secs(config.llm.fallback_deadline_secs),
        },
    ));

    let summarizer = Arc::new(Summarizer::new(
        session_repo.clone(),
        providers.clone(),
        tiers.clone(),
    ));

    let clinics = Arc::new(ClinicCache::new(
        clinic_directory.clone(),
        Duration::from_secs(config.caches.clinic_warm_ttl_seconds),
    ));
    let hydrator = Arc::new(ContextHydrator::new(
        clinics.clone(),
        patients.clone(),
        session_repo.clone(),
        constraints.clone(),
    ));

    let outbound = Arc::new(OutboundMessenger::new(config.transport.base_url.clone())?);

    if !config.pipeline.enabled {
        tracing::warn!(
            "ENABLE_PIPELINE is off; the legacy processor no longer exists, \
             the pipeline handles all traffic regardless"
        );
    }

    let state = AppState {
        config,
        kv,
        session_repo,
        scheduling_repo,
        patients,
        language,
        sessions,
        constraints,
        extractor: Arc::new(ConstraintExtractor::new()),
        clinics,
        hydrator,
        engine,
        compiler,
        providers,
        tiers,
        orchestrator,
        summarizer,
        outbound,
        conversation_log: Arc::new(MemoryConversationLog::new()),
    };

    seed_demo_clinic(&state, &scheduling_memory, &clinic_directory).await;
    Ok(state)
}

/// Seed the default clinic so a fresh process answers immediately.
async fn seed_demo_clinic(
    state: &AppState,
    memory: &MemorySchedulingRepo,
    directory: &MemoryClinicDirectory,
) {
    let clinic_id: Uuid = state
        .config
        .transport
        .default_clinic_id
        .parse()
        .unwrap_or_else(|_| Uuid::nil());

    let consultation = Uuid::new_v4();
    let cleaning = Uuid::new_v4();

    memory.seed_settings(
        clinic_id,
        SchedSettings {
            timezone: "America/New_York".into(),
            grid_minutes: 30,
            ..SchedSettings::default()
        },
    );
    memory.seed_service(
        clinic_id,
        Service {
            id: consultation,
            name: "Consultation".into(),
            duration_minutes: 30,
            price: Some(60.0),
        },
    );
    memory.seed_service(
        clinic_id,
        Service {
            id: cleaning,
            name: "Deep Cleaning".into(),
            duration_minutes: 45,
            price: Some(50.0),
        },
    );

    let room = Uuid::new_v4();
    memory.seed_room(
        clinic_id,
        Room {
            id: room,
            name: "Room 1".into(),
        },
    );

    let shtern = Uuid::new_v4();
    memory.seed_doctor(
        clinic_id,
        Doctor {
            id: shtern,
            name: "Dr. Shtern".into(),
            preferred_room_id: Some(room),
        },
        &[consultation, cleaning],
    );
    for weekday in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ] {
        memory.seed_schedule(
            clinic_id,
            DoctorSchedule {
                doctor_id: shtern,
                weekday,
                start_hour: 8,
                end_hour: 20,
            },
        );
    }

    let bundle = starter_pack_bundle("starter-pack");
    let sha = bundle_digest(&bundle);
    let mut snapshot = PolicySnapshot::new(clinic_id, bundle, sha, 1, None);
    snapshot.status = SnapshotStatus::Active;
    if let Err(e) = memory.upsert_snapshot(snapshot).await {
        tracing::warn!(error = %e, "failed to seed starter policy");
    }

    directory.seed(ClinicProfile {
        clinic_id,
        name: "MedGate Demo Clinic".into(),
        timezone: "America/New_York".into(),
        business_hours: "Mon–Fri 8:00–20:00".into(),
        address: "1 Main St".into(),
        service_aliases: HashMap::from([
            ("limpieza".to_owned(), cleaning),
            ("cleaning".to_owned(), cleaning),
            ("чистка".to_owned(), cleaning),
            ("consultation".to_owned(), consultation),
            ("consulta".to_owned(), consultation),
        ]),
        currency: "USD".into(),
    });

    tracing::info!(%clinic_id, "seeded demo clinic");
}
