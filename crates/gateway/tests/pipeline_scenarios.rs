//! Full-pipeline scenarios with a scripted LLM.
//!
//! The fake provider replays scripted responses for the tool loop and
//! answers summarization prompts out-of-band, so background summary
//! tasks never consume the main script.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Utc, Weekday};
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use mg_constraints::{ConstraintExtractor, ConstraintsStore};
use mg_domain::config::Config;
use mg_domain::llm::ToolCall;
use mg_domain::Language;
use mg_gateway::directory::{
    ClinicProfile, MemoryClinicDirectory, MemoryPatientDirectory,
    PatientProfile,
};
use mg_gateway::hydrate::{ClinicCache, ContextHydrator};
use mg_gateway::language::LanguageService;
use mg_gateway::logging::{ConversationLog, MemoryConversationLog, TurnRecord};
use mg_gateway::orchestrator::{LlmOrchestrator, OrchestratorConfig};
use mg_gateway::outbound::OutboundMessenger;
use mg_gateway::pipeline::{MessagePipeline, MessageRequest};
use mg_gateway::state::AppState;
use mg_gateway::summarizer::Summarizer;
use mg_policy::canonical::bundle_digest;
use mg_policy::starter::starter_pack_bundle;
use mg_policy::PolicyCompiler;
use mg_providers::{
    ChatRequest, ChatResponse, LlmProvider, MemoryTierStore, ProviderCredentials,
    ProviderRegistry, TierRegistry,
};
use mg_scheduling::{
    DisabledCalendarSync, Doctor, DoctorSchedule, MemorySchedulingRepo, PolicySnapshot, Room,
    SchedSettings, SchedulingEngine, SchedulingRepo, Service, SnapshotStatus,
};
use mg_sessions::{BoundaryLock, MemorySessionRepo, SessionManager, SessionRepo, SummaryStatus};
use mg_store::{KvStore, MemoryKv};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FakeLlm {
    script: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeLlm {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn push_text(&self, text: &str) {
        self.script.lock().push_back(response(text, Vec::new()));
    }

    fn push_tool_call(&self, tool_name: &str, arguments: serde_json::Value) {
        let call = ToolCall {
            call_id: format!("call-{}", Uuid::new_v4()),
            tool_name: tool_name.to_owned(),
            arguments,
            provider_metadata: None,
        };
        self.script.lock().push_back(response("", vec![call]));
    }

    fn last_system_prompt(&self) -> Option<String> {
        self.requests
            .lock()
            .last()
            .and_then(|r| r.messages.first())
            .map(|m| m.content.clone())
    }
}

fn response(text: &str, tool_calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        content: text.to_owned(),
        tool_calls,
        usage: None,
        model: "fake".into(),
        finish_reason: None,
        latency_ms: 1,
    }
}

#[async_trait::async_trait]
impl LlmProvider for FakeLlm {
    async fn chat(&self, req: ChatRequest) -> mg_domain::Result<ChatResponse> {
        // Summarization prompts are answered out-of-band.
        let is_summary = req
            .messages
            .first()
            .is_some_and(|m| m.content.contains("medical conversation analyst"));
        if is_summary {
            return Ok(response("Patient asked about cleaning", Vec::new()));
        }

        self.requests.lock().push(req);
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| mg_domain::Error::Provider {
                provider: "fake".into(),
                message: "script exhausted".into(),
            })
    }

    fn provider_id(&self) -> &str {
        "fake"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    state: AppState,
    fake: Arc<FakeLlm>,
    session_repo: Arc<MemorySessionRepo>,
    scheduling: Arc<MemorySchedulingRepo>,
    patients: Arc<MemoryPatientDirectory>,
    conversation_log: Arc<MemoryConversationLog>,
    clinic_id: Uuid,
    consultation_id: Uuid,
    cleaning_id: Uuid,
}

async fn harness() -> Harness {
    harness_with_config(Config::default()).await
}

async fn harness_with_config(config: Config) -> Harness {
    let config = Arc::new(config);
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());

    let session_repo = Arc::new(MemorySessionRepo::new());
    let scheduling = Arc::new(MemorySchedulingRepo::new());
    let clinic_directory = Arc::new(MemoryClinicDirectory::new());
    let patients = Arc::new(MemoryPatientDirectory::new(Duration::from_secs(60)));

    let clinic_id = Uuid::new_v4();
    let consultation_id = Uuid::new_v4();
    let cleaning_id = Uuid::new_v4();
    let room_id = Uuid::new_v4();
    let shtern_id = Uuid::new_v4();
    let dan_id = Uuid::new_v4();

    scheduling.seed_settings(
        clinic_id,
        SchedSettings {
            timezone: "America/New_York".into(),
            grid_minutes: 30,
            ..SchedSettings::default()
        },
    );
    scheduling.seed_service(
        clinic_id,
        Service {
            id: consultation_id,
            name: "Consultation".into(),
            duration_minutes: 30,
            price: Some(60.0),
        },
    );
    scheduling.seed_service(
        clinic_id,
        Service {
            id: cleaning_id,
            name: "Limpieza dental".into(),
            duration_minutes: 45,
            price: Some(50.0),
        },
    );
    scheduling.seed_room(
        clinic_id,
        Room {
            id: room_id,
            name: "Room 1".into(),
        },
    );
    scheduling.seed_doctor(
        clinic_id,
        Doctor {
            id: shtern_id,
            name: "Dr. Shtern".into(),
            preferred_room_id: Some(room_id),
        },
        &[consultation_id, cleaning_id],
    );
    scheduling.seed_doctor(
        clinic_id,
        Doctor {
            id: dan_id,
            name: "Dr. Dan".into(),
            preferred_room_id: None,
        },
        &[consultation_id],
    );
    for doctor_id in [shtern_id, dan_id] {
        for weekday in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            scheduling.seed_schedule(
                clinic_id,
                DoctorSchedule {
                    doctor_id,
                    weekday,
                    start_hour: 8,
                    end_hour: 20,
                },
            );
        }
    }

    let bundle = starter_pack_bundle("starter-pack");
    let sha = bundle_digest(&bundle);
    let mut snapshot = PolicySnapshot::new(clinic_id, bundle, sha, 1, None);
    snapshot.status = SnapshotStatus::Active;
    scheduling.upsert_snapshot(snapshot).await.unwrap();

    clinic_directory.seed(ClinicProfile {
        clinic_id,
        name: "Test Clinic".into(),
        timezone: "America/New_York".into(),
        business_hours: "Mon–Sun 8:00–20:00".into(),
        address: "1 Main St".into(),
        service_aliases: HashMap::from([
            ("limpieza".to_owned(), cleaning_id),
            ("cleaning".to_owned(), cleaning_id),
        ]),
        currency: "USD".into(),
    });

    let fake = FakeLlm::new();
    let providers = Arc::new(ProviderRegistry::new(ProviderCredentials::default()));
    providers.register("openai", "gpt-5-mini", fake.clone());
    let tiers = Arc::new(TierRegistry::new(Box::new(MemoryTierStore::new())));

    let language = Arc::new(LanguageService::new(
        kv.clone(),
        Duration::from_secs(86_400 * 30),
    ));
    let sessions = Arc::new(SessionManager::new(
        session_repo.clone(),
        BoundaryLock::new(kv.clone(), 5_000, 4),
    ));
    let constraints = Arc::new(ConstraintsStore::new(kv.clone(), Duration::from_secs(3_600)));
    let compiler = Arc::new(PolicyCompiler::new());
    let engine = Arc::new(SchedulingEngine::new(
        scheduling.clone(),
        compiler.clone(),
        kv.clone(),
        Arc::new(DisabledCalendarSync),
    ));
    let orchestrator = Arc::new(LlmOrchestrator::new(
        providers.clone(),
        tiers.clone(),
        OrchestratorConfig {
            max_tool_turns: 5,
            tool_loop_deadline: Duration::from_secs(20),
            fallback_deadline: Duration::from_secs(10),
        },
    ));
    let summarizer = Arc::new(Summarizer::new(
        session_repo.clone(),
        providers.clone(),
        tiers.clone(),
    ));
    let clinics = Arc::new(ClinicCache::new(
        clinic_directory.clone(),
        Duration::from_secs(300),
    ));
    let hydrator = Arc::new(ContextHydrator::new(
        clinics.clone(),
        patients.clone(),
        session_repo.clone(),
        constraints.clone(),
    ));

    let conversation_log = Arc::new(MemoryConversationLog::new());
    let state = AppState {
        config,
        kv,
        session_repo: session_repo.clone(),
        scheduling_repo: scheduling.clone(),
        patients: patients.clone(),
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
        outbound: Arc::new(OutboundMessenger::new("").unwrap()),
        conversation_log: conversation_log.clone(),
    };

    Harness {
        state,
        fake,
        session_repo,
        scheduling,
        patients,
        conversation_log,
        clinic_id,
        consultation_id,
        cleaning_id,
    }
}

impl Harness {
    fn request(&self, phone: &str, body: &str) -> MessageRequest {
        MessageRequest {
            from_phone: phone.to_owned(),
            to_phone: "clinic-line".to_owned(),
            body: body.to_owned(),
            message_sid: Uuid::new_v4().to_string(),
            clinic_id: self.clinic_id,
            channel: "whatsapp".into(),
            profile_name: Some("Test Patient".into()),
            metadata: json!({}),
        }
    }

    /// Tomorrow's date in the clinic timezone, as an ISO string.
    fn tomorrow(&self) -> String {
        let tz: chrono_tz::Tz = "America/New_York".parse().unwrap();
        (Utc::now().with_timezone(&tz).date_naive() + chrono::Duration::days(1)).to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Booking happy path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn booking_happy_path() {
    let h = harness().await;
    let tomorrow = h.tomorrow();

    h.fake.push_tool_call(
        "check_availability",
        json!({
            "service_name": "Consultation",
            "doctor_name": "Shtern",
            "preferred_date": tomorrow,
        }),
    );
    h.fake.push_tool_call(
        "book_appointment",
        json!({
            "service_name": "Consultation",
            "datetime_str": format!("{tomorrow}T11:00:00"),
            "patient_info": {"name": "Test Patient"},
        }),
    );
    h.fake
        .push_text(&format!("You're booked with Dr. Shtern on {tomorrow} at 11:00."));

    let pipeline = MessagePipeline::new(h.state.clone());
    let response = pipeline
        .process(h.request("+15550001", "Book Dr. Shtern tomorrow at 11"))
        .await
        .unwrap();

    assert!(response.message.contains("11:00"), "{}", response.message);
    assert!(response.message.contains("Shtern"));
    assert_eq!(response.metadata["fast_path"], false);
    let tools = response.metadata["tools_called"].as_array().unwrap();
    assert!(tools.iter().any(|t| t == "check_availability"));
    assert!(tools.iter().any(|t| t == "book_appointment"));
    assert_eq!(response.metadata["hallucination_flagged"], false);

    // The appointment row exists, stamped with the active policy.
    let patient = h
        .state
        .patients
        .find_by_phone(h.clinic_id, "+15550001")
        .await
        .unwrap()
        .unwrap();
    let upcoming = h
        .scheduling
        .upcoming_appointments(h.clinic_id, patient.patient_id, Utc::now())
        .await
        .unwrap();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0].service_id, h.consultation_id);
    assert!(upcoming[0].policy_bundle_sha256.is_some());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Exclusion enforced mid-turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn exclusion_blocks_tool_call_and_llm_retries() {
    let h = harness().await;
    let pipeline = MessagePipeline::new(h.state.clone());
    let phone = "+15550002";

    // Turn 1: establish language and the exclusion.
    h.fake.push_text("Of course — who should I forget?");
    pipeline
        .process(h.request(phone, "Hello, I want to book a visit"))
        .await
        .unwrap();

    h.fake.push_text("Done, I won't suggest Dan again.");
    let turn2 = pipeline.process(h.request(phone, "forget Dan")).await.unwrap();
    assert_eq!(turn2.metadata["constraints_changed"], true);

    // Turn 3: the model tries Dr. Dan anyway; the gate refuses; the
    // model retries without the doctor.
    let tomorrow = h.tomorrow();
    h.fake.push_tool_call(
        "check_availability",
        json!({
            "service_name": "Consultation",
            "doctor_name": "Dan",
            "preferred_date": tomorrow,
        }),
    );
    h.fake.push_tool_call(
        "check_availability",
        json!({
            "service_name": "Consultation",
            "preferred_date": tomorrow,
        }),
    );
    h.fake
        .push_text("Dr. Dan isn't available; Dr. Shtern has openings at 11:00.");

    let turn3 = pipeline
        .process(h.request(phone, "Book me with Dr. Dan at 3"))
        .await
        .unwrap();

    let blocked = turn3.metadata["constraint_blocked"].as_array().unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0], "check_availability");
    // The block was constraint-based, not a hallucination.
    assert_eq!(turn3.metadata["hallucination_flagged"], false);

    // The exclusion is still in force afterwards.
    let block = h
        .state
        .constraints
        .get(&turn3.session_id)
        .await
        .unwrap();
    assert!(block.should_exclude_doctor(Some("Dan"), None));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fast-path price
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn fast_path_price_answers_without_llm() {
    let h = harness().await;
    let pipeline = MessagePipeline::new(h.state.clone());

    // No scripted responses: any LLM call would error the pipeline.
    let response = pipeline
        .process(h.request("+15550003", "cuánto cuesta limpieza?"))
        .await
        .unwrap();

    assert_eq!(response.detected_language, "es");
    assert_eq!(response.metadata["fast_path"], true);
    assert_eq!(response.metadata["lane"], "price");
    assert!(response.metadata["fast_path_latency_ms"].is_number());
    assert!(response.message.contains("50,00 $"), "{}", response.message);

    // Session remembers the service and the booking offer.
    let episode = h
        .session_repo
        .episode_state(&response.session_id)
        .await
        .unwrap();
    assert_eq!(
        episode.last_service_mentioned.as_deref(),
        Some(h.cleaning_id.to_string().as_str())
    );
    assert_eq!(episode.pending_action.as_deref(), Some("offer_booking"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Soft reset with summary injection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn soft_reset_creates_new_session_and_injects_summary() {
    let h = harness().await;
    let pipeline = MessagePipeline::new(h.state.clone());
    let phone = "+15550004";

    h.fake.push_text("¡Hola! ¿En qué puedo ayudarle?");
    let turn1 = pipeline
        .process(h.request(phone, "hola, quiero información"))
        .await
        .unwrap();

    // The summarizer finished for the first session.
    h.session_repo
        .store_summary(
            &turn1.session_id,
            Some("Patient asked about cleaning".into()),
            SummaryStatus::Ready,
        )
        .await
        .unwrap();

    // Simulate a 5-hour gap.
    h.session_repo
        .touch(&turn1.session_id, Utc::now() - chrono::Duration::hours(5))
        .await
        .unwrap();

    h.fake.push_text("Claro, sigamos donde quedamos.");
    let turn2 = pipeline.process(h.request(phone, "sí, sigamos")).await.unwrap();

    assert_eq!(turn2.metadata["session_reset"], "soft");
    assert_eq!(turn2.metadata["is_new_session"], true);
    assert_ne!(turn1.session_id, turn2.session_id);

    // The previous summary rode into the system prompt.
    let system = h.fake.last_system_prompt().unwrap();
    assert!(
        system.contains("Patient asked about cleaning"),
        "system prompt missing summary: {system}"
    );

    // Episode data starts fresh in the new session.
    let block = h.state.constraints.get(&turn2.session_id).await.unwrap();
    assert!(block.is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constraint echo
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn state_echo_prefixes_reply_when_constraints_changed() {
    let h = harness().await;
    let pipeline = MessagePipeline::new(h.state.clone());
    let phone = "+15550005";

    h.fake.push_text("Noted!");
    pipeline
        .process(h.request(phone, "Hello, what can you book?"))
        .await
        .unwrap();

    h.fake.push_text("Understood, no more Dan.");
    let response = pipeline.process(h.request(phone, "forget Dan")).await.unwrap();

    assert!(
        response.message.starts_with("Understood. Locking in:"),
        "{}",
        response.message
    );
    assert!(response.message.contains("Will not suggest: dan"));
    assert!(response.message.contains("Understood, no more Dan."));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Profile carryover: allergies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn allergies_survive_resets_and_reach_the_system_prompt() {
    let h = harness().await;
    let pipeline = MessagePipeline::new(h.state.clone());
    let phone = "+15550006";

    h.patients.seed(PatientProfile {
        patient_id: Uuid::new_v4(),
        phone: phone.into(),
        clinic_id: h.clinic_id,
        first_name: Some("Lea".into()),
        last_name: None,
        preferred_language: Some(Language::En),
        allergies: vec!["penicillin".into(), "lidocaine".into()],
        hard_doctor_bans: vec!["Dan".into()],
        hard_service_bans: Vec::new(),
        created_at: Utc::now(),
    });

    h.fake.push_text("Noted, how can I help?");
    let turn1 = pipeline
        .process(h.request(phone, "hello, I need an appointment"))
        .await
        .unwrap();

    let system = h.fake.last_system_prompt().unwrap();
    assert!(system.contains("penicillin"), "missing allergy: {system}");
    assert!(system.contains("lidocaine"));

    // The hard ban carried into the fresh session's constraint block.
    let block = h.state.constraints.get(&turn1.session_id).await.unwrap();
    assert!(block.should_exclude_doctor(Some("Dan"), None));

    // A hard reset later: the replacement session still carries both.
    h.session_repo
        .touch(&turn1.session_id, Utc::now() - chrono::Duration::hours(80))
        .await
        .unwrap();
    h.fake.push_text("Welcome back!");
    let turn2 = pipeline.process(h.request(phone, "hi again")).await.unwrap();

    assert_eq!(turn2.metadata["session_reset"], "hard");
    let system = h.fake.last_system_prompt().unwrap();
    assert!(system.contains("penicillin"));
    let block = h.state.constraints.get(&turn2.session_id).await.unwrap();
    assert!(block.should_exclude_doctor(Some("Dan"), None));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation logging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FailingConversationLog;

#[async_trait::async_trait]
impl ConversationLog for FailingConversationLog {
    async fn log_turn(&self, _record: TurnRecord) -> mg_domain::Result<()> {
        Err(mg_domain::Error::Store("conversation_logs insert failed".into()))
    }
}

#[tokio::test]
async fn turn_records_are_written_through_the_sink() {
    let mut config = Config::default();
    // Fail-fast also makes the write synchronous, so the record is
    // visible right after the turn.
    config.logging.conversation_log_fail_fast = true;
    let h = harness_with_config(config).await;
    let pipeline = MessagePipeline::new(h.state.clone());

    let response = pipeline
        .process(h.request("+15550007", "cuánto cuesta limpieza?"))
        .await
        .unwrap();

    let records = h.conversation_log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].session_id, response.session_id);
    assert_eq!(records[0].lane.as_deref(), Some("price"));
    assert!(records[0].fast_path);
    assert_eq!(records[0].response, response.message);
}

#[tokio::test]
async fn fail_fast_logging_error_aborts_the_reply() {
    let mut config = Config::default();
    config.logging.conversation_log_fail_fast = true;
    let h = harness_with_config(config).await;

    let mut state = h.state.clone();
    state.conversation_log = Arc::new(FailingConversationLog);
    let pipeline = MessagePipeline::new(state);

    let response = pipeline
        .process(h.request("+15550008", "cuánto cuesta limpieza?"))
        .await
        .unwrap();

    // The fast-path answer is discarded; the patient gets the fallback.
    assert!(response.message.contains("Disculpe"), "{}", response.message);
    assert!(!response.message.contains("50,00"));
}
