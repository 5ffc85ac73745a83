//! The message-processing pipeline.
//!
//! A fixed, ordered sequence of steps carrying a mutable context:
//! session → hydrate → escalation check → route/fast-path →
//! constraints → narrowing → LLM/tools → post-process. Steps may halt
//! the pipeline (fast-path answered, escalation holding reply); the
//! post-processing work that still applies runs on every exit path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use mg_constraints::{ConstraintUpdate, StateEchoFormatter, TimeWindow};
use mg_domain::llm::Message;
use mg_domain::{Error, Language, Result};
use mg_sessions::{BoundaryOutcome, EpisodeState, SplitSignals, TranscriptMessage};

use crate::analyzer::{self, TurnStatus};
use crate::executor::{response_mentions_unbacked_facts, ToolExecutor};
use crate::fastpath::FastPath;
use crate::hydrate::HydratedContext;
use crate::lanes::{Lane, Router, Routing};
use crate::logging::TurnRecord;
use crate::narrowing::{self, NarrowingInstruction};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalized inbound message, whatever the transport.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRequest {
    pub from_phone: String,
    pub to_phone: String,
    pub body: String,
    #[serde(default)]
    pub message_sid: String,
    pub clinic_id: Uuid,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub profile_name: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub session_id: String,
    pub detected_language: String,
    pub metadata: Value,
}

/// Mutable state threaded through the steps.
pub struct PipelineContext {
    pub request: MessageRequest,
    pub now: DateTime<Utc>,
    pub language: Language,
    pub boundary: Option<BoundaryOutcome>,
    pub hydrated: Option<HydratedContext>,
    pub routing: Option<Routing>,
    pub narrowing: Option<NarrowingInstruction>,

    pub response: Option<String>,
    pub fast_path: bool,
    pub fast_path_latency_ms: Option<u64>,
    pub constraints_changed: bool,
    pub tools_called: Vec<String>,
    pub tools_failed: Vec<String>,
    pub constraint_blocked: Vec<String>,
    pub hallucination_flagged: bool,
    pub fell_back: bool,
    pub llm_turns: u32,
    halted: bool,
}

impl PipelineContext {
    fn new(request: MessageRequest, now: DateTime<Utc>) -> Self {
        Self {
            request,
            now,
            language: Language::default(),
            boundary: None,
            hydrated: None,
            routing: None,
            narrowing: None,
            response: None,
            fast_path: false,
            fast_path_latency_ms: None,
            constraints_changed: false,
            tools_called: Vec::new(),
            tools_failed: Vec::new(),
            constraint_blocked: Vec::new(),
            hallucination_flagged: false,
            fell_back: false,
            llm_turns: 0,
            halted: false,
        }
    }

    fn halt_with(&mut self, response: String) {
        self.response = Some(response);
        self.halted = true;
    }

    fn session_id(&self) -> &str {
        self.boundary
            .as_ref()
            .map(|b| b.session.session_id.as_str())
            .unwrap_or("")
    }
}

/// The fixed step order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Session,
    Hydrate,
    EscalationCheck,
    Routing,
    Constraints,
    Narrowing,
    Generation,
    PostProcess,
}

const STEPS: [Step; 8] = [
    Step::Session,
    Step::Hydrate,
    Step::EscalationCheck,
    Step::Routing,
    Step::Constraints,
    Step::Narrowing,
    Step::Generation,
    Step::PostProcess,
];

pub struct MessagePipeline {
    state: AppState,
}

impl MessagePipeline {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Process one inbound message end to end.
    pub async fn process(&self, request: MessageRequest) -> Result<MessageResponse> {
        let mut ctx = PipelineContext::new(request, Utc::now());

        for step in STEPS {
            // Post-processing runs even after a halt; other steps stop.
            if ctx.halted && step != Step::PostProcess {
                continue;
            }
            let result = match step {
                Step::Session => self.session_step(&mut ctx).await,
                Step::Hydrate => self.hydrate_step(&mut ctx).await,
                Step::EscalationCheck => self.escalation_check_step(&mut ctx).await,
                Step::Routing => self.routing_step(&mut ctx).await,
                Step::Constraints => self.constraints_step(&mut ctx).await,
                Step::Narrowing => self.narrowing_step(&mut ctx).await,
                Step::Generation => self.generation_step(&mut ctx).await,
                Step::PostProcess => self.postprocess_step(&mut ctx).await,
            };
            if let Err(e) = result {
                tracing::error!(step = ?step, error = %e, "pipeline step failed");
                if ctx.response.is_none() {
                    ctx.response = Some(self.state.language.fallback_reply(ctx.language));
                }
                break;
            }
        }

        Ok(MessageResponse {
            message: ctx
                .response
                .clone()
                .unwrap_or_else(|| self.state.language.fallback_reply(ctx.language)),
            session_id: ctx.session_id().to_owned(),
            detected_language: ctx.language.code().to_owned(),
            metadata: self.build_metadata(&ctx),
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 1. Session management
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn session_step(&self, ctx: &mut PipelineContext) -> Result<()> {
        ctx.language = self
            .state
            .language
            .detect_and_cache(&ctx.request.body, &ctx.request.from_phone)
            .await?;

        let explicit_reset = self
            .state
            .extractor
            .detect_meta_reset(&ctx.request.body, ctx.language);

        let clinic_id = ctx.request.clinic_id.to_string();
        let boundary = self
            .state
            .sessions
            .check_boundary(
                &ctx.request.from_phone,
                &clinic_id,
                SplitSignals {
                    explicit_reset,
                    ..Default::default()
                },
                ctx.now,
            )
            .await?;

        // Deferred summarization for whatever we archived.
        if let Some(archived) = &boundary.archived_session_id {
            self.state
                .summarizer
                .clone()
                .spawn(archived.clone(), clinic_id.clone());
        }

        // Carryover on a fresh session: profile-tier safety data only.
        // Hard bans seed the new constraint block, the preferred
        // language overrides detection, and allergies ride along in the
        // hydrated profile into every system prompt.
        if boundary.is_new_session {
            if let Some(profile) = self
                .state
                .patients
                .find_by_phone(ctx.request.clinic_id, &ctx.request.from_phone)
                .await?
            {
                if let Some(preferred) = profile.preferred_language {
                    ctx.language = preferred;
                }
                if !profile.hard_doctor_bans.is_empty() || !profile.hard_service_bans.is_empty() {
                    self.state
                        .constraints
                        .update(
                            &boundary.session.session_id,
                            ConstraintUpdate {
                                exclude_doctors: profile.hard_doctor_bans.clone(),
                                exclude_services: profile.hard_service_bans.clone(),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                tracing::debug!(
                    doctor_bans = profile.hard_doctor_bans.len(),
                    service_bans = profile.hard_service_bans.len(),
                    allergies = profile.allergies.len(),
                    "restored profile carryover into fresh session"
                );
            }
        }

        self.state
            .session_repo
            .append_transcript(
                &boundary.session.session_id,
                TranscriptMessage {
                    role: "user".into(),
                    content: ctx.request.body.clone(),
                    at: ctx.now,
                },
            )
            .await?;

        ctx.boundary = Some(boundary);
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 2. Hydration
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn hydrate_step(&self, ctx: &mut PipelineContext) -> Result<()> {
        let boundary = ctx.boundary.as_ref().expect("session step ran");
        let hydrated = self
            .state
            .hydrator
            .hydrate(
                ctx.request.clinic_id,
                &ctx.request.from_phone,
                ctx.request.profile_name.as_deref(),
                ctx.language,
                &boundary.session,
                boundary.previous_summary.clone(),
            )
            .await?;
        ctx.hydrated = Some(hydrated);
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 3. Escalation check
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn escalation_check_step(&self, ctx: &mut PipelineContext) -> Result<()> {
        let hydrated = ctx.hydrated.as_ref().expect("hydrate step ran");
        let open = self
            .state
            .scheduling_repo
            .escalations_by_status(
                ctx.request.clinic_id,
                mg_scheduling::EscalationStatus::Open,
            )
            .await?;

        let patient_id = hydrated.patient.patient_id.to_string();
        let has_open = open.iter().any(|e| {
            e.request.get("patient_id").and_then(Value::as_str) == Some(patient_id.as_str())
        });
        if has_open {
            tracing::info!(patient_id = %patient_id, "open escalation, holding reply");
            ctx.halt_with(self.state.language.holding_reply(ctx.language));
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 4. Routing + fast path
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn routing_step(&self, ctx: &mut PipelineContext) -> Result<()> {
        let hydrated = ctx.hydrated.as_ref().expect("hydrate step ran");
        let router = Router::new(&self.state.language);
        let routing = router.classify(
            &ctx.request.body,
            ctx.language,
            &hydrated.episode,
            &hydrated.clinic.service_aliases,
        );
        tracing::info!(lane = %routing.lane, reason = routing.reason, "routed");

        if matches!(routing.lane, Lane::Faq | Lane::Price | Lane::ServiceInfo) {
            let fastpath = FastPath::new(
                self.state.language.clone(),
                self.state.scheduling_repo.clone(),
            );
            if let Some(reply) = fastpath
                .handle(
                    &routing,
                    &hydrated.clinic,
                    ctx.language,
                    &hydrated.episode,
                    hydrated.patient.first_name.as_deref(),
                )
                .await
            {
                let session_id = ctx.session_id().to_owned();
                let mut episode = reply.episode.clone();
                if episode.last_service_mentioned.is_none() {
                    episode.last_service_mentioned =
                        hydrated.episode.last_service_mentioned.clone();
                }
                self.state
                    .session_repo
                    .set_episode_state(&session_id, episode)
                    .await?;

                ctx.fast_path = true;
                ctx.fast_path_latency_ms = Some(reply.latency_ms);
                ctx.routing = Some(routing);
                ctx.halt_with(reply.text);
                return Ok(());
            }
            // Template or data lookup failed: fall through to COMPLEX.
            tracing::debug!("fast path fell through to complex lane");
        }

        ctx.routing = Some(routing);
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 5. Constraint extraction
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn constraints_step(&self, ctx: &mut PipelineContext) -> Result<()> {
        let session_id = ctx.session_id().to_owned();
        let body = ctx.request.body.clone();
        let extractor = &self.state.extractor;

        if extractor.detect_meta_reset(&body, ctx.language) {
            self.state.constraints.clear(&session_id).await?;
            self.state
                .session_repo
                .set_episode_state(&session_id, EpisodeState::default())
                .await?;
            if let Some(hydrated) = ctx.hydrated.as_mut() {
                hydrated.constraints = Default::default();
                hydrated.episode = EpisodeState::default();
            }
            ctx.constraints_changed = true;
            return Ok(());
        }

        let mut update = ConstraintUpdate::default();

        // Forget patterns: the entity lands in both exclusion candidate
        // sets; the store's morphology check does the rest.
        for entity in extractor.detect_forget(&body, ctx.language) {
            update.exclude_doctors.push(entity.clone());
            update.exclude_services.push(entity);
        }

        // Switch patterns: exclude X, desire Y.
        if let Some((excluded, desired)) = extractor.detect_switch(&body, ctx.language) {
            update.exclude_doctors.push(excluded.clone());
            update.exclude_services.push(excluded);
            match self.classify_entity(ctx, &desired).await {
                EntityKind::Doctor => update.desired_doctor = Some(desired),
                EntityKind::Service => update.desired_service = Some(desired),
            }
        }

        // Date/time expressions, resolved against the clinic timezone.
        let tz: chrono_tz::Tz = ctx
            .hydrated
            .as_ref()
            .map(|h| h.clinic.timezone.parse().unwrap_or(chrono_tz::UTC))
            .unwrap_or(chrono_tz::UTC);
        let today = ctx.now.with_timezone(&tz).date_naive();

        if let Some(when) = extractor.extract_date_time(&body, today, ctx.language) {
            if let Some(date) = &when.date {
                update.time_window = Some(TimeWindow {
                    start: date.clone(),
                    end: date.clone(),
                    display: when.display.clone(),
                });
            }
        } else if let Some(window) = extractor.normalize_time_window(&body, today, ctx.language) {
            update.time_window = Some(window);
        }

        if !update.is_empty() {
            let block = self.state.constraints.update(&session_id, update).await?;
            if let Some(hydrated) = ctx.hydrated.as_mut() {
                hydrated.constraints = block;
            }
            ctx.constraints_changed = true;
        }

        Ok(())
    }

    /// Decide whether a switch target names a doctor or a service by
    /// checking it against the clinic's service catalog.
    async fn classify_entity(&self, ctx: &PipelineContext, entity: &str) -> EntityKind {
        let services = self
            .state
            .scheduling_repo
            .services(ctx.request.clinic_id)
            .await
            .unwrap_or_default();
        let entity_lower = entity.to_lowercase();
        let service_like = services.iter().any(|s| {
            let name = s.name.to_lowercase();
            name.contains(&entity_lower)
                || entity_lower.contains(&name)
                || strsim::normalized_levenshtein(&name, &entity_lower) >= 0.8
        }) || ctx.hydrated.as_ref().is_some_and(|h| {
            h.clinic
                .service_aliases
                .keys()
                .any(|alias| entity_lower.contains(alias))
        });

        if service_like {
            EntityKind::Service
        } else {
            EntityKind::Doctor
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 6. Narrowing
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn narrowing_step(&self, ctx: &mut PipelineContext) -> Result<()> {
        let hydrated = ctx.hydrated.as_ref().expect("hydrate step ran");
        ctx.narrowing = Some(narrowing::narrow(&hydrated.constraints, &hydrated.episode));
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 7. LLM generation with tools
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn generation_step(&self, ctx: &mut PipelineContext) -> Result<()> {
        let hydrated = ctx.hydrated.as_ref().expect("hydrate step ran").clone();
        let session_id = ctx.session_id().to_owned();
        let clinic_id = ctx.request.clinic_id.to_string();

        let messages = self.build_messages(ctx, &hydrated);
        let mut executor = ToolExecutor::new(
            self.state.engine.clone(),
            hydrated.clinic.clone(),
            hydrated.patient.clone(),
            session_id.clone(),
            hydrated.constraints.clone(),
            self.state.config.tools.per_turn_budget,
            self.state.config.tools.calendar_call_budget,
        );

        let outcome = match self
            .state
            .orchestrator
            .run_turn(messages.clone(), &mut executor, &clinic_id, &session_id)
            .await
        {
            Ok(outcome) if !outcome.content.trim().is_empty() => outcome,
            Ok(_) | Err(Error::Timeout(_)) => {
                tracing::warn!("tool loop empty or timed out, trying single-shot fallback");
                match self
                    .state
                    .orchestrator
                    .fallback_generate(messages, &clinic_id, &session_id)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(error = %e, "fallback generate failed");
                        ctx.fell_back = true;
                        ctx.response = Some(self.state.language.fallback_reply(ctx.language));
                        self.collect_executor(ctx, &executor);
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "tool loop failed");
                ctx.fell_back = true;
                ctx.response = Some(self.state.language.fallback_reply(ctx.language));
                self.collect_executor(ctx, &executor);
                return Ok(());
            }
        };

        self.collect_executor(ctx, &executor);
        ctx.llm_turns = outcome.turns_used;
        ctx.fell_back = outcome.fell_back;
        ctx.hallucination_flagged =
            response_mentions_unbacked_facts(&outcome.content, &ctx.tools_called);
        if ctx.hallucination_flagged {
            tracing::warn!("response states times/prices with no backing tool call");
        }
        ctx.response = Some(outcome.content);
        Ok(())
    }

    fn collect_executor(&self, ctx: &mut PipelineContext, executor: &ToolExecutor) {
        ctx.tools_called = executor.tools_called.clone();
        ctx.tools_failed = executor.tools_failed.clone();
        ctx.constraint_blocked = executor.constraint_blocked.clone();
    }

    fn build_messages(&self, ctx: &PipelineContext, hydrated: &HydratedContext) -> Vec<Message> {
        let mut system = format!(
            "You are the scheduling assistant for {clinic}. Reply in the patient's \
             language ({lang}). Be brief and warm. Never invent appointment times or \
             prices; only state what tools returned.",
            clinic = hydrated.clinic.name,
            lang = ctx.language.code(),
        );

        if !hydrated.patient.allergies.is_empty() {
            system.push_str(&format!(
                "\n\n## Patient safety\nRecorded allergies: {}. Mention them whenever a \
                 treatment is discussed and never suggest anything that conflicts.",
                hydrated.patient.allergies.join(", ")
            ));
        }

        if let Some(summary) = &hydrated.previous_summary {
            system.push_str(&format!("\n\n## Previous conversation\n{summary}"));
        }

        if let Some(instruction) = &ctx.narrowing {
            system.push('\n');
            system.push('\n');
            system.push_str(&narrowing::control_block(instruction, &hydrated.constraints));
        }

        let mut messages = vec![Message::system(system)];
        for line in &hydrated.history {
            match line.role.as_str() {
                "assistant" => messages.push(Message::assistant(line.content.clone())),
                _ => messages.push(Message::user(line.content.clone())),
            }
        }
        // The current inbound message is the last history line; make
        // sure it is present even when history was truncated away.
        let already_last = hydrated
            .history
            .last()
            .is_some_and(|m| m.content == ctx.request.body);
        if !already_last {
            messages.push(Message::user(ctx.request.body.clone()));
        }
        messages
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 8. Post-processing
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn postprocess_step(&self, ctx: &mut PipelineContext) -> Result<()> {
        let session_id = ctx.session_id().to_owned();
        if session_id.is_empty() {
            return Ok(());
        }

        // State echo: show what got locked in this turn.
        if ctx.constraints_changed && !ctx.fast_path {
            let block = self.state.constraints.get(&session_id).await?;
            if let Some(echo) = StateEchoFormatter::format(&block, ctx.language) {
                if let Some(response) = ctx.response.as_mut() {
                    *response = format!("{echo}\n\n{response}");
                }
            }
        }

        let Some(response) = ctx.response.clone() else {
            return Ok(());
        };

        // Heuristic analysis drives turn status + follow-ups.
        let analysis = analyzer::analyze(&response);
        if analysis.promises_followup {
            if let Some(action) = &analysis.followup_action {
                self.state
                    .session_repo
                    .queue_followup(&session_id, action)
                    .await?;
            }
        }

        let mut episode = self.state.session_repo.episode_state(&session_id).await?;
        episode.turn_status = Some(analysis.turn_status.as_str().to_owned());
        if analysis.turn_status == TurnStatus::Resolved {
            episode.pending_action = None;
        }
        self.state
            .session_repo
            .set_episode_state(&session_id, episode)
            .await?;

        self.state
            .session_repo
            .append_transcript(
                &session_id,
                TranscriptMessage {
                    role: "assistant".into(),
                    content: response.clone(),
                    at: Utc::now(),
                },
            )
            .await?;

        // Conversation logging is observability, not control flow —
        // unless the operator flipped fail-fast, in which case a failed
        // write aborts the turn's reply.
        let record = TurnRecord {
            session_id,
            clinic_id: ctx.request.clinic_id,
            message_sid: ctx.request.message_sid.clone(),
            language: ctx.language.code().to_owned(),
            user_message: ctx.request.body.clone(),
            response,
            lane: ctx.routing.as_ref().map(|r| r.lane.to_string()),
            fast_path: ctx.fast_path,
            tools_called: ctx.tools_called.clone(),
            constraint_blocked: ctx.constraint_blocked.clone(),
            hallucination_flagged: ctx.hallucination_flagged,
            at: Utc::now(),
        };
        if self.state.config.logging.conversation_log_fail_fast {
            if let Err(e) = self.state.conversation_log.log_turn(record).await {
                tracing::error!(error = %e, "conversation log write failed under fail-fast");
                ctx.response = None;
                return Err(e);
            }
        } else {
            let sink = self.state.conversation_log.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.log_turn(record).await {
                    tracing::error!(error = %e, "conversation log write failed");
                }
            });
        }

        Ok(())
    }

    fn build_metadata(&self, ctx: &PipelineContext) -> Value {
        json!({
            "lane": ctx.routing.as_ref().map(|r| r.lane.to_string()),
            "routing_reason": ctx.routing.as_ref().map(|r| r.reason),
            "fast_path": ctx.fast_path,
            "fast_path_latency_ms": ctx.fast_path_latency_ms,
            "session_reset": ctx.boundary.as_ref().map(|b| b.reset.to_string()),
            "is_new_session": ctx.boundary.as_ref().map(|b| b.is_new_session),
            "constraints_changed": ctx.constraints_changed,
            "tools_called": ctx.tools_called,
            "tools_failed": ctx.tools_failed,
            "constraint_blocked": ctx.constraint_blocked,
            "hallucination_flagged": ctx.hallucination_flagged,
            "llm_turns": ctx.llm_turns,
            "fell_back": ctx.fell_back,
        })
    }
}

enum EntityKind {
    Doctor,
    Service,
}
