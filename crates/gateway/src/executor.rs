//! Tool executor & per-turn state.
//!
//! Mediates every LLM-requested tool call: per-turn budget, the
//! constraint state gate, dependency ordering against this turn's
//! prior results, dispatch into the scheduling engine, and a
//! post-turn validator that flags concrete times or prices in the
//! final text without a successful tool call to back them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};
use uuid::Uuid;

use mg_constraints::ConstraintBlock;
use mg_domain::llm::ToolCall;
use mg_domain::trace::TraceEvent;
use mg_scheduling::{
    DateRange, HardConstraints, SchedulingEngine, SchedulingError, Slot, TimeOfDay,
};

use crate::directory::{ClinicProfile, PatientProfile};
use crate::gate::{GateOutcome, ToolStateGate};
use crate::tools::{
    self, BookAppointmentArgs, CancelArgs, CheckAvailabilityArgs, RescheduleArgs,
};

/// Result of one tool call, as handed back to the LLM.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

/// Audit record for one mediated call.
#[derive(Debug, Clone)]
pub struct ToolAuditEntry {
    pub tool_name: String,
    pub arguments: Value,
    pub success: bool,
    pub blocked: bool,
}

pub struct ToolExecutor {
    engine: Arc<SchedulingEngine>,
    clinic: ClinicProfile,
    patient: PatientProfile,
    session_id: String,
    constraints: ConstraintBlock,
    tz: Tz,
    budget_remaining: u32,
    /// External calendar calls allowed for this request.
    calendar_calls_remaining: u32,

    /// Successful results from earlier calls this turn, keyed by tool.
    prior_results: HashMap<String, Value>,
    pub audit: Vec<ToolAuditEntry>,
    pub tools_called: Vec<String>,
    pub tools_failed: Vec<String>,
    /// Calls the state gate refused this turn.
    pub constraint_blocked: Vec<String>,
}

impl ToolExecutor {
    pub fn new(
        engine: Arc<SchedulingEngine>,
        clinic: ClinicProfile,
        patient: PatientProfile,
        session_id: String,
        constraints: ConstraintBlock,
        budget: u32,
        calendar_budget: u32,
    ) -> Self {
        let tz = clinic.timezone.parse().unwrap_or(chrono_tz::UTC);
        Self {
            engine,
            clinic,
            patient,
            session_id,
            constraints,
            tz,
            budget_remaining: budget,
            calendar_calls_remaining: calendar_budget,
            prior_results: HashMap::new(),
            audit: Vec::new(),
            tools_called: Vec::new(),
            tools_failed: Vec::new(),
            constraint_blocked: Vec::new(),
        }
    }

    /// Run one tool call through the gate and dispatch it.
    pub async fn execute(&mut self, call: &ToolCall) -> ToolResult {
        // 1. Budget.
        if self.budget_remaining == 0 {
            return self.record_failure(
                call,
                false,
                "tool budget for this turn is exhausted; answer with what you have".into(),
            );
        }
        self.budget_remaining -= 1;

        // 2. Known tool?
        let Some(schema) = tools::schema(&call.tool_name) else {
            return self.record_failure(
                call,
                false,
                format!("unknown tool '{}'", call.tool_name),
            );
        };

        // 3. State gate for scheduling tools.
        let mut arguments = call.arguments.clone();
        if schema.is_scheduling {
            match ToolStateGate::validate(&arguments, &self.constraints) {
                GateOutcome::Allow => {}
                GateOutcome::AllowWithFixes(fixes) => {
                    if let Some(object) = arguments.as_object_mut() {
                        for (key, value) in fixes {
                            object.insert(key, value);
                        }
                    }
                }
                GateOutcome::Block { reason, fixes } => {
                    TraceEvent::ToolBlocked {
                        tool_name: call.tool_name.clone(),
                        reason: reason.clone(),
                    }
                    .emit();
                    self.constraint_blocked.push(call.tool_name.clone());
                    let mut payload = json!({
                        "error": "blocked by conversation constraints",
                        "detail": reason,
                    });
                    if !fixes.is_empty() {
                        payload["suggested_arguments"] = Value::Object(fixes);
                    }
                    return self.record_failure(call, true, payload.to_string());
                }
            }
        }

        // 4. Dependencies must have succeeded earlier this turn.
        for dependency in schema.depends_on {
            if !self.prior_results.contains_key(*dependency) {
                return self.record_failure(
                    call,
                    false,
                    format!(
                        "'{}' requires a successful '{}' call earlier in this turn",
                        call.tool_name, dependency
                    ),
                );
            }
        }

        // 5. Dispatch.
        let outcome = self.dispatch(&call.tool_name, &arguments).await;

        // 6. Record.
        match outcome {
            Ok(result) => {
                self.prior_results
                    .insert(call.tool_name.clone(), result.clone());
                self.tools_called.push(call.tool_name.clone());
                self.audit.push(ToolAuditEntry {
                    tool_name: call.tool_name.clone(),
                    arguments,
                    success: true,
                    blocked: false,
                });
                ToolResult {
                    content: result.to_string(),
                    is_error: false,
                }
            }
            Err(message) => self.record_failure_args(call, arguments, false, message),
        }
    }

    fn record_failure(&mut self, call: &ToolCall, blocked: bool, message: String) -> ToolResult {
        self.record_failure_args(call, call.arguments.clone(), blocked, message)
    }

    fn record_failure_args(
        &mut self,
        call: &ToolCall,
        arguments: Value,
        blocked: bool,
        message: String,
    ) -> ToolResult {
        self.tools_failed.push(call.tool_name.clone());
        self.audit.push(ToolAuditEntry {
            tool_name: call.tool_name.clone(),
            arguments,
            success: false,
            blocked,
        });
        ToolResult {
            content: message,
            is_error: true,
        }
    }

    /// Whether any call this turn was refused by the state gate.
    pub fn had_constraint_blocks(&self) -> bool {
        !self.constraint_blocked.is_empty()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Dispatch
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn dispatch(&mut self, tool_name: &str, arguments: &Value) -> Result<Value, String> {
        match tool_name {
            "get_services" => self.run_get_services().await,
            "check_availability" => {
                let args: CheckAvailabilityArgs = parse_args(arguments)?;
                self.run_check_availability(args).await
            }
            "book_appointment" => {
                let args: BookAppointmentArgs = parse_args(arguments)?;
                self.charge_calendar_call()?;
                self.run_book_appointment(args).await
            }
            "reschedule_appointment" => {
                let args: RescheduleArgs = parse_args(arguments)?;
                self.charge_calendar_call()?;
                self.run_reschedule(args).await
            }
            "cancel_appointment" => {
                let args: CancelArgs = parse_args(arguments)?;
                self.run_cancel(args).await
            }
            other => Err(format!("unknown tool '{other}'")),
        }
    }

    /// Confirms fan out to the external calendar; the request carries a
    /// hard budget for those calls.
    fn charge_calendar_call(&mut self) -> Result<(), String> {
        if self.calendar_calls_remaining == 0 {
            return Err(
                "calendar call budget for this request is exhausted; summarize what is \
                 already booked instead"
                    .into(),
            );
        }
        self.calendar_calls_remaining -= 1;
        Ok(())
    }

    async fn run_get_services(&self) -> Result<Value, String> {
        let services = self
            .engine
            .repo()
            .services(self.clinic.clinic_id)
            .await
            .map_err(|e| e.to_string())?;
        let rendered: Vec<Value> = services
            .iter()
            .map(|s| {
                json!({
                    "service_id": s.id.to_string(),
                    "name": s.name,
                    "duration_minutes": s.duration_minutes,
                    "price": s.price,
                })
            })
            .collect();
        Ok(json!({"services": rendered, "count": rendered.len()}))
    }

    async fn run_check_availability(
        &mut self,
        args: CheckAvailabilityArgs,
    ) -> Result<Value, String> {
        let service_id = self
            .resolve_service(args.service_id.as_deref(), args.service_name.as_deref())
            .await?;
        let doctor_id = self
            .resolve_doctor(service_id, args.doctor_id.as_deref(), args.doctor_name.as_deref())
            .await?;

        let date_range = self.resolve_date_range(args.preferred_date.as_deref())?;
        let hard_constraints = HardConstraints {
            doctor_id,
            room_id: None,
            time_of_day: args.time_of_day.as_deref().and_then(parse_time_of_day),
        };

        let preferences = json!({
            "preferred_doctor_id": doctor_id.map(|d| d.to_string()),
        });

        match self
            .engine
            .suggest_slots(
                self.clinic.clinic_id,
                service_id,
                date_range,
                Some(&hard_constraints),
                Some(self.patient.patient_id),
                Some(&preferences),
            )
            .await
        {
            Ok(suggested) => {
                let slots: Vec<Value> = suggested
                    .slots
                    .iter()
                    .map(|slot| self.render_slot(slot))
                    .collect();
                Ok(json!({
                    "service_id": service_id.to_string(),
                    "slots": slots,
                    "count": slots.len(),
                }))
            }
            Err(SchedulingError::NoSlotsAvailable { escalation_id }) => Err(json!({
                "error": "no_slots_available",
                "escalation_id": escalation_id.map(|id| id.to_string()),
                "detail": "no slots match; the clinic team was notified and will follow up",
            })
            .to_string()),
            Err(SchedulingError::Escalated { escalation_id, reason }) => Err(json!({
                "error": "escalated",
                "escalation_id": escalation_id.to_string(),
                "detail": reason,
            })
            .to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn run_book_appointment(&mut self, args: BookAppointmentArgs) -> Result<Value, String> {
        let start_time = self.parse_clinic_datetime(&args.datetime_str)?;

        // Hallucination guard: the slot must come from this turn's
        // availability results.
        let slot = self
            .find_offered_slot(start_time, args.doctor_id.as_deref())
            .ok_or_else(|| {
                format!(
                    "{} is not among the slots check_availability returned; \
                     offer the patient one of those slots",
                    args.datetime_str
                )
            })?;

        let client_hold_id = format!("{}:{}", self.session_id, start_time.timestamp());
        let hold = self
            .engine
            .hold_slot(
                &slot,
                &client_hold_id,
                self.patient.patient_id,
                self.clinic.clinic_id,
                slot.service_id,
            )
            .await
            .map_err(|e| e.to_string())?;

        let metadata = json!({
            "patient_info": args.patient_info,
            "channel": "chat",
        });
        match self
            .engine
            .confirm_hold(hold.hold_id, self.patient.patient_id, slot.service_id, Some(metadata))
            .await
        {
            Ok(response) => Ok(json!({
                "appointment_id": response.appointment_id.to_string(),
                "doctor_name": slot.doctor_name,
                "start_time": self.local_iso(slot.start_time),
                "calendar_synced": response.calendar_synced,
                "status": "scheduled",
            })),
            Err(SchedulingError::PolicyViolation { messages }) => Err(json!({
                "error": "policy_violation",
                "detail": messages,
            })
            .to_string()),
            Err(SchedulingError::HoldExpired(_)) => {
                Err("the slot hold expired; re-check availability and pick again".into())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    async fn run_reschedule(&mut self, args: RescheduleArgs) -> Result<Value, String> {
        // Find the appointment being moved.
        let upcoming = self
            .engine
            .repo()
            .upcoming_appointments(self.clinic.clinic_id, self.patient.patient_id, Utc::now())
            .await
            .map_err(|e| e.to_string())?;
        let current = match args.appointment_id.as_deref().and_then(|id| id.parse::<Uuid>().ok()) {
            Some(id) => upcoming.iter().find(|a| a.appointment_id == id),
            None => upcoming.first(),
        }
        .ok_or("no upcoming appointment to reschedule")?
        .clone();

        // Book the new slot first so a failed booking leaves the old
        // appointment untouched.
        let booked = self
            .run_book_appointment(BookAppointmentArgs {
                service_id: Some(current.service_id.to_string()),
                service_name: args.service_name,
                datetime_str: args.datetime_str,
                doctor_id: args.doctor_id,
                doctor_name: args.doctor_name,
                patient_info: None,
            })
            .await?;

        self.engine
            .cancel_appointment(current.appointment_id, self.patient.patient_id)
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "rescheduled": true,
            "previous_appointment_id": current.appointment_id.to_string(),
            "new": booked,
        }))
    }

    async fn run_cancel(&mut self, args: CancelArgs) -> Result<Value, String> {
        let upcoming = self
            .engine
            .repo()
            .upcoming_appointments(self.clinic.clinic_id, self.patient.patient_id, Utc::now())
            .await
            .map_err(|e| e.to_string())?;
        let target = match args.appointment_id.as_deref().and_then(|id| id.parse::<Uuid>().ok()) {
            Some(id) => upcoming.iter().find(|a| a.appointment_id == id),
            None => upcoming.first(),
        }
        .ok_or("no upcoming appointment to cancel")?;

        let cancelled = self
            .engine
            .cancel_appointment(target.appointment_id, self.patient.patient_id)
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "cancelled": true,
            "appointment_id": cancelled.appointment_id.to_string(),
            "reason": args.reason,
        }))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Resolution helpers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn resolve_service(
        &self,
        service_id: Option<&str>,
        service_name: Option<&str>,
    ) -> Result<Uuid, String> {
        if let Some(id) = service_id.and_then(|id| id.parse::<Uuid>().ok()) {
            return Ok(id);
        }

        let services = self
            .engine
            .repo()
            .services(self.clinic.clinic_id)
            .await
            .map_err(|e| e.to_string())?;

        // Name match, then alias match, then the session's desired
        // service.
        let wanted = service_name
            .map(str::to_owned)
            .or_else(|| self.constraints.desired_service.clone())
            .ok_or("no service specified; ask the patient which service they want")?;
        let wanted_lower = wanted.to_lowercase();

        if let Some(service) = services.iter().find(|s| {
            let name = s.name.to_lowercase();
            name == wanted_lower || name.contains(&wanted_lower) || wanted_lower.contains(&name)
        }) {
            return Ok(service.id);
        }
        if let Some((alias, id)) = self
            .clinic
            .service_aliases
            .iter()
            .find(|(alias, _)| wanted_lower.contains(*alias))
        {
            tracing::debug!(%alias, "service resolved via alias");
            return Ok(*id);
        }
        if let Some(service) = services
            .iter()
            .find(|s| strsim::normalized_levenshtein(&s.name.to_lowercase(), &wanted_lower) >= 0.8)
        {
            return Ok(service.id);
        }

        Err(format!(
            "service '{wanted}' not found; use get_services to list what the clinic offers"
        ))
    }

    async fn resolve_doctor(
        &self,
        service_id: Uuid,
        doctor_id: Option<&str>,
        doctor_name: Option<&str>,
    ) -> Result<Option<Uuid>, String> {
        if let Some(id) = doctor_id.and_then(|id| id.parse::<Uuid>().ok()) {
            return Ok(Some(id));
        }
        let Some(name) = doctor_name.filter(|n| !n.trim().is_empty()) else {
            return Ok(None);
        };

        let doctors = self
            .engine
            .repo()
            .eligible_doctors(self.clinic.clinic_id, service_id)
            .await
            .map_err(|e| e.to_string())?;

        let name_lower = name.to_lowercase();
        let matched = doctors.iter().find(|d| {
            let candidate = d.name.to_lowercase();
            candidate.contains(&name_lower)
                || name_lower.contains(&candidate)
                || candidate
                    .split_whitespace()
                    .any(|part| strsim::levenshtein(part, &name_lower) <= 2)
        });

        match matched {
            Some(doctor) => Ok(Some(doctor.id)),
            None => Err(format!(
                "doctor '{name}' is not available for this service; \
                 check availability without a doctor to see alternatives"
            )),
        }
    }

    fn resolve_date_range(&self, preferred_date: Option<&str>) -> Result<DateRange, String> {
        if let Some(date) = preferred_date {
            let parsed = date
                .parse()
                .map_err(|_| format!("invalid preferred_date '{date}', expected YYYY-MM-DD"))?;
            return Ok(DateRange::single(parsed));
        }
        if let Some(window) = &self.constraints.time_window {
            if let (Ok(start), Ok(end)) = (window.start.parse(), window.end.parse()) {
                return Ok(DateRange {
                    start_date: start,
                    end_date: end,
                });
            }
        }
        // Default: the next three days in clinic time.
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        Ok(DateRange {
            start_date: today,
            end_date: today + chrono::Duration::days(3),
        })
    }

    fn parse_clinic_datetime(&self, datetime_str: &str) -> Result<chrono::DateTime<Utc>, String> {
        let naive: NaiveDateTime = datetime_str
            .parse()
            .or_else(|_| NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%dT%H:%M"))
            .map_err(|_| {
                format!("invalid datetime_str '{datetime_str}', expected YYYY-MM-DDTHH:MM:SS")
            })?;
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| format!("'{datetime_str}' is not a valid clinic-local time"))
    }

    /// Find a slot offered by this turn's check_availability result.
    fn find_offered_slot(
        &self,
        start_time: chrono::DateTime<Utc>,
        doctor_id: Option<&str>,
    ) -> Option<Slot> {
        let offered = self.prior_results.get("check_availability")?;
        let slots = offered.get("slots")?.as_array()?;
        let wanted_doctor = doctor_id.and_then(|id| id.parse::<Uuid>().ok());

        for slot in slots {
            let Some(slot_start) = slot
                .get("start_time_utc")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<chrono::DateTime<Utc>>().ok())
            else {
                continue;
            };
            if slot_start != start_time {
                continue;
            }
            let Some(slot_doctor) = slot
                .get("doctor_id")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Uuid>().ok())
            else {
                continue;
            };
            if wanted_doctor.is_some_and(|d| d != slot_doctor) {
                continue;
            }
            let (Some(room_id), Some(service_id), Some(end_time)) = (
                slot.get("room_id")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Uuid>().ok()),
                slot.get("service_id")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Uuid>().ok()),
                slot.get("end_time_utc")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<chrono::DateTime<Utc>>().ok()),
            ) else {
                continue;
            };
            return Some(Slot {
                doctor_id: slot_doctor,
                doctor_name: slot
                    .get("doctor_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                room_id,
                room_name: String::new(),
                service_id,
                start_time: slot_start,
                end_time,
                duration_minutes: (end_time - slot_start).num_minutes(),
                score: 0.0,
                explanations: Vec::new(),
            });
        }
        None
    }

    fn render_slot(&self, slot: &Slot) -> Value {
        json!({
            "start_time": self.local_iso(slot.start_time),
            "start_time_utc": slot.start_time.to_rfc3339(),
            "end_time_utc": slot.end_time.to_rfc3339(),
            "doctor_id": slot.doctor_id.to_string(),
            "doctor_name": slot.doctor_name,
            "room_id": slot.room_id.to_string(),
            "service_id": slot.service_id.to_string(),
            "score": slot.score,
            "notes": slot.explanations,
        })
    }

    fn local_iso(&self, at: chrono::DateTime<Utc>) -> String {
        at.with_timezone(&self.tz)
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T, String> {
    serde_json::from_value(arguments.clone()).map_err(|e| format!("invalid arguments: {e}"))
}

fn parse_time_of_day(raw: &str) -> Option<TimeOfDay> {
    match raw {
        "morning" => Some(TimeOfDay::Morning),
        "afternoon" => Some(TimeOfDay::Afternoon),
        "evening" => Some(TimeOfDay::Evening),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Post-turn response validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flags a final response that states concrete times or prices without
/// a successful tool call this turn to back them.
pub fn response_mentions_unbacked_facts(response: &str, tools_called: &[String]) -> bool {
    let backed = tools_called.iter().any(|t| {
        matches!(
            t.as_str(),
            "check_availability" | "book_appointment" | "reschedule_appointment" | "get_services"
        )
    });
    if backed {
        return false;
    }

    let has_time = regex::Regex::new(r"\b\d{1,2}:\d{2}\b")
        .expect("static pattern")
        .is_match(response);
    let has_price = regex::Regex::new(r"[$€₽₪]\s?\d+|\d+[.,]\d{2}\s?[$€₽₪]")
        .expect("static pattern")
        .is_match(response);

    has_time || has_price
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbacked_time_is_flagged() {
        assert!(response_mentions_unbacked_facts(
            "We can see you tomorrow at 11:00.",
            &[]
        ));
    }

    #[test]
    fn backed_time_is_fine() {
        assert!(!response_mentions_unbacked_facts(
            "We can see you tomorrow at 11:00.",
            &["check_availability".to_owned()]
        ));
    }

    #[test]
    fn unbacked_price_is_flagged() {
        assert!(response_mentions_unbacked_facts("It costs $50 per visit.", &[]));
        assert!(response_mentions_unbacked_facts("Cuesta 50,00 $ aprox.", &[]));
    }

    #[test]
    fn plain_text_is_fine() {
        assert!(!response_mentions_unbacked_facts(
            "Which service would you like to book?",
            &[]
        ));
    }
}
