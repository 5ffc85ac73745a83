//! Slot suggestion, holds, and confirmation.
//!
//! `suggest_slots` enumerates the (doctor, room, grid-tick) space,
//! filters by hard scheduling constraints and policy hard rules, scores
//! the survivors, and returns the top ten. `hold_slot` / `confirm_hold`
//! implement the reservation pipeline with policy limit counters and
//! full compensation on failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use mg_domain::trace::TraceEvent;
use mg_policy::{Effect, PolicyCompiler};
use mg_store::KvStore;

use crate::calendar::CalendarSync;
use crate::context::{build_slot_context, context_field_truthy};
use crate::escalation::{EscalationManager, EscalationRequest};
use crate::limits::{limit_key, LimitCounterStore, LimitReservationToken};
use crate::model::{
    Appointment, AppointmentResponse, AppointmentStatus, DateRange, HardConstraints, Hold,
    HoldResponse, SchedulingError, Slot, SuggestedSlots,
};
use crate::policy::{ActivePolicy, PolicyManager};
use crate::scorer::{PatientScoringPrefs, PreferenceScorer};
use crate::store::{Doctor, Room, SchedSettings, SchedulingRepo};

const SETTINGS_CACHE_TTL: StdDuration = StdDuration::from_secs(60);
const TOP_SLOTS: usize = 10;
/// Upper bound on the enumerated range, whatever the caller asked for.
const MAX_RANGE_DAYS: i64 = 31;

pub struct SchedulingEngine {
    repo: Arc<dyn SchedulingRepo>,
    policies: PolicyManager,
    limits: LimitCounterStore,
    escalations: EscalationManager,
    calendar: Arc<dyn CalendarSync>,
    settings_cache: Mutex<HashMap<Uuid, (SchedSettings, Instant)>>,
}

struct Candidate {
    doctor: Doctor,
    room: Room,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl SchedulingEngine {
    pub fn new(
        repo: Arc<dyn SchedulingRepo>,
        compiler: Arc<PolicyCompiler>,
        kv: Arc<dyn KvStore>,
        calendar: Arc<dyn CalendarSync>,
    ) -> Self {
        Self {
            policies: PolicyManager::new(repo.clone(), compiler),
            limits: LimitCounterStore::new(kv),
            escalations: EscalationManager::new(repo.clone()),
            calendar,
            repo,
            settings_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn repo(&self) -> &Arc<dyn SchedulingRepo> {
        &self.repo
    }

    pub fn escalations(&self) -> &EscalationManager {
        &self.escalations
    }

    /// Test hook: drop the settings cache.
    pub fn flush_settings_cache(&self) {
        self.settings_cache.lock().clear();
    }

    async fn settings(&self, clinic_id: Uuid) -> Result<SchedSettings, SchedulingError> {
        {
            let cache = self.settings_cache.lock();
            if let Some((settings, at)) = cache.get(&clinic_id) {
                if at.elapsed() < SETTINGS_CACHE_TTL {
                    return Ok(settings.clone());
                }
            }
        }

        let settings = self.repo.settings(clinic_id).await?;
        self.settings_cache
            .lock()
            .insert(clinic_id, (settings.clone(), Instant::now()));
        Ok(settings)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Slot suggestion
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn suggest_slots(
        &self,
        clinic_id: Uuid,
        service_id: Uuid,
        date_range: DateRange,
        hard_constraints: Option<&HardConstraints>,
        patient_id: Option<Uuid>,
        patient_preferences: Option<&Value>,
    ) -> Result<SuggestedSlots, SchedulingError> {
        if date_range.start_date > date_range.end_date {
            return Err(SchedulingError::InvalidRequest(
                "date_range start is after end".into(),
            ));
        }
        if (date_range.end_date - date_range.start_date).num_days() > MAX_RANGE_DAYS {
            return Err(SchedulingError::InvalidRequest(format!(
                "date_range longer than {MAX_RANGE_DAYS} days"
            )));
        }

        let settings = self.settings(clinic_id).await?;
        let tz = clinic_tz(&settings);
        tracing::info!(
            %clinic_id, %service_id,
            start = %date_range.start_date, end = %date_range.end_date,
            "suggesting slots"
        );

        let candidates = self
            .enumerate_candidates(clinic_id, service_id, date_range, &settings, tz, hard_constraints)
            .await?;
        let total_candidates = candidates.len();
        if candidates.is_empty() {
            return Err(SchedulingError::InvalidRequest(
                "no slots match the provided constraints".into(),
            ));
        }

        let valid = self
            .filter_scheduling_constraints(clinic_id, candidates, date_range, tz)
            .await?;
        tracing::debug!(total_candidates, valid = valid.len(), "constraint filter done");

        // Doctor load map shared by the policy gate and the scorer.
        let window_start = day_start(date_range.start_date, tz);
        let window_end = day_start(date_range.end_date + Duration::days(1), tz);
        let doctor_appointments = self
            .doctor_appointments(clinic_id, window_start, window_end)
            .await?;

        let active_policy = self.policies.active_policy(clinic_id).await?;

        let mut survivors: Vec<(Candidate, Value)> = Vec::new();
        for candidate in valid {
            let context = build_slot_context(
                candidate.doctor.id,
                candidate.start,
                candidate.end,
                &settings,
                tz,
                &doctor_appointments,
                patient_preferences,
                hard_constraints,
                clinic_id,
                patient_id,
                active_policy.as_ref().and_then(|p| p.tenant_id.as_deref()),
            );

            match self.hard_rule_gate(active_policy.as_ref(), &context) {
                HardGate::Pass => survivors.push((candidate, context)),
                HardGate::Drop => {}
                HardGate::Escalate { reason } => {
                    let escalation = self
                        .escalations
                        .create(
                            clinic_id,
                            escalation_request(service_id, patient_id, date_range, hard_constraints),
                            &reason,
                        )
                        .await?;
                    return Err(SchedulingError::Escalated {
                        escalation_id: escalation.id,
                        reason,
                    });
                }
            }
        }

        if survivors.is_empty() {
            let escalation = self
                .escalations
                .create(
                    clinic_id,
                    escalation_request(service_id, patient_id, date_range, hard_constraints),
                    "No available slots found matching constraints",
                )
                .await?;
            return Err(SchedulingError::NoSlotsAvailable {
                escalation_id: Some(escalation.id),
            });
        }

        // Score.
        let scorer = PreferenceScorer::new(settings.preference_weights.clone());
        let prefs = scoring_prefs(patient_preferences, hard_constraints);
        let mut slots: Vec<Slot> = survivors
            .into_iter()
            .map(|(candidate, context)| {
                let mut score = scorer.score(
                    &candidate.doctor,
                    candidate.room.id,
                    candidate.start,
                    candidate.end,
                    tz,
                    &doctor_appointments,
                    &prefs,
                );
                let mut explanations = Vec::new();

                if let Some(policy) = active_policy.as_ref() {
                    for rule in &policy.policy.soft_rules {
                        if !rule.matches(&context) {
                            continue;
                        }
                        match &rule.effect {
                            Effect::AdjustScore { delta, .. } => {
                                score += delta;
                                if let Some(explanation) = rule.explanation() {
                                    explanations.push(explanation.to_owned());
                                }
                            }
                            Effect::Warn { message, .. } => {
                                let note = rule
                                    .explanation()
                                    .or(message.as_deref())
                                    .unwrap_or(rule.rule_id.as_str());
                                explanations.push(note.to_owned());
                            }
                            _ => {}
                        }
                    }
                }

                Slot {
                    doctor_id: candidate.doctor.id,
                    doctor_name: candidate.doctor.name.clone(),
                    room_id: candidate.room.id,
                    room_name: candidate.room.name.clone(),
                    service_id,
                    start_time: candidate.start,
                    end_time: candidate.end,
                    duration_minutes: (candidate.end - candidate.start).num_minutes(),
                    score,
                    explanations,
                }
            })
            .collect();

        slots.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.start_time.cmp(&b.start_time))
        });
        slots.truncate(TOP_SLOTS);

        Ok(SuggestedSlots {
            slots,
            total_candidates_checked: total_candidates,
            date_range,
        })
    }

    async fn enumerate_candidates(
        &self,
        clinic_id: Uuid,
        service_id: Uuid,
        date_range: DateRange,
        settings: &SchedSettings,
        tz: Tz,
        hard_constraints: Option<&HardConstraints>,
    ) -> Result<Vec<Candidate>, SchedulingError> {
        let service = self
            .repo
            .service(clinic_id, service_id)
            .await?
            .ok_or_else(|| SchedulingError::InvalidRequest("unknown service".into()))?;
        let duration = Duration::minutes(service.duration_minutes as i64);

        let mut doctors = self.repo.eligible_doctors(clinic_id, service_id).await?;
        if let Some(doctor_id) = hard_constraints.and_then(|h| h.doctor_id) {
            doctors.retain(|d| d.id == doctor_id);
        }
        let mut rooms = self.repo.rooms(clinic_id).await?;
        if let Some(room_id) = hard_constraints.and_then(|h| h.room_id) {
            rooms.retain(|r| r.id == room_id);
        }
        if doctors.is_empty() || rooms.is_empty() {
            tracing::warn!(%clinic_id, %service_id, "no eligible doctors or rooms");
            return Ok(Vec::new());
        }

        let time_of_day = hard_constraints.and_then(|h| h.time_of_day);
        let mut candidates = Vec::new();
        let mut date = date_range.start_date;
        while date <= date_range.end_date {
            let mut minute = settings.open_hour * 60;
            let close_minute = settings.close_hour * 60;
            while minute < close_minute {
                let hour = minute / 60;
                if time_of_day.is_some_and(|band| !band.contains_hour(hour)) {
                    minute += settings.grid_minutes;
                    continue;
                }
                let Some(start) = local_datetime(date, hour, minute % 60, tz) else {
                    minute += settings.grid_minutes;
                    continue;
                };
                let end = start + duration;
                // The appointment must finish by closing time.
                if (minute as i64 + duration.num_minutes()) > close_minute as i64 {
                    break;
                }

                for doctor in &doctors {
                    for room in &rooms {
                        candidates.push(Candidate {
                            doctor: doctor.clone(),
                            room: room.clone(),
                            start,
                            end,
                        });
                    }
                }
                minute += settings.grid_minutes;
            }
            date += Duration::days(1);
        }

        Ok(candidates)
    }

    /// Scheduling constraints: doctor is working, not on time-off, and
    /// the room is free of appointments and active holds.
    async fn filter_scheduling_constraints(
        &self,
        clinic_id: Uuid,
        candidates: Vec<Candidate>,
        date_range: DateRange,
        tz: Tz,
    ) -> Result<Vec<Candidate>, SchedulingError> {
        let schedules = self.repo.schedules(clinic_id).await?;
        let time_off = self.repo.time_off(clinic_id).await?;
        let window_start = day_start(date_range.start_date, tz);
        let window_end = day_start(date_range.end_date + Duration::days(1), tz);
        let appointments = self
            .repo
            .appointments_in_range(clinic_id, window_start, window_end)
            .await?;
        let holds = self.repo.active_holds(clinic_id, Utc::now()).await?;

        let valid = candidates
            .into_iter()
            .filter(|c| {
                let local_start = c.start.with_timezone(&tz);
                let local_end = c.end.with_timezone(&tz);

                // Doctor schedule. A doctor without schedule rows works
                // clinic hours.
                let rows: Vec<_> = schedules.iter().filter(|s| s.doctor_id == c.doctor.id).collect();
                if !rows.is_empty() {
                    let covered = rows.iter().any(|s| {
                        s.weekday == local_start.weekday()
                            && local_start.hour() >= s.start_hour
                            && (local_end.hour() < s.end_hour
                                || (local_end.hour() == s.end_hour && local_end.minute() == 0))
                    });
                    if !covered {
                        return false;
                    }
                }

                // Time-off.
                let off = time_off
                    .iter()
                    .any(|t| t.doctor_id == c.doctor.id && t.start < c.end && c.start < t.end);
                if off {
                    return false;
                }

                // Room free of appointments.
                let booked = appointments.iter().any(|a| {
                    a.room_id == c.room.id && a.start_time < c.end && c.start < a.end_time
                });
                if booked {
                    return false;
                }

                // Room free of active holds.
                !holds
                    .iter()
                    .any(|h| h.room_id == c.room.id && h.start_time < c.end && c.start < h.end_time)
            })
            .collect();

        Ok(valid)
    }

    fn hard_rule_gate(&self, policy: Option<&ActivePolicy>, context: &Value) -> HardGate {
        let Some(policy) = policy else {
            return HardGate::Pass;
        };

        for rule in &policy.policy.hard_rules {
            if !rule.matches(context) {
                continue;
            }
            match &rule.effect {
                Effect::Deny { .. } => return HardGate::Drop,
                Effect::Escalate { .. } => {
                    return HardGate::Escalate {
                        reason: rule
                            .explanation()
                            .unwrap_or("policy escalation")
                            .to_owned(),
                    };
                }
                Effect::RequireField { field, .. } => {
                    if !context_field_truthy(context, field) {
                        return HardGate::Drop;
                    }
                }
                // Limits reserve at confirm time, never at suggest time.
                Effect::LimitOccurrence { .. } => {}
                _ => {}
            }
        }
        HardGate::Pass
    }

    async fn doctor_appointments(
        &self,
        clinic_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<Uuid, Vec<Appointment>>, SchedulingError> {
        let mut map: HashMap<Uuid, Vec<Appointment>> = HashMap::new();
        for appointment in self.repo.appointments_in_range(clinic_id, start, end).await? {
            map.entry(appointment.doctor_id).or_default().push(appointment);
        }
        Ok(map)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Holds
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create a temporary hold (idempotent on `client_hold_id`).
    pub async fn hold_slot(
        &self,
        slot: &Slot,
        client_hold_id: &str,
        patient_id: Uuid,
        clinic_id: Uuid,
        service_id: Uuid,
    ) -> Result<HoldResponse, SchedulingError> {
        let now = Utc::now();

        if let Some(existing) = self.repo.hold_by_client_id(client_hold_id, now).await? {
            tracing::info!(client_hold_id, hold_id = %existing.hold_id, "returning existing hold");
            return Ok(HoldResponse {
                hold_id: existing.hold_id,
                client_hold_id: client_hold_id.to_owned(),
                expires_at: existing.expires_at,
                slot: slot.clone(),
                is_new: false,
            });
        }

        // Re-check availability inside the hold path.
        let appointments = self
            .repo
            .appointments_in_range(clinic_id, slot.start_time, slot.end_time)
            .await?;
        let room_booked = appointments.iter().any(|a| a.room_id == slot.room_id);
        let room_held = self
            .repo
            .active_holds(clinic_id, now)
            .await?
            .iter()
            .any(|h| {
                h.room_id == slot.room_id
                    && h.start_time < slot.end_time
                    && slot.start_time < h.end_time
            });
        if room_booked || room_held {
            return Err(SchedulingError::SlotNotAvailable(
                "room already booked or held".into(),
            ));
        }

        let settings = self.settings(clinic_id).await?;
        let hold = Hold {
            hold_id: Uuid::new_v4(),
            client_hold_id: client_hold_id.to_owned(),
            clinic_id,
            patient_id,
            doctor_id: slot.doctor_id,
            doctor_name: slot.doctor_name.clone(),
            room_id: slot.room_id,
            service_id,
            start_time: slot.start_time,
            end_time: slot.end_time,
            expires_at: now + Duration::minutes(settings.hold_duration_minutes as i64),
            created_at: now,
        };
        self.repo.insert_hold(hold.clone()).await?;
        tracing::info!(hold_id = %hold.hold_id, client_hold_id, "created hold");

        Ok(HoldResponse {
            hold_id: hold.hold_id,
            client_hold_id: client_hold_id.to_owned(),
            expires_at: hold.expires_at,
            slot: slot.clone(),
            is_new: true,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Confirm
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Confirm a hold into an appointment.
    ///
    /// Order matters: limit counters are reserved before the insert,
    /// the hold row's deletion arbitrates confirm races, and every
    /// failure path releases exactly what was reserved.
    pub async fn confirm_hold(
        &self,
        hold_id: Uuid,
        patient_id: Uuid,
        service_id: Uuid,
        metadata: Option<Value>,
    ) -> Result<AppointmentResponse, SchedulingError> {
        let now = Utc::now();

        let hold = self
            .repo
            .hold(hold_id)
            .await?
            .filter(|h| h.patient_id == patient_id)
            .ok_or(SchedulingError::HoldNotFound(hold_id))?;
        if hold.expires_at <= now {
            return Err(SchedulingError::HoldExpired(hold_id));
        }

        let settings = self.settings(hold.clinic_id).await?;
        let tz = clinic_tz(&settings);
        let active_policy = self.policies.active_policy(hold.clinic_id).await?;

        let doctor_appointments = self
            .doctor_appointments(
                hold.clinic_id,
                hold.start_time - Duration::days(1),
                hold.end_time + Duration::days(1),
            )
            .await?;
        let context = build_slot_context(
            hold.doctor_id,
            hold.start_time,
            hold.end_time,
            &settings,
            tz,
            &doctor_appointments,
            metadata.as_ref(),
            None,
            hold.clinic_id,
            Some(patient_id),
            active_policy.as_ref().and_then(|p| p.tenant_id.as_deref()),
        );

        // Hard-rule gate + limit reservations.
        let mut tokens: Vec<LimitReservationToken> = Vec::new();
        if let Some(policy) = active_policy.as_ref() {
            for rule in &policy.policy.hard_rules {
                if !rule.matches(&context) {
                    continue;
                }
                match &rule.effect {
                    Effect::Deny { .. } | Effect::Escalate { .. } => {
                        self.release_all(&tokens).await;
                        return Err(SchedulingError::PolicyViolation {
                            messages: vec![rule
                                .explanation()
                                .unwrap_or("booking denied by clinic policy")
                                .to_owned()],
                        });
                    }
                    Effect::RequireField { field, .. } => {
                        if !context_field_truthy(&context, field) {
                            self.release_all(&tokens).await;
                            return Err(SchedulingError::PolicyViolation {
                                messages: vec![rule
                                    .explanation()
                                    .unwrap_or("booking is missing required information")
                                    .to_owned()],
                            });
                        }
                    }
                    Effect::LimitOccurrence {
                        window_seconds,
                        max_occurrences,
                        ..
                    } => {
                        let key = limit_key(
                            &rule.effect,
                            &rule.rule_id,
                            hold.clinic_id,
                            Some(patient_id),
                            hold.doctor_id,
                        )
                        .expect("limit effect has a key");
                        let (allowed, token, count) = self
                            .limits
                            .reserve(
                                &key,
                                StdDuration::from_secs(*window_seconds),
                                *max_occurrences,
                            )
                            .await?;
                        if !allowed {
                            tracing::warn!(rule_id = %rule.rule_id, count, "limit reservation denied");
                            self.release_all(&tokens).await;
                            return Err(SchedulingError::PolicyViolation {
                                messages: vec![rule
                                    .explanation()
                                    .unwrap_or("booking limit reached")
                                    .to_owned()],
                            });
                        }
                        if let Some(token) = token {
                            tokens.push(token);
                        }
                    }
                    _ => {}
                }
            }
        }

        // Insert, stamped with the policy in force right now.
        let appointment = Appointment {
            appointment_id: Uuid::new_v4(),
            clinic_id: hold.clinic_id,
            patient_id,
            doctor_id: hold.doctor_id,
            room_id: hold.room_id,
            service_id,
            start_time: hold.start_time,
            end_time: hold.end_time,
            status: AppointmentStatus::Scheduled,
            created_at: now,
            policy_snapshot_id: active_policy.as_ref().map(|p| p.snapshot_id),
            policy_version: active_policy.as_ref().map(|p| p.version),
            policy_bundle_sha256: active_policy.as_ref().map(|p| p.sha256.clone()),
            metadata: metadata.clone().unwrap_or(Value::Null),
        };
        let appointment_id = appointment.appointment_id;

        if !self.repo.try_insert_appointment(appointment).await? {
            self.release_all(&tokens).await;
            return Err(SchedulingError::SlotNotAvailable(
                "room was booked while the hold was pending".into(),
            ));
        }

        // The hold row's existence at delete time arbitrates races:
        // the loser compensates its insert and reports the hold gone.
        if !self.repo.delete_hold(hold_id).await? {
            self.repo.delete_appointment(appointment_id).await?;
            self.release_all(&tokens).await;
            return Err(SchedulingError::HoldNotFound(hold_id));
        }

        // Calendar sync is best-effort and never fails the confirm.
        let mut calendar_synced = false;
        let mut calendar_event_ids = None;
        match self
            .calendar
            .sync_appointment(appointment_id, hold.doctor_id, hold.start_time, hold.end_time)
            .await
        {
            Ok(result) => {
                calendar_synced = result.synced;
                calendar_event_ids = result.event_ids;
            }
            Err(e) => tracing::warn!(error = %e, "calendar sync failed (non-blocking)"),
        }

        TraceEvent::HoldConfirmed {
            appointment_id: appointment_id.to_string(),
            calendar_synced,
        }
        .emit();

        Ok(AppointmentResponse {
            appointment_id,
            slot: Slot {
                doctor_id: hold.doctor_id,
                doctor_name: hold.doctor_name.clone(),
                room_id: hold.room_id,
                room_name: String::new(),
                service_id,
                start_time: hold.start_time,
                end_time: hold.end_time,
                duration_minutes: (hold.end_time - hold.start_time).num_minutes(),
                score: 0.0,
                explanations: Vec::new(),
            },
            patient_id,
            status: AppointmentStatus::Scheduled,
            created_at: now,
            calendar_synced,
            calendar_event_ids,
        })
    }

    async fn release_all(&self, tokens: &[LimitReservationToken]) {
        for token in tokens {
            if let Err(e) = self.limits.release(token).await {
                tracing::error!(error = %e, key = %token.key, "failed to release limit token");
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Cancellation
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Cancel a patient's scheduled appointment.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self
            .repo
            .appointment(appointment_id)
            .await?
            .filter(|a| a.patient_id == patient_id)
            .ok_or_else(|| {
                SchedulingError::InvalidRequest(format!("appointment {appointment_id} not found"))
            })?;
        if appointment.status != AppointmentStatus::Scheduled {
            return Err(SchedulingError::InvalidRequest(
                "appointment is not in a cancellable state".into(),
            ));
        }
        self.repo
            .update_appointment_status(appointment_id, AppointmentStatus::Cancelled)
            .await?;
        tracing::info!(%appointment_id, "appointment cancelled");
        Ok(Appointment {
            status: AppointmentStatus::Cancelled,
            ..appointment
        })
    }
}

enum HardGate {
    Pass,
    Drop,
    Escalate { reason: String },
}

fn clinic_tz(settings: &SchedSettings) -> Tz {
    settings.timezone.parse().unwrap_or(chrono_tz::UTC)
}

fn local_datetime(
    date: chrono::NaiveDate,
    hour: u32,
    minute: u32,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    use chrono::TimeZone;
    tz.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn day_start(date: chrono::NaiveDate, tz: Tz) -> DateTime<Utc> {
    local_datetime(date, 0, 0, tz).unwrap_or_else(|| date.and_hms_opt(0, 0, 0).unwrap().and_utc())
}

fn escalation_request(
    service_id: Uuid,
    patient_id: Option<Uuid>,
    date_range: DateRange,
    hard_constraints: Option<&HardConstraints>,
) -> EscalationRequest {
    EscalationRequest {
        service_id,
        patient_id,
        date_range,
        hard_constraints: hard_constraints.cloned().unwrap_or_default(),
    }
}

fn scoring_prefs(
    patient_preferences: Option<&Value>,
    hard_constraints: Option<&HardConstraints>,
) -> PatientScoringPrefs {
    PatientScoringPrefs {
        preferred_doctor_id: patient_preferences
            .and_then(|p| p.get("preferred_doctor_id"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .or(hard_constraints.and_then(|h| h.doctor_id)),
        time_of_day: hard_constraints.and_then(|h| h.time_of_day),
    }
}
