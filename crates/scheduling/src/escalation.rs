//! Escalation management.
//!
//! When auto-scheduling fails (zero slots, ESCALATE rule), a record
//! goes to the staff queue with up to five auto-generated relaxation
//! suggestions and a 24-hour SLA. Duplicate escalations for the same
//! (patient, service) within 24 hours collapse onto the existing row.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use mg_domain::trace::TraceEvent;

use crate::model::{
    DateRange, Escalation, EscalationStatus, HardConstraints, SchedulingError, Suggestion,
};
use crate::store::SchedulingRepo;

const SLA_HOURS: i64 = 24;
const MAX_SUGGESTIONS: usize = 5;
const DUPLICATE_WINDOW_HOURS: i64 = 24;

/// The scheduling request an escalation preserves for staff.
#[derive(Debug, Clone)]
pub struct EscalationRequest {
    pub service_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub date_range: DateRange,
    pub hard_constraints: HardConstraints,
}

impl EscalationRequest {
    fn to_value(&self) -> Value {
        json!({
            "service_id": self.service_id.to_string(),
            "patient_id": self.patient_id.map(|p| p.to_string()),
            "date_range": {
                "start_date": self.date_range.start_date.to_string(),
                "end_date": self.date_range.end_date.to_string(),
            },
            "hard_constraints": serde_json::to_value(&self.hard_constraints)
                .unwrap_or(Value::Null),
        })
    }
}

pub struct EscalationManager {
    repo: Arc<dyn SchedulingRepo>,
}

impl EscalationManager {
    pub fn new(repo: Arc<dyn SchedulingRepo>) -> Self {
        Self { repo }
    }

    /// Create an escalation, or return the recent open duplicate.
    pub async fn create(
        &self,
        clinic_id: Uuid,
        request: EscalationRequest,
        reason: &str,
    ) -> Result<Escalation, SchedulingError> {
        let now = Utc::now();

        let since = now - Duration::hours(DUPLICATE_WINDOW_HOURS);
        if let Some(existing) = self
            .repo
            .recent_open_escalation(clinic_id, request.patient_id, request.service_id, since)
            .await?
        {
            tracing::info!(escalation_id = %existing.id, "duplicate escalation suppressed");
            return Ok(existing);
        }

        let escalation = Escalation {
            id: Uuid::new_v4(),
            clinic_id,
            status: EscalationStatus::Open,
            request: request.to_value(),
            reason: reason.to_owned(),
            suggestions: generate_suggestions(&request),
            sla_deadline: now + Duration::hours(SLA_HOURS),
            created_at: now,
            assigned_to: None,
            resolution: None,
        };

        self.repo.insert_escalation(escalation.clone()).await?;
        TraceEvent::EscalationCreated {
            escalation_id: escalation.id.to_string(),
            clinic_id: clinic_id.to_string(),
            reason: reason.to_owned(),
        }
        .emit();

        Ok(escalation)
    }

    pub async fn get(&self, id: Uuid) -> Result<Escalation, SchedulingError> {
        self.repo
            .escalation(id)
            .await?
            .ok_or(SchedulingError::EscalationNotFound(id))
    }

    pub async fn queue(
        &self,
        clinic_id: Uuid,
        status: EscalationStatus,
    ) -> Result<Vec<Escalation>, SchedulingError> {
        Ok(self.repo.escalations_by_status(clinic_id, status).await?)
    }

    pub async fn assign(&self, id: Uuid, assignee: &str) -> Result<Escalation, SchedulingError> {
        let mut escalation = self.get(id).await?;
        escalation.status = EscalationStatus::Assigned;
        escalation.assigned_to = Some(assignee.to_owned());
        self.repo.update_escalation(escalation.clone()).await?;
        Ok(escalation)
    }

    /// Record a resolution (a confirmed appointment, or a staff-picked
    /// suggestion). Booking itself runs through the normal confirm path
    /// before this is called.
    pub async fn resolve(
        &self,
        id: Uuid,
        resolution: Value,
    ) -> Result<Escalation, SchedulingError> {
        let mut escalation = self.get(id).await?;
        escalation.status = EscalationStatus::Resolved;
        escalation.resolution = Some(resolution);
        self.repo.update_escalation(escalation.clone()).await?;
        Ok(escalation)
    }

    pub async fn decline(&self, id: Uuid, reason: &str) -> Result<Escalation, SchedulingError> {
        let mut escalation = self.get(id).await?;
        escalation.status = EscalationStatus::Declined;
        escalation.resolution = Some(json!({"declined_reason": reason}));
        self.repo.update_escalation(escalation.clone()).await?;
        Ok(escalation)
    }
}

/// Relaxation strategies, in order of preference. Conditional
/// strategies drop out; the result is always a prefix-consistent list
/// of at most five.
fn generate_suggestions(request: &EscalationRequest) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();
    let base = request.to_value();

    // 1. Expand date range +3 days.
    suggestions.push(Suggestion {
        strategy: "expanded_date_range_3d".into(),
        request: with_end_date(&base, request.date_range.end_date + Duration::days(3)),
        description: "Try dates 3 days later than your preferred range".into(),
    });

    // 2. Drop time-of-day preference.
    if request.hard_constraints.time_of_day.is_some() {
        let mut relaxed = base.clone();
        relaxed["hard_constraints"]["time_of_day"] = Value::Null;
        suggestions.push(Suggestion {
            strategy: "remove_time_preference".into(),
            request: relaxed,
            description: "Try any time of day (morning, afternoon, or evening)".into(),
        });
    }

    // 3. Drop doctor preference.
    if request.hard_constraints.doctor_id.is_some() {
        let mut relaxed = base.clone();
        relaxed["hard_constraints"]["doctor_id"] = Value::Null;
        suggestions.push(Suggestion {
            strategy: "any_doctor".into(),
            request: relaxed,
            description: "Try any available doctor at the clinic".into(),
        });
    }

    // 4. Expand date range +7 days.
    suggestions.push(Suggestion {
        strategy: "expanded_date_range_7d".into(),
        request: with_end_date(&base, request.date_range.end_date + Duration::days(7)),
        description: "Try dates up to 7 days later than your preferred range".into(),
    });

    // 5. Fully relaxed: any slot in the next 14 days.
    let mut relaxed = base;
    relaxed["hard_constraints"] = json!({});
    relaxed["date_range"] = json!({
        "start_date": request.date_range.start_date.to_string(),
        "end_date": (request.date_range.start_date + Duration::days(14)).to_string(),
    });
    suggestions.push(Suggestion {
        strategy: "fully_relaxed".into(),
        request: relaxed,
        description: "Try any available slot in the next 2 weeks".into(),
    });

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

fn with_end_date(base: &Value, end_date: NaiveDate) -> Value {
    let mut value = base.clone();
    value["date_range"]["end_date"] = Value::String(end_date.to_string());
    value
}
