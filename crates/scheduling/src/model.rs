use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inclusive date range in the clinic calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DateRange {
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start_date: date,
            end_date: date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    /// Whether a local hour falls in this band.
    pub fn contains_hour(self, hour: u32) -> bool {
        match self {
            TimeOfDay::Morning => hour < 12,
            TimeOfDay::Afternoon => (12..17).contains(&hour),
            TimeOfDay::Evening => hour >= 17,
        }
    }
}

/// Constraints that eliminate candidates outright.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A proposed appointment candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub room_id: Uuid,
    pub room_name: String,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explanations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestedSlots {
    pub slots: Vec<Slot>,
    pub total_candidates_checked: usize,
    pub date_range: DateRange,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Holds & appointments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A temporary reservation preventing a slot from being double-offered
/// while the patient confirms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub hold_id: Uuid,
    /// Client-side idempotency key.
    pub client_hold_id: String,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub room_id: Uuid,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldResponse {
    pub hold_id: Uuid,
    pub client_hold_id: String,
    pub expires_at: DateTime<Utc>,
    pub slot: Slot,
    /// False when an existing non-expired hold was returned.
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Cancelled,
    Completed,
    NoShow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub room_id: Uuid,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    // Policy in force at confirmation, pinned forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_snapshot_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_bundle_sha256: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentResponse {
    pub appointment_id: Uuid,
    pub slot: Slot,
    pub patient_id: Uuid,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub calendar_synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_event_ids: Option<serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Escalations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationStatus {
    Open,
    Assigned,
    Resolved,
    Declined,
}

/// A relaxation suggestion attached to an escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub strategy: String,
    pub request: serde_json::Value,
    pub description: String,
}

/// Human-fallback record created when auto-scheduling fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub status: EscalationStatus,
    pub request: serde_json::Value,
    pub reason: String,
    pub suggestions: Vec<Suggestion>,
    pub sla_deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug)]
pub enum SchedulingError {
    #[error("no available slots found matching constraints")]
    NoSlotsAvailable { escalation_id: Option<Uuid> },

    #[error("request escalated to staff: {reason}")]
    Escalated { escalation_id: Uuid, reason: String },

    #[error("hold {0} not found")]
    HoldNotFound(Uuid),

    #[error("hold {0} has expired")]
    HoldExpired(Uuid),

    #[error("slot is no longer available: {0}")]
    SlotNotAvailable(String),

    #[error("escalation {0} not found")]
    EscalationNotFound(Uuid),

    #[error("invalid scheduling request: {0}")]
    InvalidRequest(String),

    #[error("policy violation: {}", .messages.join("; "))]
    PolicyViolation { messages: Vec<String> },

    #[error(transparent)]
    Internal(#[from] mg_domain::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_bands() {
        assert!(TimeOfDay::Morning.contains_hour(8));
        assert!(!TimeOfDay::Morning.contains_hour(12));
        assert!(TimeOfDay::Afternoon.contains_hour(12));
        assert!(!TimeOfDay::Afternoon.contains_hour(17));
        assert!(TimeOfDay::Evening.contains_hour(19));
    }

    #[test]
    fn policy_violation_joins_messages() {
        let err = SchedulingError::PolicyViolation {
            messages: vec!["limit reached".into(), "out of hours".into()],
        };
        assert_eq!(err.to_string(), "policy violation: limit reached; out of hours");
    }
}
