//! Policy evaluation context for slots.
//!
//! Hard and soft rules address fields like `appointment.within_working_hours`
//! or `doctor.is_least_busy` through dotted paths; this module builds that
//! context object for one candidate slot.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::model::{Appointment, HardConstraints};
use crate::store::SchedSettings;

/// Whether [start, end] falls inside the clinic's local open hours.
pub fn within_working_hours(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    settings: &SchedSettings,
    tz: Tz,
) -> bool {
    let local_start = start.with_timezone(&tz);
    let local_end = end.with_timezone(&tz);
    local_start.hour() >= settings.open_hour
        && (local_end.hour() < settings.close_hour
            || (local_end.hour() == settings.close_hour && local_end.minute() == 0))
}

/// Minutes to the nearest appointment before and after the slot for the
/// same doctor.
pub fn slot_adjacency(
    doctor_id: Uuid,
    slot_start: DateTime<Utc>,
    slot_end: DateTime<Utc>,
    doctor_appointments: &HashMap<Uuid, Vec<Appointment>>,
) -> (Option<i64>, Option<i64>) {
    let mut prev_diff = None;
    let mut next_diff = None;

    for appointment in doctor_appointments.get(&doctor_id).into_iter().flatten() {
        if appointment.end_time <= slot_start {
            let diff = (slot_start - appointment.end_time).num_minutes();
            if prev_diff.map_or(true, |d| diff < d) {
                prev_diff = Some(diff);
            }
        } else if appointment.start_time >= slot_end {
            let diff = (appointment.start_time - slot_end).num_minutes();
            if next_diff.map_or(true, |d| diff < d) {
                next_diff = Some(diff);
            }
        }
    }

    (prev_diff, next_diff)
}

/// Whether this doctor has the fewest same-day appointments among all
/// doctors with load data.
pub fn is_least_busy(
    doctor_id: Uuid,
    slot_start: DateTime<Utc>,
    doctor_appointments: &HashMap<Uuid, Vec<Appointment>>,
) -> bool {
    let slot_date = slot_start.date_naive();
    let mut min_count: Option<usize> = None;
    let mut doctor_count = 0;

    for (id, appointments) in doctor_appointments {
        let count = appointments
            .iter()
            .filter(|a| a.start_time.date_naive() == slot_date)
            .count();
        if *id == doctor_id {
            doctor_count = count;
        }
        min_count = Some(min_count.map_or(count, |m| m.min(count)));
    }

    doctor_count <= min_count.unwrap_or(doctor_count)
}

pub fn is_emergency_request(patient_preferences: Option<&Value>) -> bool {
    let Some(preferences) = patient_preferences else {
        return false;
    };
    if preferences
        .get("is_emergency")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return true;
    }
    preferences.get("urgency").and_then(Value::as_str) == Some("emergency")
}

/// Whether the dotted field resolves to a truthy value (REQUIRE_FIELD).
pub fn context_field_truthy(context: &Value, field_path: &str) -> bool {
    match mg_policy::model::resolve_path(context, field_path) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Null) | None => false,
    }
}

/// Build the policy evaluation context for one candidate slot.
#[allow(clippy::too_many_arguments)]
pub fn build_slot_context(
    doctor_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    settings: &SchedSettings,
    tz: Tz,
    doctor_appointments: &HashMap<Uuid, Vec<Appointment>>,
    patient_preferences: Option<&Value>,
    hard_constraints: Option<&HardConstraints>,
    clinic_id: Uuid,
    patient_id: Option<Uuid>,
    tenant_id: Option<&str>,
) -> Value {
    let duration = (end_time - start_time).num_minutes();
    let (minutes_since_previous, minutes_until_next) =
        slot_adjacency(doctor_id, start_time, end_time, doctor_appointments);
    let local_start = start_time.with_timezone(&tz);

    json!({
        "clinic": {
            "id": clinic_id.to_string(),
            "hours": {
                "open_hour": settings.open_hour,
                "close_hour": settings.close_hour,
            },
        },
        "tenant": {
            "id": tenant_id,
        },
        "appointment": {
            "start_time": start_time.to_rfc3339(),
            "end_time": end_time.to_rfc3339(),
            "within_working_hours": within_working_hours(start_time, end_time, settings, tz),
            "duration_minutes": duration,
        },
        "slot": {
            "hour": local_start.hour(),
            "minutes_since_previous": minutes_since_previous,
            "minutes_until_next": minutes_until_next,
        },
        "request": {
            "is_emergency": is_emergency_request(patient_preferences),
            "human_override": patient_preferences
                .and_then(|p| p.get("human_override"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            "preferred_doctor_id": hard_constraints
                .and_then(|h| h.doctor_id)
                .map(|id| id.to_string()),
        },
        "doctor": {
            "id": doctor_id.to_string(),
            "is_least_busy": is_least_busy(doctor_id, start_time, doctor_appointments),
        },
        "patient": {
            "patient_id": patient_id.map(|id| id.to_string()),
        },
    })
}
