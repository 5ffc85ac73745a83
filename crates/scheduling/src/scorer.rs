//! Soft-preference scoring.
//!
//! Each component returns 0.0–1.0; components are multiplied by their
//! configured weights (summing to 1), summed, and scaled to 0–100.
//! Policy ADJUST_SCORE deltas are added on top of that scale, unscaled.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::model::{Appointment, TimeOfDay};
use crate::store::{Doctor, PreferenceWeights};

/// A doctor's same-day load above which the least-busy component
/// bottoms out.
const MAX_DAILY_APPOINTMENTS: usize = 8;
/// Adjacency buffer for the pack-schedule component, in minutes.
const PACK_BUFFER_MINUTES: i64 = 60;

pub struct PreferenceScorer {
    weights: PreferenceWeights,
}

/// Patient-side preferences relevant to scoring.
#[derive(Debug, Clone, Default)]
pub struct PatientScoringPrefs {
    pub preferred_doctor_id: Option<Uuid>,
    pub time_of_day: Option<TimeOfDay>,
}

impl PreferenceScorer {
    pub fn new(weights: PreferenceWeights) -> Self {
        Self { weights }
    }

    /// Weighted base score for a slot, scaled to 0–100.
    #[allow(clippy::too_many_arguments)]
    pub fn score(
        &self,
        doctor: &Doctor,
        room_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        tz: Tz,
        doctor_appointments: &HashMap<Uuid, Vec<Appointment>>,
        prefs: &PatientScoringPrefs,
    ) -> f64 {
        let least_busy = score_least_busy(doctor.id, start_time, doctor_appointments);
        let pack = score_pack_schedule(doctor.id, start_time, end_time, doctor_appointments);
        let room = score_room_preference(doctor, room_id);
        let time = score_time_of_day(start_time, tz, prefs.time_of_day);
        let patient = score_patient_preference(doctor.id, prefs.preferred_doctor_id);

        let weighted = least_busy * self.weights.least_busy
            + pack * self.weights.pack_schedule
            + room * self.weights.room_preference
            + time * self.weights.time_of_day
            + patient * self.weights.patient_preference;

        weighted * 100.0
    }
}

/// Prefer less busy doctors: 0 same-day appointments → 1.0, eight or
/// more → 0.0.
pub fn score_least_busy(
    doctor_id: Uuid,
    start_time: DateTime<Utc>,
    doctor_appointments: &HashMap<Uuid, Vec<Appointment>>,
) -> f64 {
    let slot_date = start_time.date_naive();
    let same_day = doctor_appointments
        .get(&doctor_id)
        .into_iter()
        .flatten()
        .filter(|a| a.start_time.date_naive() == slot_date)
        .count();
    (1.0 - same_day as f64 / MAX_DAILY_APPOINTMENTS as f64).max(0.0)
}

/// Prefer slots adjacent to existing appointments: two or more
/// neighbors within the buffer → 1.0.
pub fn score_pack_schedule(
    doctor_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    doctor_appointments: &HashMap<Uuid, Vec<Appointment>>,
) -> f64 {
    let mut adjacent = 0;
    for appointment in doctor_appointments.get(&doctor_id).into_iter().flatten() {
        let minutes_before = (start_time - appointment.end_time).num_minutes();
        let minutes_after = (appointment.start_time - end_time).num_minutes();
        if (0..=PACK_BUFFER_MINUTES).contains(&minutes_before)
            || (0..=PACK_BUFFER_MINUTES).contains(&minutes_after)
        {
            adjacent += 1;
        }
    }
    (adjacent as f64 / 2.0).min(1.0)
}

/// Full score in the doctor's preferred room, neutral otherwise.
pub fn score_room_preference(doctor: &Doctor, room_id: Uuid) -> f64 {
    match doctor.preferred_room_id {
        Some(preferred) if preferred == room_id => 1.0,
        Some(_) => 0.3,
        None => 0.5,
    }
}

/// Bonus when the slot lands in the requested time-of-day band.
pub fn score_time_of_day(
    start_time: DateTime<Utc>,
    tz: Tz,
    requested: Option<TimeOfDay>,
) -> f64 {
    let Some(requested) = requested else {
        return 0.5;
    };
    let hour = start_time.with_timezone(&tz).hour();
    if requested.contains_hour(hour) {
        1.0
    } else {
        0.0
    }
}

/// Bonus for the patient's preferred doctor.
pub fn score_patient_preference(doctor_id: Uuid, preferred: Option<Uuid>) -> f64 {
    match preferred {
        Some(preferred) if preferred == doctor_id => 1.0,
        Some(_) => 0.0,
        None => 0.5,
    }
}
