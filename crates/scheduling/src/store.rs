//! Scheduling persistence contract and the in-memory repository.
//!
//! Appointments, holds, escalations, and policy snapshots live in the
//! relational store; the contract here is the narrow surface the engine
//! needs. [`MemorySchedulingRepo`] backs the gateway in tests and local
//! runs, including the (room, time-range) exclusion behavior the real
//! store enforces with a DB constraint.

use std::collections::HashMap;

use chrono::{DateTime, Utc, Weekday};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mg_domain::Result;

use crate::model::{
    Appointment, AppointmentStatus, Escalation, EscalationStatus, Hold,
};
use crate::policy::{PolicySnapshot, SnapshotStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory entities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Soft-preference component weights; they sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceWeights {
    pub least_busy: f64,
    pub pack_schedule: f64,
    pub room_preference: f64,
    pub time_of_day: f64,
    pub patient_preference: f64,
}

impl Default for PreferenceWeights {
    fn default() -> Self {
        Self {
            least_busy: 0.3,
            pack_schedule: 0.25,
            room_preference: 0.2,
            time_of_day: 0.15,
            patient_preference: 0.1,
        }
    }
}

/// Per-clinic scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedSettings {
    /// IANA timezone name, e.g. "America/New_York".
    pub timezone: String,
    pub grid_minutes: u32,
    pub open_hour: u32,
    pub close_hour: u32,
    pub max_days_ahead: u32,
    pub hold_duration_minutes: u32,
    #[serde(default)]
    pub preference_weights: PreferenceWeights,
}

impl Default for SchedSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".into(),
            grid_minutes: 15,
            open_hour: 8,
            close_hour: 20,
            max_days_ahead: 3,
            hold_duration_minutes: 5,
            preference_weights: PreferenceWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_room_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// A weekly working window for a doctor, in clinic-local hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorSchedule {
    pub doctor_id: Uuid,
    pub weekday: Weekday,
    pub start_hour: u32,
    pub end_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOff {
    pub doctor_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repository contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait SchedulingRepo: Send + Sync {
    // ── directory ────────────────────────────────────────────────
    async fn settings(&self, clinic_id: Uuid) -> Result<SchedSettings>;
    async fn service(&self, clinic_id: Uuid, service_id: Uuid) -> Result<Option<Service>>;
    async fn services(&self, clinic_id: Uuid) -> Result<Vec<Service>>;
    async fn eligible_doctors(&self, clinic_id: Uuid, service_id: Uuid) -> Result<Vec<Doctor>>;
    async fn rooms(&self, clinic_id: Uuid) -> Result<Vec<Room>>;
    async fn schedules(&self, clinic_id: Uuid) -> Result<Vec<DoctorSchedule>>;
    async fn time_off(&self, clinic_id: Uuid) -> Result<Vec<TimeOff>>;

    // ── appointments ─────────────────────────────────────────────
    /// Non-cancelled appointments overlapping [start, end) for a clinic.
    async fn appointments_in_range(
        &self,
        clinic_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;

    /// Insert enforcing the (room, time-range) exclusion: returns
    /// `false` (and inserts nothing) when a non-cancelled appointment
    /// already overlaps the same room.
    async fn try_insert_appointment(&self, appointment: Appointment) -> Result<bool>;

    async fn delete_appointment(&self, appointment_id: Uuid) -> Result<()>;

    async fn appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>>;

    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<()>;

    /// Upcoming scheduled appointments for a patient, soonest first.
    async fn upcoming_appointments(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
        after: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;

    // ── holds ────────────────────────────────────────────────────
    async fn insert_hold(&self, hold: Hold) -> Result<()>;
    async fn hold(&self, hold_id: Uuid) -> Result<Option<Hold>>;
    /// Non-expired hold with the given idempotency key.
    async fn hold_by_client_id(&self, client_hold_id: &str, now: DateTime<Utc>)
        -> Result<Option<Hold>>;
    /// Active (non-expired) holds for a clinic.
    async fn active_holds(&self, clinic_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Hold>>;
    /// Returns whether a row was actually deleted — the confirm-race
    /// arbiter.
    async fn delete_hold(&self, hold_id: Uuid) -> Result<bool>;

    // ── escalations ──────────────────────────────────────────────
    async fn insert_escalation(&self, escalation: Escalation) -> Result<()>;
    async fn escalation(&self, id: Uuid) -> Result<Option<Escalation>>;
    async fn update_escalation(&self, escalation: Escalation) -> Result<()>;
    async fn escalations_by_status(
        &self,
        clinic_id: Uuid,
        status: EscalationStatus,
    ) -> Result<Vec<Escalation>>;
    /// Open escalation for the same (patient, service) created after
    /// `since`, used for duplicate suppression.
    async fn recent_open_escalation(
        &self,
        clinic_id: Uuid,
        patient_id: Option<Uuid>,
        service_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<Escalation>>;

    // ── policy snapshots ─────────────────────────────────────────
    async fn active_snapshot(&self, clinic_id: Uuid) -> Result<Option<PolicySnapshot>>;
    /// Store a snapshot; an `active` snapshot demotes the previously
    /// active one to `staged`.
    async fn upsert_snapshot(&self, snapshot: PolicySnapshot) -> Result<()>;
    async fn snapshots(&self, clinic_id: Uuid) -> Result<Vec<PolicySnapshot>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Inner {
    settings: HashMap<Uuid, SchedSettings>,
    services: HashMap<Uuid, Vec<Service>>,
    doctors: HashMap<Uuid, Vec<Doctor>>,
    /// (clinic, service) → doctor ids eligible for it.
    eligibility: HashMap<(Uuid, Uuid), Vec<Uuid>>,
    rooms: HashMap<Uuid, Vec<Room>>,
    schedules: HashMap<Uuid, Vec<DoctorSchedule>>,
    time_off: HashMap<Uuid, Vec<TimeOff>>,
    appointments: HashMap<Uuid, Appointment>,
    holds: HashMap<Uuid, Hold>,
    escalations: HashMap<Uuid, Escalation>,
    snapshots: Vec<PolicySnapshot>,
}

#[derive(Default)]
pub struct MemorySchedulingRepo {
    inner: RwLock<Inner>,
}

fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

impl MemorySchedulingRepo {
    pub fn new() -> Self {
        Self::default()
    }

    // ── seeding helpers (bootstrap + tests) ──────────────────────

    pub fn seed_settings(&self, clinic_id: Uuid, settings: SchedSettings) {
        self.inner.write().settings.insert(clinic_id, settings);
    }

    pub fn seed_service(&self, clinic_id: Uuid, service: Service) {
        self.inner
            .write()
            .services
            .entry(clinic_id)
            .or_default()
            .push(service);
    }

    pub fn seed_doctor(&self, clinic_id: Uuid, doctor: Doctor, service_ids: &[Uuid]) {
        let mut inner = self.inner.write();
        for service_id in service_ids {
            inner
                .eligibility
                .entry((clinic_id, *service_id))
                .or_default()
                .push(doctor.id);
        }
        inner.doctors.entry(clinic_id).or_default().push(doctor);
    }

    pub fn seed_room(&self, clinic_id: Uuid, room: Room) {
        self.inner.write().rooms.entry(clinic_id).or_default().push(room);
    }

    pub fn seed_schedule(&self, clinic_id: Uuid, schedule: DoctorSchedule) {
        self.inner
            .write()
            .schedules
            .entry(clinic_id)
            .or_default()
            .push(schedule);
    }

    pub fn seed_time_off(&self, clinic_id: Uuid, entry: TimeOff) {
        self.inner
            .write()
            .time_off
            .entry(clinic_id)
            .or_default()
            .push(entry);
    }
}

#[async_trait::async_trait]
impl SchedulingRepo for MemorySchedulingRepo {
    async fn settings(&self, clinic_id: Uuid) -> Result<SchedSettings> {
        Ok(self
            .inner
            .read()
            .settings
            .get(&clinic_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn service(&self, clinic_id: Uuid, service_id: Uuid) -> Result<Option<Service>> {
        Ok(self
            .inner
            .read()
            .services
            .get(&clinic_id)
            .and_then(|services| services.iter().find(|s| s.id == service_id))
            .cloned())
    }

    async fn services(&self, clinic_id: Uuid) -> Result<Vec<Service>> {
        Ok(self
            .inner
            .read()
            .services
            .get(&clinic_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn eligible_doctors(&self, clinic_id: Uuid, service_id: Uuid) -> Result<Vec<Doctor>> {
        let inner = self.inner.read();
        let Some(ids) = inner.eligibility.get(&(clinic_id, service_id)) else {
            return Ok(Vec::new());
        };
        let doctors = inner
            .doctors
            .get(&clinic_id)
            .map(|doctors| {
                doctors
                    .iter()
                    .filter(|d| ids.contains(&d.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(doctors)
    }

    async fn rooms(&self, clinic_id: Uuid) -> Result<Vec<Room>> {
        Ok(self
            .inner
            .read()
            .rooms
            .get(&clinic_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn schedules(&self, clinic_id: Uuid) -> Result<Vec<DoctorSchedule>> {
        Ok(self
            .inner
            .read()
            .schedules
            .get(&clinic_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn time_off(&self, clinic_id: Uuid) -> Result<Vec<TimeOff>> {
        Ok(self
            .inner
            .read()
            .time_off
            .get(&clinic_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn appointments_in_range(
        &self,
        clinic_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        Ok(self
            .inner
            .read()
            .appointments
            .values()
            .filter(|a| {
                a.clinic_id == clinic_id
                    && a.status != AppointmentStatus::Cancelled
                    && overlaps(a.start_time, a.end_time, start, end)
            })
            .cloned()
            .collect())
    }

    async fn try_insert_appointment(&self, appointment: Appointment) -> Result<bool> {
        let mut inner = self.inner.write();
        let conflict = inner.appointments.values().any(|a| {
            a.room_id == appointment.room_id
                && a.status != AppointmentStatus::Cancelled
                && overlaps(
                    a.start_time,
                    a.end_time,
                    appointment.start_time,
                    appointment.end_time,
                )
        });
        if conflict {
            return Ok(false);
        }
        inner
            .appointments
            .insert(appointment.appointment_id, appointment);
        Ok(true)
    }

    async fn delete_appointment(&self, appointment_id: Uuid) -> Result<()> {
        self.inner.write().appointments.remove(&appointment_id);
        Ok(())
    }

    async fn appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>> {
        Ok(self.inner.read().appointments.get(&appointment_id).cloned())
    }

    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<()> {
        if let Some(appointment) = self.inner.write().appointments.get_mut(&appointment_id) {
            appointment.status = status;
        }
        Ok(())
    }

    async fn upcoming_appointments(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
        after: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let mut appointments: Vec<Appointment> = self
            .inner
            .read()
            .appointments
            .values()
            .filter(|a| {
                a.clinic_id == clinic_id
                    && a.patient_id == patient_id
                    && a.status == AppointmentStatus::Scheduled
                    && a.start_time > after
            })
            .cloned()
            .collect();
        appointments.sort_by_key(|a| a.start_time);
        Ok(appointments)
    }

    async fn insert_hold(&self, hold: Hold) -> Result<()> {
        self.inner.write().holds.insert(hold.hold_id, hold);
        Ok(())
    }

    async fn hold(&self, hold_id: Uuid) -> Result<Option<Hold>> {
        Ok(self.inner.read().holds.get(&hold_id).cloned())
    }

    async fn hold_by_client_id(
        &self,
        client_hold_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Hold>> {
        Ok(self
            .inner
            .read()
            .holds
            .values()
            .find(|h| h.client_hold_id == client_hold_id && h.expires_at > now)
            .cloned())
    }

    async fn active_holds(&self, clinic_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        Ok(self
            .inner
            .read()
            .holds
            .values()
            .filter(|h| h.clinic_id == clinic_id && h.expires_at > now)
            .cloned()
            .collect())
    }

    async fn delete_hold(&self, hold_id: Uuid) -> Result<bool> {
        Ok(self.inner.write().holds.remove(&hold_id).is_some())
    }

    async fn insert_escalation(&self, escalation: Escalation) -> Result<()> {
        self.inner.write().escalations.insert(escalation.id, escalation);
        Ok(())
    }

    async fn escalation(&self, id: Uuid) -> Result<Option<Escalation>> {
        Ok(self.inner.read().escalations.get(&id).cloned())
    }

    async fn update_escalation(&self, escalation: Escalation) -> Result<()> {
        self.inner.write().escalations.insert(escalation.id, escalation);
        Ok(())
    }

    async fn escalations_by_status(
        &self,
        clinic_id: Uuid,
        status: EscalationStatus,
    ) -> Result<Vec<Escalation>> {
        let mut escalations: Vec<Escalation> = self
            .inner
            .read()
            .escalations
            .values()
            .filter(|e| e.clinic_id == clinic_id && e.status == status)
            .cloned()
            .collect();
        escalations.sort_by_key(|e| e.sla_deadline);
        Ok(escalations)
    }

    async fn recent_open_escalation(
        &self,
        clinic_id: Uuid,
        patient_id: Option<Uuid>,
        service_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<Escalation>> {
        Ok(self
            .inner
            .read()
            .escalations
            .values()
            .find(|e| {
                e.clinic_id == clinic_id
                    && e.status == EscalationStatus::Open
                    && e.created_at >= since
                    && e.request.get("service_id").and_then(|v| v.as_str())
                        == Some(service_id.to_string().as_str())
                    && e.request.get("patient_id").and_then(|v| v.as_str())
                        == patient_id.map(|p| p.to_string()).as_deref()
            })
            .cloned())
    }

    async fn active_snapshot(&self, clinic_id: Uuid) -> Result<Option<PolicySnapshot>> {
        Ok(self
            .inner
            .read()
            .snapshots
            .iter()
            .find(|s| s.clinic_id == clinic_id && s.status == SnapshotStatus::Active)
            .cloned())
    }

    async fn upsert_snapshot(&self, snapshot: PolicySnapshot) -> Result<()> {
        let mut inner = self.inner.write();
        if snapshot.status == SnapshotStatus::Active {
            for existing in inner.snapshots.iter_mut() {
                if existing.clinic_id == snapshot.clinic_id
                    && existing.status == SnapshotStatus::Active
                {
                    existing.status = SnapshotStatus::Staged;
                }
            }
        }
        inner.snapshots.retain(|s| s.snapshot_id != snapshot.snapshot_id);
        inner.snapshots.push(snapshot);
        Ok(())
    }

    async fn snapshots(&self, clinic_id: Uuid) -> Result<Vec<PolicySnapshot>> {
        let mut snapshots: Vec<PolicySnapshot> = self
            .inner
            .read()
            .snapshots
            .iter()
            .filter(|s| s.clinic_id == clinic_id)
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }
}
