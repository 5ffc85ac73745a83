//! The scheduling engine.
//!
//! Slot suggestion (enumerate → hard-filter → policy-gate → score),
//! holds with idempotent creation, confirmation with policy limit
//! counters and compensation, and escalation when nothing survives
//! filtering.

pub mod calendar;
pub mod context;
pub mod engine;
pub mod escalation;
pub mod limits;
pub mod model;
pub mod policy;
pub mod scorer;
pub mod store;

pub use calendar::{CalendarSync, CalendarSyncResult, DisabledCalendarSync};
pub use engine::SchedulingEngine;
pub use escalation::EscalationManager;
pub use limits::{LimitCounterStore, LimitReservationToken};
pub use model::{
    Appointment, AppointmentResponse, AppointmentStatus, DateRange, Escalation, EscalationStatus,
    HardConstraints, Hold, HoldResponse, SchedulingError, Slot, SuggestedSlots, Suggestion,
    TimeOfDay,
};
pub use policy::{ActivePolicy, PolicyManager, PolicySnapshot, SnapshotStatus};
pub use store::{
    Doctor, DoctorSchedule, MemorySchedulingRepo, PreferenceWeights, Room, SchedSettings,
    SchedulingRepo, Service, TimeOff,
};
