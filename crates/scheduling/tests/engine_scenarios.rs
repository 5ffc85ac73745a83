//! End-to-end engine flows against the in-memory repository.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc, Weekday};
use serde_json::json;
use uuid::Uuid;

use mg_policy::starter::starter_pack_bundle;
use mg_policy::PolicyCompiler;
use mg_scheduling::{
    DateRange, DisabledCalendarSync, Doctor, DoctorSchedule, HardConstraints,
    MemorySchedulingRepo, PolicySnapshot, Room, SchedSettings, SchedulingEngine, SchedulingError,
    SchedulingRepo, Service, SnapshotStatus, TimeOff,
};
use mg_store::MemoryKv;

struct Fixture {
    engine: SchedulingEngine,
    repo: Arc<MemorySchedulingRepo>,
    clinic_id: Uuid,
    service_id: Uuid,
    doctor_id: Uuid,
    room_id: Uuid,
}

fn fixture() -> Fixture {
    let repo = Arc::new(MemorySchedulingRepo::new());
    let clinic_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let room_id = Uuid::new_v4();

    // 30-minute grid with 30-minute services keeps consecutive ticks
    // non-overlapping, so several confirms can share one room per day.
    repo.seed_settings(
        clinic_id,
        SchedSettings {
            grid_minutes: 30,
            ..SchedSettings::default()
        },
    );
    repo.seed_service(
        clinic_id,
        Service {
            id: service_id,
            name: "Consultation".into(),
            duration_minutes: 30,
            price: Some(50.0),
        },
    );
    repo.seed_doctor(
        clinic_id,
        Doctor {
            id: doctor_id,
            name: "Dr. Shtern".into(),
            preferred_room_id: Some(room_id),
        },
        &[service_id],
    );
    repo.seed_room(
        clinic_id,
        Room {
            id: room_id,
            name: "Room 1".into(),
        },
    );

    let engine = SchedulingEngine::new(
        repo.clone(),
        Arc::new(PolicyCompiler::new()),
        Arc::new(MemoryKv::new()),
        Arc::new(DisabledCalendarSync),
    );

    Fixture {
        engine,
        repo,
        clinic_id,
        service_id,
        doctor_id,
        room_id,
    }
}

fn future_range(days_ahead: i64, span: i64) -> DateRange {
    let start = (Utc::now() + chrono::Duration::days(days_ahead)).date_naive();
    DateRange {
        start_date: start,
        end_date: start + chrono::Duration::days(span),
    }
}

async fn activate_starter_pack(fx: &Fixture) {
    let bundle = starter_pack_bundle("starter-pack");
    let sha = mg_policy::canonical::bundle_digest(&bundle);
    let mut snapshot = PolicySnapshot::new(fx.clinic_id, bundle, sha, 1, None);
    snapshot.status = SnapshotStatus::Active;
    fx.repo.upsert_snapshot(snapshot).await.unwrap();
}

#[tokio::test]
async fn suggest_returns_scored_slots_sorted_desc() {
    let fx = fixture();
    let suggested = fx
        .engine
        .suggest_slots(fx.clinic_id, fx.service_id, future_range(1, 0), None, None, None)
        .await
        .unwrap();

    assert!(!suggested.slots.is_empty());
    assert!(suggested.slots.len() <= 10);
    assert!(suggested.total_candidates_checked >= suggested.slots.len());
    for pair in suggested.slots.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(suggested.slots.iter().all(|s| s.doctor_id == fx.doctor_id));
}

#[tokio::test]
async fn doctor_constraint_filters_to_that_doctor() {
    let fx = fixture();
    let other = Uuid::new_v4();
    let constraints = HardConstraints {
        doctor_id: Some(other),
        ..Default::default()
    };

    // No doctor with that id is eligible: escalation, not slots.
    let err = fx
        .engine
        .suggest_slots(
            fx.clinic_id,
            fx.service_id,
            future_range(1, 0),
            Some(&constraints),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::InvalidRequest(_)));
}

#[tokio::test]
async fn zero_slots_escalates_with_relaxation_suggestions() {
    let fx = fixture();
    let patient_id = Uuid::new_v4();

    // All days in range are time-off for the only doctor.
    let range = future_range(1, 1);
    fx.repo.seed_time_off(
        fx.clinic_id,
        TimeOff {
            doctor_id: fx.doctor_id,
            start: Utc::now(),
            end: Utc::now() + chrono::Duration::days(10),
        },
    );

    let err = fx
        .engine
        .suggest_slots(
            fx.clinic_id,
            fx.service_id,
            range,
            Some(&HardConstraints {
                doctor_id: Some(fx.doctor_id),
                ..Default::default()
            }),
            Some(patient_id),
            None,
        )
        .await
        .unwrap_err();

    let SchedulingError::NoSlotsAvailable { escalation_id } = err else {
        panic!("expected NoSlotsAvailable, got {err:?}");
    };
    let escalation = fx
        .engine
        .escalations()
        .get(escalation_id.unwrap())
        .await
        .unwrap();

    assert_eq!(escalation.reason, "No available slots found matching constraints");
    let strategies: Vec<&str> = escalation
        .suggestions
        .iter()
        .map(|s| s.strategy.as_str())
        .collect();
    let expected = [
        "expanded_date_range_3d",
        "remove_time_preference",
        "any_doctor",
        "expanded_date_range_7d",
        "fully_relaxed",
    ];
    // Strategies must form a prefix-consistent subsequence of the
    // canonical order.
    let mut cursor = 0;
    for strategy in &strategies {
        let position = expected[cursor..]
            .iter()
            .position(|e| e == strategy)
            .expect("unknown strategy");
        cursor += position + 1;
    }
    let sla = (escalation.sla_deadline - escalation.created_at).num_hours();
    assert_eq!(sla, 24);
}

#[tokio::test]
async fn escalation_is_deduplicated_within_a_day() {
    let fx = fixture();
    let patient_id = Uuid::new_v4();
    fx.repo.seed_time_off(
        fx.clinic_id,
        TimeOff {
            doctor_id: fx.doctor_id,
            start: Utc::now(),
            end: Utc::now() + chrono::Duration::days(10),
        },
    );

    let mut ids = Vec::new();
    for _ in 0..2 {
        let err = fx
            .engine
            .suggest_slots(
                fx.clinic_id,
                fx.service_id,
                future_range(1, 1),
                None,
                Some(patient_id),
                None,
            )
            .await
            .unwrap_err();
        if let SchedulingError::NoSlotsAvailable { escalation_id } = err {
            ids.push(escalation_id.unwrap());
        }
    }
    assert_eq!(ids[0], ids[1]);
}

#[tokio::test]
async fn hold_is_idempotent_by_client_id() {
    let fx = fixture();
    let patient_id = Uuid::new_v4();
    let suggested = fx
        .engine
        .suggest_slots(fx.clinic_id, fx.service_id, future_range(1, 0), None, None, None)
        .await
        .unwrap();
    let slot = &suggested.slots[0];

    let first = fx
        .engine
        .hold_slot(slot, "client-1", patient_id, fx.clinic_id, fx.service_id)
        .await
        .unwrap();
    assert!(first.is_new);

    let second = fx
        .engine
        .hold_slot(slot, "client-1", patient_id, fx.clinic_id, fx.service_id)
        .await
        .unwrap();
    assert!(!second.is_new);
    assert_eq!(first.hold_id, second.hold_id);
}

#[tokio::test]
async fn held_slot_is_not_offered_to_others() {
    let fx = fixture();
    let patient_id = Uuid::new_v4();
    let suggested = fx
        .engine
        .suggest_slots(fx.clinic_id, fx.service_id, future_range(1, 0), None, None, None)
        .await
        .unwrap();
    let slot = &suggested.slots[0];

    fx.engine
        .hold_slot(slot, "client-1", patient_id, fx.clinic_id, fx.service_id)
        .await
        .unwrap();

    // The same slot for another client is no longer available.
    let err = fx
        .engine
        .hold_slot(slot, "client-2", Uuid::new_v4(), fx.clinic_id, fx.service_id)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::SlotNotAvailable(_)));
}

#[tokio::test]
async fn confirm_creates_stamped_appointment_and_consumes_hold() {
    let fx = fixture();
    activate_starter_pack(&fx).await;
    let patient_id = Uuid::new_v4();

    let suggested = fx
        .engine
        .suggest_slots(fx.clinic_id, fx.service_id, future_range(1, 0), None, None, None)
        .await
        .unwrap();
    let slot = &suggested.slots[0];
    let hold = fx
        .engine
        .hold_slot(slot, "client-1", patient_id, fx.clinic_id, fx.service_id)
        .await
        .unwrap();

    let response = fx
        .engine
        .confirm_hold(hold.hold_id, patient_id, fx.service_id, None)
        .await
        .unwrap();

    let stored = fx
        .repo
        .appointment(response.appointment_id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.policy_snapshot_id.is_some());
    assert_eq!(stored.policy_version, Some(1));
    assert!(stored.policy_bundle_sha256.is_some());
    assert!(!response.calendar_synced);

    // Second confirm fails: the hold row is gone.
    let err = fx
        .engine
        .confirm_hold(hold.hold_id, patient_id, fx.service_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::HoldNotFound(_)));
}

#[tokio::test]
async fn confirmed_room_cannot_double_book() {
    let fx = fixture();
    let patient_id = Uuid::new_v4();
    let suggested = fx
        .engine
        .suggest_slots(fx.clinic_id, fx.service_id, future_range(1, 0), None, None, None)
        .await
        .unwrap();
    let slot = suggested.slots[0].clone();

    let hold = fx
        .engine
        .hold_slot(&slot, "c-1", patient_id, fx.clinic_id, fx.service_id)
        .await
        .unwrap();
    fx.engine
        .confirm_hold(hold.hold_id, patient_id, fx.service_id, None)
        .await
        .unwrap();

    // A fresh suggest no longer offers the booked slot for that room.
    fx.engine.flush_settings_cache();
    let again = fx
        .engine
        .suggest_slots(fx.clinic_id, fx.service_id, future_range(1, 0), None, None, None)
        .await
        .unwrap();
    assert!(!again
        .slots
        .iter()
        .any(|s| s.room_id == fx.room_id && s.start_time == slot.start_time));
}

#[tokio::test]
async fn daily_limit_blocks_sixth_confirm_without_residue() {
    let fx = fixture();
    activate_starter_pack(&fx).await;
    let patient_id = Uuid::new_v4();

    // Five confirms succeed (starter pack caps at 5 per 24h).
    let suggested = fx
        .engine
        .suggest_slots(fx.clinic_id, fx.service_id, future_range(1, 0), None, None, None)
        .await
        .unwrap();
    assert!(suggested.slots.len() >= 6, "need at least 6 candidate slots");

    for (i, slot) in suggested.slots.iter().take(5).enumerate() {
        let hold = fx
            .engine
            .hold_slot(slot, &format!("c-{i}"), patient_id, fx.clinic_id, fx.service_id)
            .await
            .unwrap();
        fx.engine
            .confirm_hold(hold.hold_id, patient_id, fx.service_id, None)
            .await
            .unwrap();
    }

    // The sixth hold succeeds, but confirm trips the limit.
    let slot = &suggested.slots[5];
    let hold = fx
        .engine
        .hold_slot(slot, "c-5", patient_id, fx.clinic_id, fx.service_id)
        .await
        .unwrap();
    let err = fx
        .engine
        .confirm_hold(hold.hold_id, patient_id, fx.service_id, None)
        .await
        .unwrap_err();

    let SchedulingError::PolicyViolation { messages } = err else {
        panic!("expected PolicyViolation, got {err:?}");
    };
    assert!(messages
        .iter()
        .any(|m| m.contains("Daily booking limit reached")));

    // No appointment row was inserted for the denied confirm.
    let upcoming = fx
        .repo
        .upcoming_appointments(fx.clinic_id, patient_id, Utc::now())
        .await
        .unwrap();
    assert_eq!(upcoming.len(), 5);

    // No residual counter token: cancelling is irrelevant to the
    // window, but a different patient still has the full allowance.
    let other = Uuid::new_v4();
    let hold = fx
        .engine
        .hold_slot(&suggested.slots[6], "other-1", other, fx.clinic_id, fx.service_id)
        .await
        .unwrap();
    fx.engine
        .confirm_hold(hold.hold_id, other, fx.service_id, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_hold_cannot_confirm() {
    let fx = fixture();
    let patient_id = Uuid::new_v4();

    // Clinic with immediately-expiring holds.
    fx.repo.seed_settings(
        fx.clinic_id,
        SchedSettings {
            hold_duration_minutes: 0,
            ..SchedSettings::default()
        },
    );
    fx.engine.flush_settings_cache();

    let suggested = fx
        .engine
        .suggest_slots(fx.clinic_id, fx.service_id, future_range(1, 0), None, None, None)
        .await
        .unwrap();
    let hold = fx
        .engine
        .hold_slot(&suggested.slots[0], "c-1", patient_id, fx.clinic_id, fx.service_id)
        .await
        .unwrap();

    let err = fx
        .engine
        .confirm_hold(hold.hold_id, patient_id, fx.service_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::HoldExpired(_)));
}

#[tokio::test]
async fn emergency_request_escalates_under_starter_pack() {
    let fx = fixture();
    activate_starter_pack(&fx).await;

    let err = fx
        .engine
        .suggest_slots(
            fx.clinic_id,
            fx.service_id,
            future_range(1, 0),
            None,
            Some(Uuid::new_v4()),
            Some(&json!({"is_emergency": true})),
        )
        .await
        .unwrap_err();

    let SchedulingError::Escalated { reason, .. } = err else {
        panic!("expected Escalated, got {err:?}");
    };
    assert!(reason.contains("Emergency"));
}

#[tokio::test]
async fn cancelled_appointment_frees_the_room() {
    let fx = fixture();
    let patient_id = Uuid::new_v4();
    let suggested = fx
        .engine
        .suggest_slots(fx.clinic_id, fx.service_id, future_range(1, 0), None, None, None)
        .await
        .unwrap();
    let slot = suggested.slots[0].clone();

    let hold = fx
        .engine
        .hold_slot(&slot, "c-1", patient_id, fx.clinic_id, fx.service_id)
        .await
        .unwrap();
    let response = fx
        .engine
        .confirm_hold(hold.hold_id, patient_id, fx.service_id, None)
        .await
        .unwrap();

    fx.engine
        .cancel_appointment(response.appointment_id, patient_id)
        .await
        .unwrap();

    // The slot can be held and confirmed again.
    let hold = fx
        .engine
        .hold_slot(&slot, "c-2", patient_id, fx.clinic_id, fx.service_id)
        .await
        .unwrap();
    fx.engine
        .confirm_hold(hold.hold_id, patient_id, fx.service_id, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn schedule_rows_restrict_working_days() {
    let fx = fixture();

    // Doctor only works Mondays.
    for weekday in [Weekday::Mon] {
        fx.repo.seed_schedule(
            fx.clinic_id,
            DoctorSchedule {
                doctor_id: fx.doctor_id,
                weekday,
                start_hour: 8,
                end_hour: 20,
            },
        );
    }

    // Find the next Tuesday.
    let mut date = Utc::now().date_naive() + chrono::Duration::days(1);
    while date.weekday() != chrono::Weekday::Tue {
        date += chrono::Duration::days(1);
    }

    let err = fx
        .engine
        .suggest_slots(
            fx.clinic_id,
            fx.service_id,
            DateRange::single(date),
            None,
            Some(Uuid::new_v4()),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::NoSlotsAvailable { .. }));
}

#[tokio::test]
async fn invalid_range_is_rejected_up_front() {
    let fx = fixture();
    let start = NaiveDate::from_ymd_opt(2025, 11, 25).unwrap();
    let err = fx
        .engine
        .suggest_slots(
            fx.clinic_id,
            fx.service_id,
            DateRange {
                start_date: start,
                end_date: start - chrono::Duration::days(1),
            },
            None,
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::InvalidRequest(_)));
}
