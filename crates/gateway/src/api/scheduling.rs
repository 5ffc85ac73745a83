//! Scheduling REST surface.
//!
//! Error mapping: 404 HoldNotFound / EscalationNotFound, 409
//! HoldExpired / SlotNotAvailable, 422 InvalidSchedulingRequest /
//! PolicyViolation, and NoSlotsAvailable returns 200 with the
//! escalation id so callers can show the "team will follow up" path.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use mg_scheduling::{
    DateRange, EscalationStatus, HardConstraints, SchedulingError, Slot,
};

use crate::state::AppState;

fn error_response(err: SchedulingError) -> Response {
    let (status, payload) = match &err {
        SchedulingError::NoSlotsAvailable { escalation_id } => (
            StatusCode::OK,
            json!({
                "status": "no_slots_available",
                "escalation_id": escalation_id.map(|id| id.to_string()),
            }),
        ),
        SchedulingError::Escalated { escalation_id, reason } => (
            StatusCode::OK,
            json!({
                "status": "escalated",
                "escalation_id": escalation_id.to_string(),
                "reason": reason,
            }),
        ),
        SchedulingError::HoldNotFound(_) | SchedulingError::EscalationNotFound(_) => (
            StatusCode::NOT_FOUND,
            json!({"error": err.to_string()}),
        ),
        SchedulingError::HoldExpired(_) | SchedulingError::SlotNotAvailable(_) => (
            StatusCode::CONFLICT,
            json!({"error": err.to_string()}),
        ),
        SchedulingError::InvalidRequest(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({"error": err.to_string()}),
        ),
        SchedulingError::PolicyViolation { messages } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({"error": "policy_violation", "messages": messages}),
        ),
        SchedulingError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "internal error"}),
        ),
    };
    (status, Json(payload)).into_response()
}

// ── suggest ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SuggestRequest {
    pub clinic_id: Uuid,
    pub service_id: Uuid,
    pub date_range: DateRange,
    #[serde(default)]
    pub hard_constraints: Option<HardConstraints>,
    #[serde(default)]
    pub patient_id: Option<Uuid>,
    #[serde(default)]
    pub patient_preferences: Option<Value>,
}

pub async fn suggest(
    State(state): State<AppState>,
    Json(request): Json<SuggestRequest>,
) -> Response {
    match state
        .engine
        .suggest_slots(
            request.clinic_id,
            request.service_id,
            request.date_range,
            request.hard_constraints.as_ref(),
            request.patient_id,
            request.patient_preferences.as_ref(),
        )
        .await
    {
        Ok(suggested) => Json(json!({
            "slots": suggested.slots,
            "total_candidates_checked": suggested.total_candidates_checked,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

// ── hold ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HoldRequest {
    pub clinic_id: Uuid,
    pub service_id: Uuid,
    pub patient_id: Uuid,
    pub client_hold_id: String,
    pub slot: Slot,
}

pub async fn hold(State(state): State<AppState>, Json(request): Json<HoldRequest>) -> Response {
    match state
        .engine
        .hold_slot(
            &request.slot,
            &request.client_hold_id,
            request.patient_id,
            request.clinic_id,
            request.service_id,
        )
        .await
    {
        Ok(response) => Json(json!({
            "hold_id": response.hold_id.to_string(),
            "client_hold_id": response.client_hold_id,
            "expires_at": response.expires_at,
            "is_new": response.is_new,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

// ── confirm ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub hold_id: Uuid,
    pub patient_id: Uuid,
    pub service_id: Uuid,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn confirm(
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> Response {
    match state
        .engine
        .confirm_hold(
            request.hold_id,
            request.patient_id,
            request.service_id,
            request.metadata,
        )
        .await
    {
        Ok(response) => Json(json!({
            "appointment_id": response.appointment_id.to_string(),
            "status": response.status,
            "calendar_synced": response.calendar_synced,
            "calendar_event_ids": response.calendar_event_ids,
            "slot": response.slot,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

// ── escalations ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub clinic_id: Uuid,
    #[serde(default)]
    pub status: Option<EscalationStatus>,
}

pub async fn escalation_queue(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> Response {
    let status = query.status.unwrap_or(EscalationStatus::Open);
    match state.engine.escalations().queue(query.clinic_id, status).await {
        Ok(escalations) => Json(json!({"escalations": escalations})).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assignee: String,
}

pub async fn escalation_assign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignRequest>,
) -> Response {
    match state.engine.escalations().assign(id, &request.assignee).await {
        Ok(escalation) => Json(json!({"escalation": escalation})).into_response(),
        Err(err) => error_response(err),
    }
}

/// Resolution picks a suggestion by index or supplies a manual slot;
/// booking runs through the same hold → confirm path as everything
/// else, then the escalation records the outcome.
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub patient_id: Uuid,
    pub service_id: Uuid,
    #[serde(default)]
    pub selected_suggestion_index: Option<usize>,
    #[serde(default)]
    pub manual_slot: Option<Slot>,
}

pub async fn escalation_resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> Response {
    let escalation = match state.engine.escalations().get(id).await {
        Ok(escalation) => escalation,
        Err(err) => return error_response(err),
    };

    // A manual slot books immediately; a suggestion index records the
    // staff's chosen relaxation for the follow-up call.
    let resolution = if let Some(slot) = request.manual_slot {
        let client_hold_id = format!("escalation:{id}");
        let hold = match state
            .engine
            .hold_slot(
                &slot,
                &client_hold_id,
                request.patient_id,
                escalation.clinic_id,
                request.service_id,
            )
            .await
        {
            Ok(hold) => hold,
            Err(err) => return error_response(err),
        };
        match state
            .engine
            .confirm_hold(hold.hold_id, request.patient_id, request.service_id, None)
            .await
        {
            Ok(response) => json!({
                "appointment_id": response.appointment_id.to_string(),
                "via": "manual_slot",
            }),
            Err(err) => return error_response(err),
        }
    } else if let Some(index) = request.selected_suggestion_index {
        if index >= escalation.suggestions.len() {
            return error_response(SchedulingError::InvalidRequest(format!(
                "suggestion index {index} out of range"
            )));
        }
        json!({
            "selected_suggestion_index": index,
            "strategy": escalation.suggestions[index].strategy,
        })
    } else {
        return error_response(SchedulingError::InvalidRequest(
            "resolution needs a suggestion index or a manual slot".into(),
        ));
    };

    match state.engine.escalations().resolve(id, resolution).await {
        Ok(escalation) => Json(json!({"escalation": escalation})).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeclineRequest {
    pub reason: String,
}

pub async fn escalation_decline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<DeclineRequest>,
) -> Response {
    match state.engine.escalations().decline(id, &request.reason).await {
        Ok(escalation) => Json(json!({"escalation": escalation})).into_response(),
        Err(err) => error_response(err),
    }
}
