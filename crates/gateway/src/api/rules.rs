//! Rule-authoring RPC surface.
//!
//! Two operations: fetch the active bundle for a clinic (optionally
//! with snapshot history), and upsert a bundle snapshot. The upsert
//! validates the bundle, computes and stores its SHA-256, and bumps the
//! version; activating a snapshot demotes the previously active one.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use mg_policy::canonical::bundle_digest;
use mg_policy::validate_bundle;
use mg_scheduling::{PolicySnapshot, SnapshotStatus};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    pub clinic_id: Uuid,
    #[serde(default)]
    pub include_history: bool,
}

pub async fn active_bundle(
    State(state): State<AppState>,
    Query(query): Query<ActiveQuery>,
) -> Response {
    let active = match state.scheduling_repo.active_snapshot(query.clinic_id).await {
        Ok(active) => active,
        Err(e) => {
            tracing::error!(error = %e, "active snapshot lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut payload = json!({
        "active": active.as_ref().map(|s| json!({
            "snapshot_id": s.snapshot_id.to_string(),
            "version": s.version,
            "sha256": s.sha256,
            "status": s.status,
            "bundle": s.bundle,
            "created_at": s.created_at,
        })),
    });

    if query.include_history {
        match state.scheduling_repo.snapshots(query.clinic_id).await {
            Ok(history) => {
                payload["history"] = json!(history
                    .iter()
                    .map(|s| json!({
                        "snapshot_id": s.snapshot_id.to_string(),
                        "version": s.version,
                        "sha256": s.sha256,
                        "status": s.status,
                        "created_at": s.created_at,
                    }))
                    .collect::<Vec<_>>());
            }
            Err(e) => {
                tracing::error!(error = %e, "snapshot history lookup failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    Json(payload).into_response()
}

#[derive(Debug, Deserialize)]
pub struct UpsertRequest {
    pub clinic_id: Uuid,
    pub bundle: Value,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn upsert_snapshot(
    State(state): State<AppState>,
    Json(request): Json<UpsertRequest>,
) -> Response {
    // Validation problems come back all at once, 422.
    let problems = validate_bundle(&request.bundle);
    if !problems.is_empty() {
        let rendered: Vec<Value> = problems
            .iter()
            .map(|p| json!({"location": p.location, "message": p.message}))
            .collect();
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "bundle_invalid", "problems": rendered})),
        )
            .into_response();
    }

    let version = match state.scheduling_repo.snapshots(request.clinic_id).await {
        Ok(history) => history.iter().map(|s| s.version).max().unwrap_or(0) + 1,
        Err(e) => {
            tracing::error!(error = %e, "snapshot history lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let sha256 = bundle_digest(&request.bundle);
    let mut snapshot = PolicySnapshot::new(
        request.clinic_id,
        request.bundle,
        sha256.clone(),
        version,
        request.actor_id,
    );
    snapshot.status = request.status;
    if let Some(metadata) = request.metadata {
        snapshot.metadata = metadata;
    }
    let snapshot_id = snapshot.snapshot_id;

    if let Err(e) = state.scheduling_repo.upsert_snapshot(snapshot).await {
        tracing::error!(error = %e, "snapshot upsert failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    Json(json!({
        "snapshot_id": snapshot_id.to_string(),
        "version": version,
        "sha256": sha256,
        "status": request.status,
    }))
    .into_response()
}
