//! HTTP surface: transport webhook, scheduling REST, rule authoring.

pub mod rules;
pub mod scheduling;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        // Inbound messaging transport.
        .route("/webhooks/whatsapp", post(webhook::inbound))
        // Scheduling REST.
        .route("/api/scheduling/suggest", post(scheduling::suggest))
        .route("/api/scheduling/hold", post(scheduling::hold))
        .route("/api/scheduling/confirm", post(scheduling::confirm))
        .route(
            "/api/scheduling/escalations",
            get(scheduling::escalation_queue),
        )
        .route(
            "/api/scheduling/escalations/:id/assign",
            post(scheduling::escalation_assign),
        )
        .route(
            "/api/scheduling/escalations/:id/resolve",
            post(scheduling::escalation_resolve),
        )
        .route(
            "/api/scheduling/escalations/:id/decline",
            post(scheduling::escalation_decline),
        )
        // Rule authoring RPC.
        .route("/api/rules/active", get(rules::active_bundle))
        .route("/api/rules/snapshot", post(rules::upsert_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
