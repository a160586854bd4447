//! Admin API (separate port) — operator-facing introspection endpoints.
//!
//! Kept on its own listener so it can be network-restricted independently of
//! the client-facing API (e.g. reachable only from an internal network,
//! never exposed publicly).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::dispatch::AppState;

/// Build the admin-facing axum router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(super::health::healthz))
        .route("/admin/traffic", get(traffic))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct TrafficQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

/// `GET /admin/traffic?limit=N` — recent N traffic entries (default 100).
pub async fn traffic(State(state): State<Arc<AppState>>, Query(q): Query<TrafficQuery>) -> impl IntoResponse {
    let entries = state.traffic.recent(q.limit).await;
    Json(json!({ "entries": entries }))
}
