//! Client-facing API — the endpoint Anthropic SDK clients talk to.
//!
//! This is intentionally a thin layer: all translation and upstream-dispatch
//! logic lives in [`crate::dispatch`]. The handler here translates HTTP
//! concerns (extracting the request ID, handing over the raw body) into a
//! call to the dispatcher and back.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, State},
    response::Response,
    routing::post,
    Router,
};

use crate::{api::request_id::RequestId, dispatch::AppState};

/// Build the client-facing axum router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", axum::routing::get(super::health::healthz))
        .route("/v1/messages", post(messages))
        .with_state(state)
}

/// `POST /v1/messages`
pub async fn messages(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    body: Bytes,
) -> Response {
    crate::dispatch::handle_messages(&state, &body, &request_id).await
}
