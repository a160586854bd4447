//! Client API key authentication middleware.
//!
//! Every request to the client port must present the proxy's own access
//! token, either as `x-api-key` (checked first, matching the Anthropic SDKs'
//! default header) or as `Authorization: Bearer <token>`. Unlike the
//! per-client key map this middleware's teacher ancestor enforced, this proxy
//! has exactly one token — generated at startup or read from
//! `server.access_token_env` — so there is no profile to resolve or inject.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;

use crate::{dispatch::AppState, error::ProxyError};

/// Axum middleware: rejects requests that don't present the proxy's access
/// token via `x-api-key` or `Authorization: Bearer`.
pub async fn client_auth_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let provided: Option<String> = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            req.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::to_string);

    let expected = state.proxy_access_token();
    match provided {
        Some(key) if key.as_bytes().ct_eq(expected.expose_secret().as_bytes()).into() => next.run(req).await,
        Some(_) => ProxyError::Authentication("invalid API key".to_string()).into_response(),
        None => ProxyError::Authentication("missing API key".to_string()).into_response(),
    }
}
