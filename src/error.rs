//! Error taxonomy and axum `IntoResponse` glue.
//!
//! Two layers:
//! - [`ProxyError`] is a `thiserror`-derived enum covering the Anthropic error
//!   taxonomy from the wire contract (`authentication_error`,
//!   `invalid_request_error`, `overloaded_error`, `api_error`, ...). The
//!   dispatcher constructs these deliberately, so the HTTP status and
//!   Anthropic `error.type` are chosen once, not string-matched out of an
//!   opaque `anyhow::Error`.
//! - [`AppError`] wraps `anyhow::Error` for the handful of ambient endpoints
//!   (`/healthz`, admin) where the full typed taxonomy is unnecessary,
//!   following the blanket `From<E: Into<anyhow::Error>>` idiom.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

/// The Anthropic error taxonomy this proxy can emit, each carrying its own
/// HTTP status per the wire contract in the top-level design notes.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{message}")]
    Upstream { status: StatusCode, error_type: String, message: String },
    #[error("upstream request timed out")]
    Overloaded,
    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    /// The Anthropic `error.type` discriminant for this variant.
    pub fn anthropic_type(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication_error",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Upstream { error_type, .. } => match error_type.as_str() {
                "invalid_request_error" => "invalid_request_error",
                "authentication_error" => "authentication_error",
                "permission_error" => "permission_error",
                "not_found_error" => "not_found_error",
                "rate_limit_error" => "rate_limit_error",
                "overloaded_error" => "overloaded_error",
                _ => "api_error",
            },
            Self::Overloaded => "overloaded_error",
            Self::Internal(_) => "api_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => *status,
            Self::Overloaded => StatusCode::from_u16(529).unwrap(),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render as the canonical Anthropic error envelope:
    /// `{"type": "error", "error": {"type": ..., "message": ...}}`.
    pub fn to_envelope(&self) -> serde_json::Value {
        json!({
            "type": "error",
            "error": {
                "type": self.anthropic_type(),
                "message": self.to_string(),
            }
        })
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::warn!(error_type = self.anthropic_type(), message = %self, "request failed");
        (self.status(), Json(self.to_envelope())).into_response()
    }
}

/// Wraps `anyhow::Error` so it can be returned from axum handlers that don't
/// need the typed [`ProxyError`] taxonomy (ambient admin/health endpoints).
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "handler error");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_maps_to_400() {
        let e = ProxyError::InvalidRequest("bad json".into());
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.anthropic_type(), "invalid_request_error");
    }

    #[test]
    fn overloaded_maps_to_529() {
        let e = ProxyError::Overloaded;
        assert_eq!(e.status().as_u16(), 529);
        assert_eq!(e.anthropic_type(), "overloaded_error");
    }

    #[test]
    fn upstream_passes_through_recognized_error_type() {
        let e = ProxyError::Upstream {
            status: StatusCode::TOO_MANY_REQUESTS,
            error_type: "rate_limit_error".into(),
            message: "slow down".into(),
        };
        assert_eq!(e.anthropic_type(), "rate_limit_error");
    }

    #[test]
    fn upstream_unknown_error_type_falls_back_to_api_error() {
        let e = ProxyError::Upstream {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error_type: "something_weird".into(),
            message: "oops".into(),
        };
        assert_eq!(e.anthropic_type(), "api_error");
    }

    #[test]
    fn envelope_shape_matches_anthropic_contract() {
        let e = ProxyError::Authentication("missing API key".into());
        let envelope = e.to_envelope();
        assert_eq!(envelope["type"], "error");
        assert_eq!(envelope["error"]["type"], "authentication_error");
        assert_eq!(envelope["error"]["message"], "missing API key");
    }
}
