//! HTTP response mapping for [`relay_sdk::RouterError`].
//!
//! Every variant of the ten-kind taxonomy (spec §7) maps to exactly one
//! `StatusCode` + JSON body here, mirroring the teacher's one-variant-per-arm
//! `IntoResponse` pattern. v1 routes use conventional 4xx/5xx bodies; the
//! admin 200-wrapped envelope named in the spec's error-envelope section does
//! not apply here since the admin CRUD surface is out of scope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_sdk::RouterError;
use serde_json::json;

/// Thin wrapper so handlers can `?`-propagate a `RouterError` straight into
/// an HTTP response without the orphan-rule trouble of implementing
/// `IntoResponse` for a foreign type.
pub struct GatewayError(pub RouterError);

impl From<RouterError> for GatewayError {
    fn from(err: RouterError) -> Self {
        Self(err)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, error_type) = match &self.0 {
            RouterError::ValidationError { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
            RouterError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            RouterError::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication_error"),
            RouterError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            RouterError::PoolExhausted { .. } => (StatusCode::SERVICE_UNAVAILABLE, "pool_exhausted"),
            RouterError::UpstreamFailure { .. } => (StatusCode::BAD_GATEWAY, "upstream_failure"),
            RouterError::AllProvidersUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "all_providers_unavailable")
            }
            RouterError::CircuitOpen { .. } => (StatusCode::SERVICE_UNAVAILABLE, "circuit_open"),
            RouterError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            RouterError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

/// The one deviation from a blanket `RouterError → status` map (spec §6:
/// "Unknown model → 400 with list of available models"). Handlers check for
/// this case explicitly, since building the list needs the Repository.
pub fn unknown_model_response(model: &str, available: &[String]) -> Response {
    let body = Json(json!({
        "error": {
            "message": format!("unknown model '{model}'"),
            "type": "validation_error",
            "code": 400,
            "available_models": available
        }
    }));
    (StatusCode::BAD_REQUEST, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn pool_exhausted_maps_to_503() {
        let err = GatewayError(RouterError::PoolExhausted {
            model: "gpt-4o".to_string(),
            provider: "openai-primary".to_string(),
            waited_ms: 30_000,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn validation_error_body_carries_message() {
        let err = GatewayError(RouterError::validation("model", "missing"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "validation_error");
    }
}
