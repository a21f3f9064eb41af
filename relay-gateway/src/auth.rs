//! Bearer-token authentication (spec §6).
//!
//! Business endpoints (`/v1/chat/completions`, `/v1/messages`) always
//! require a valid bearer token when `config.auth.api_keys` is non-empty.
//! An empty set disables auth entirely — the development-mode default.

use crate::server::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Strips a `Bearer ` prefix, or accepts a raw key that already looks like
/// one (`sk-...`) for clients that send the header without the scheme.
pub fn extract_api_key_from_header(auth_header: Option<&str>) -> Option<String> {
    auth_header.and_then(|header| {
        if let Some(stripped) = header.strip_prefix("Bearer ") {
            Some(stripped.to_string())
        } else if header.starts_with("sk-") {
            Some(header.to_string())
        } else {
            None
        }
    })
}

fn unauthorized(message: &str) -> Response {
    let body = Json(json!({
        "error": format!("API key {message}"),
        "message": message,
    }));
    (StatusCode::UNAUTHORIZED, body).into_response()
}

fn header_auth(headers: &HeaderMap, api_keys: &[String]) -> Result<(), Response> {
    if api_keys.is_empty() {
        return Ok(());
    }
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let Some(key) = extract_api_key_from_header(header) else {
        return Err(unauthorized("missing or malformed"));
    };
    if api_keys.iter().any(|k| k == &key) {
        Ok(())
    } else {
        Err(unauthorized("is invalid"))
    }
}

/// Applied to `/v1/chat/completions` and `/v1/messages`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Err(response) = header_auth(request.headers(), &state.config.auth.api_keys) {
        return response;
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bearer_prefix() {
        assert_eq!(
            extract_api_key_from_header(Some("Bearer sk-abc")),
            Some("sk-abc".to_string())
        );
    }

    #[test]
    fn accepts_raw_sk_prefixed_key() {
        assert_eq!(
            extract_api_key_from_header(Some("sk-abc")),
            Some("sk-abc".to_string())
        );
    }

    #[test]
    fn rejects_unrecognized_scheme() {
        assert_eq!(extract_api_key_from_header(Some("Basic abc")), None);
    }

    #[test]
    fn empty_key_set_disables_auth() {
        let headers = HeaderMap::new();
        assert!(header_auth(&headers, &[]).is_ok());
    }

    #[test]
    fn missing_header_is_rejected_when_keys_configured() {
        let headers = HeaderMap::new();
        assert!(header_auth(&headers, &["sk-configured".to_string()]).is_err());
    }

    #[test]
    fn matching_key_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer sk-configured".parse().unwrap(),
        );
        assert!(header_auth(&headers, &["sk-configured".to_string()]).is_ok());
    }
}
