//! HTTP endpoint handlers (C10, §4.10): binds the OpenAI and Anthropic wire
//! formats onto [`relay_sdk::Router`], handling SSE framing and the header
//! set that disables proxy buffering for streaming responses.

use crate::gateway_error::{unknown_model_response, GatewayError};
use crate::server::{AppState, REQUEST_DEADLINE};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use relay_sdk::models::StreamChunk;
use relay_sdk::{ChatRequest, RouterError};
use serde_json::{json, Value};

/// A model-resolution miss from the Router always carries a `what` starting
/// with `"model '"` (see `Router::prepare`); anything else is a genuine
/// not-found (e.g. a `specified_provider` strategy target) and is surfaced
/// through the normal `GatewayError` mapping instead.
fn is_unknown_model(err: &RouterError) -> bool {
    matches!(err, RouterError::NotFound { what } if what.starts_with("model '"))
}

async fn unknown_model_error_response(state: &AppState, model: &str) -> Response {
    let available = state.router.available_models().await;
    unknown_model_response(model, &available)
}

/// Rough token estimate for streamed content, for metrics recording where no
/// upstream usage total is available (mirrors the 1-token-per-4-chars rule
/// used elsewhere for cost estimation).
fn estimate_tokens(chars: usize) -> u64 {
    (chars / 4) as u64
}

fn sse_stream_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(
        axum::http::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );
    headers.insert(
        "X-Accel-Buffering",
        HeaderValue::from_static("no"),
    );
    headers.insert(
        axum::http::header::CONTENT_ENCODING,
        HeaderValue::from_static("identity"),
    );
    headers.insert(
        axum::http::header::TRANSFER_ENCODING,
        HeaderValue::from_static("chunked"),
    );
}

/// `POST /v1/chat/completions` (§4.10, §6). Dispatches to the streaming path
/// when `stream: true`, otherwise runs under the non-streaming deadline.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, GatewayError> {
    if request.stream.unwrap_or(false) {
        return Ok(stream_openai_chat(state, request).await);
    }

    let model = request.model.clone();
    match tokio::time::timeout(REQUEST_DEADLINE, state.router.chat_completion(request, None)).await
    {
        Ok(Ok(response)) => Ok(Json(response).into_response()),
        Ok(Err(err)) if is_unknown_model(&err) => {
            Ok(unknown_model_error_response(&state, &model).await)
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_elapsed) => Err(RouterError::Timeout {
            elapsed_ms: REQUEST_DEADLINE.as_millis() as u64,
        }
        .into()),
    }
}

async fn stream_openai_chat(state: AppState, request: ChatRequest) -> Response {
    let model = request.model.clone();
    let dispatch = match state.router.stream_chat_completion(request, None).await {
        Ok(dispatch) => dispatch,
        Err(err) if is_unknown_model(&err) => {
            return unknown_model_error_response(&state, &model).await;
        }
        Err(err) => return GatewayError::from(err).into_response(),
    };

    let repo = state.repo.clone();
    let body_stream = async_stream::stream! {
        let relay_sdk::strategy::StreamDispatch { model_id, provider_id, mut stream, .. } = dispatch;
        let start = std::time::Instant::now();
        let mut chars = 0usize;
        let mut ok = true;

        while let Some(chunk_result) = stream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    if let Some(choice) = chunk.choices.first() {
                        if let Some(content) = &choice.delta.content {
                            chars += content.len();
                        }
                    }
                    let frame = encode_openai_chunk(&chunk);
                    yield Ok::<axum::body::Bytes, std::io::Error>(frame.into());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream read failed mid-flight");
                    ok = false;
                    break;
                }
            }
        }

        yield Ok::<axum::body::Bytes, std::io::Error>("data: [DONE]\n\n".into());

        relay_sdk::strategy::record_stream_outcome(
            &repo,
            model_id,
            provider_id,
            start.elapsed().as_secs_f64(),
            ok,
            estimate_tokens(chars),
        )
        .await;
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body_stream))
        .expect("static header values are always valid");
    sse_stream_headers(&mut response);
    response
}

fn encode_openai_chunk(chunk: &StreamChunk) -> String {
    format!(
        "data: {}\n\n",
        serde_json::to_string(chunk).unwrap_or_else(|_| "{}".to_string())
    )
}

/// `POST /v1/messages` (§4.10, §6): the Anthropic Messages endpoint, built on
/// the same Router dispatch as the OpenAI path via the Protocol Translator.
pub async fn messages(
    State(state): State<AppState>,
    Json(input): Json<relay_sdk::translate::AnthropicRequestIn>,
) -> Result<Response, GatewayError> {
    let stream = input.stream.unwrap_or(false);
    let request = relay_sdk::translate::anthropic_request_to_chat_request(input);

    if stream {
        return Ok(stream_anthropic_messages(state, request).await);
    }

    let model = request.model.clone();
    match tokio::time::timeout(REQUEST_DEADLINE, state.router.chat_completion(request, None)).await
    {
        Ok(Ok(response)) => {
            let body = relay_sdk::translate::chat_response_to_anthropic(&response);
            Ok(Json(body).into_response())
        }
        Ok(Err(err)) if is_unknown_model(&err) => {
            Ok(unknown_model_error_response(&state, &model).await)
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_elapsed) => Err(RouterError::Timeout {
            elapsed_ms: REQUEST_DEADLINE.as_millis() as u64,
        }
        .into()),
    }
}

async fn stream_anthropic_messages(state: AppState, request: ChatRequest) -> Response {
    let model = request.model.clone();
    let dispatch = match state.router.stream_chat_completion(request, None).await {
        Ok(dispatch) => dispatch,
        Err(err) if is_unknown_model(&err) => {
            return unknown_model_error_response(&state, &model).await;
        }
        Err(err) => return GatewayError::from(err).into_response(),
    };

    let repo = state.repo.clone();
    let message_id = format!("msg_{}", uuid::Uuid::new_v4());
    let body_stream = async_stream::stream! {
        let relay_sdk::strategy::StreamDispatch { model_id, provider_id, provider_name: _, mut stream } = dispatch;
        let mut encoder = relay_sdk::translate::AnthropicSseEncoder::new(message_id, model);
        let start = std::time::Instant::now();
        let mut chars = 0usize;
        let mut ok = true;

        while let Some(chunk_result) = stream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    if let Some(choice) = chunk.choices.first() {
                        if let Some(content) = &choice.delta.content {
                            chars += content.len();
                        }
                    }
                    let frame = encoder.encode_chunk(&chunk);
                    yield Ok::<axum::body::Bytes, std::io::Error>(frame.into());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream read failed mid-flight");
                    let frame = encoder.encode_error(&e.to_string());
                    yield Ok::<axum::body::Bytes, std::io::Error>(frame.into());
                    ok = false;
                    break;
                }
            }
        }

        relay_sdk::strategy::record_stream_outcome(
            &repo,
            model_id,
            provider_id,
            start.elapsed().as_secs_f64(),
            ok,
            estimate_tokens(chars),
        )
        .await;
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body_stream))
        .expect("static header values are always valid");
    sse_stream_headers(&mut response);
    response
}

fn aggregate_status_str(status: &relay_sdk::health::AggregateStatus) -> &'static str {
    use relay_sdk::health::AggregateStatus;
    match status {
        AggregateStatus::Healthy => "healthy",
        AggregateStatus::Degraded => "degraded",
        AggregateStatus::Unhealthy => "unhealthy",
        AggregateStatus::Unknown => "unknown",
    }
}

/// `GET /health` (§4.10): process liveness plus the last aggregate
/// `HealthChecker::check_all` result, refreshed in the background rather
/// than probed live on every request.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.health_snapshot.read().await;
    let models: Value = snapshot
        .iter()
        .map(|(name, status)| (name.clone(), Value::from(aggregate_status_str(status))))
        .collect::<serde_json::Map<_, _>>()
        .into();

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "models": models,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_detection_matches_router_prepare_format() {
        let err = RouterError::NotFound {
            what: "model 'ghost'".to_string(),
        };
        assert!(is_unknown_model(&err));

        let provider_err = RouterError::NotFound {
            what: "provider 'ghost' for model 'gpt-4o'".to_string(),
        };
        assert!(!is_unknown_model(&provider_err));
    }

    #[test]
    fn token_estimate_uses_four_chars_per_token() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(8), 2);
        assert_eq!(estimate_tokens(7), 1);
    }
}
