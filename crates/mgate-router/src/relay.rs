use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use mgate_core::bridge::StreamBridge;
use mgate_core::caller::{AuthDenied, Caller, CallerDirectory};
use mgate_core::dispatch::Dispatcher;
use mgate_core::error::RelayError;
use mgate_core::quota::check_usage;
use mgate_core::recorder::{CallOutcome, CompletedCall, UsageRecorder};
use mgate_core::registry::{ProviderRegistry, Resolved};
use mgate_core::tokens::TokenEstimator;
use mgate_protocol::chat::request::ChatRequest;
use mgate_protocol::chat::response::ChatResponse;
use mgate_protocol::chat::types::Usage;
use mgate_protocol::error::ErrorBody;
use mgate_protocol::models::ModelList;

#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<ProviderRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub bridge: Arc<StreamBridge>,
    pub directory: Arc<dyn CallerDirectory>,
    pub recorder: Arc<dyn UsageRecorder>,
    pub estimator: Arc<TokenEstimator>,
}

pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models_list))
        .with_state(state)
}

async fn models_list(State(state): State<GatewayState>) -> Response {
    Json(ModelList::new(state.registry.models())).into_response()
}

async fn chat_completions(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let caller = match state.directory.authorize(extract_api_key(&headers).as_deref()) {
        Ok(caller) => caller,
        Err(denied) => return auth_response(denied),
    };

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("malformed request body: {err}"),
            );
        }
    };
    if request.messages.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "messages must not be empty",
        );
    }

    if let Err(err) = check_usage(caller.usage.as_ref(), caller.policy.as_ref()) {
        info!(caller = %caller.id, error = %err, "quota rejection");
        return relay_error_response(&err);
    }

    let route = match state.registry.resolve(&request.model) {
        Ok(route) => route,
        Err(err) => {
            warn!(model = %request.model, error = %err, "resolution failed");
            return relay_error_response(&err);
        }
    };

    if request.stream {
        stream_completion(state, request, route, caller).await
    } else {
        blocking_completion(state, request, route, caller).await
    }
}

async fn blocking_completion(
    state: GatewayState,
    request: ChatRequest,
    route: Resolved,
    caller: Caller,
) -> Response {
    let started = Instant::now();
    match state.dispatcher.complete(&request, &route).await {
        Ok(response) => {
            record_completion(
                &state,
                &request,
                &route,
                &caller,
                started,
                Ok(&response),
            );
            Json(response).into_response()
        }
        Err(err) => {
            record_completion(&state, &request, &route, &caller, started, Err(&err));
            relay_error_response(&err)
        }
    }
}

/// Emits the usage record for a blocking call off the response path.
fn record_completion(
    state: &GatewayState,
    request: &ChatRequest,
    route: &Resolved,
    caller: &Caller,
    started: Instant,
    result: Result<&ChatResponse, &RelayError>,
) {
    let (outcome, usage, error, response) = match result {
        Ok(response) => {
            let usage = if response.usage.total_tokens > 0 {
                response.usage
            } else {
                let prompt = state.estimator.count_messages(&request.messages, &route.model);
                let completion = response
                    .choices
                    .first()
                    .map(|choice| state.estimator.count_text(&choice.message.content, &route.model))
                    .unwrap_or(0);
                Usage::from_counts(prompt, completion)
            };
            (CallOutcome::Success, usage, None, Some(response.clone()))
        }
        Err(err) => {
            let prompt = state.estimator.count_messages(&request.messages, &route.model);
            (
                CallOutcome::Failure,
                Usage::from_counts(prompt, 0),
                Some(err.to_string()),
                None,
            )
        }
    };

    let call = CompletedCall {
        caller_id: caller.id.clone(),
        model: route.model.clone(),
        provider: route.provider.name().to_string(),
        outcome,
        usage,
        duration_ms: started.elapsed().as_millis() as u64,
        error,
        response,
    };
    let recorder = state.recorder.clone();
    tokio::spawn(async move {
        recorder.record(call).await;
    });
}

async fn stream_completion(
    state: GatewayState,
    request: ChatRequest,
    route: Resolved,
    caller: Caller,
) -> Response {
    // Errors past this point ride inside the stream; the bridge records
    // usage for both paths.
    let rx = match state.bridge.open(request, route, caller).await {
        Ok(rx) => rx,
        Err(err) => return relay_error_response(&err),
    };

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    // Hint common reverse proxies to avoid buffering SSE responses.
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        let prefix = "Bearer ";
        if s.len() > prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = s[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    if let Some(value) = headers.get("x-api-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }

    None
}

fn auth_response(denied: AuthDenied) -> Response {
    let (status, kind) = match denied {
        AuthDenied::MissingKey => (StatusCode::UNAUTHORIZED, "missing_api_key"),
        AuthDenied::UnknownKey => (StatusCode::FORBIDDEN, "invalid_api_key"),
    };
    error_response(status, kind, denied.to_string())
}

fn relay_error_response(err: &RelayError) -> Response {
    error_response(relay_status(err), err.kind(), err.to_string())
}

fn error_response(
    status: StatusCode,
    kind: &str,
    message: impl Into<String>,
) -> Response {
    (status, Json(ErrorBody::new(kind, message))).into_response()
}

fn relay_status(err: &RelayError) -> StatusCode {
    match err {
        RelayError::UnsupportedModel(_) => StatusCode::NOT_FOUND,
        RelayError::ProviderNotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        RelayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        RelayError::Cancelled(_) => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Translation(_) => StatusCode::BAD_GATEWAY,
    }
}
