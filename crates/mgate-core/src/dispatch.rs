use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use mgate_protocol::chat::request::ChatRequest;
use mgate_protocol::chat::response::{ChatChoice, ChatResponse};
use mgate_protocol::chat::types::{ChatMessage, Usage};

use crate::error::{RelayError, RelayResult};
use crate::registry::{CallMode, Resolved};
use crate::upstream::{
    StreamItem, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse,
};

/// Default whole-call bound for blocking-mode completions.
pub const COMPLETE_TIMEOUT: Duration = Duration::from_secs(60);

/// Issues the completion call to a resolved provider, in the provider's
/// calling convention. One attempt per call; retry policy belongs to the
/// caller side of the gateway boundary.
pub struct Dispatcher {
    client: Arc<dyn UpstreamClient>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            client,
            request_timeout: COMPLETE_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Blocking-mode completion, bounded by the request timeout.
    pub async fn complete(
        &self,
        request: &ChatRequest,
        route: &Resolved,
    ) -> RelayResult<ChatResponse> {
        match tokio::time::timeout(self.request_timeout, self.complete_inner(request, route)).await
        {
            Ok(result) => result,
            Err(_) => Err(RelayError::Cancelled(format!(
                "no upstream response within {:?}",
                self.request_timeout
            ))),
        }
    }

    async fn complete_inner(
        &self,
        request: &ChatRequest,
        route: &Resolved,
    ) -> RelayResult<ChatResponse> {
        debug!(
            model = %route.model,
            provider = route.provider.name(),
            base_url = %route.provider.base_url,
            "dispatching completion"
        );
        let body = match route.provider.mode() {
            CallMode::Uniform => uniform_body(request, &route.model, false)?,
            CallMode::Native => native_body(request, &route.model, false)?,
        };
        let resp = self.send(route, body, false).await?;
        let bytes = expect_bytes(resp.body)?;
        if !(200..300).contains(&resp.status) {
            return Err(RelayError::Upstream {
                status: resp.status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        match route.provider.mode() {
            CallMode::Uniform => map_uniform_response(&bytes),
            CallMode::Native => map_native_response(&bytes),
        }
    }

    /// Opens the upstream SSE stream for a streaming-mode call. A non-2xx
    /// answer is read in full and surfaced as an upstream error before
    /// any frame reaches the caller.
    pub async fn open_stream(
        &self,
        request: &ChatRequest,
        route: &Resolved,
    ) -> RelayResult<mpsc::Receiver<StreamItem>> {
        debug!(
            model = %route.model,
            provider = route.provider.name(),
            base_url = %route.provider.base_url,
            "dispatching stream"
        );
        let body = match route.provider.mode() {
            CallMode::Uniform => uniform_body(request, &route.model, true)?,
            CallMode::Native => native_body(request, &route.model, true)?,
        };
        let resp = self.send(route, body, true).await?;
        if !(200..300).contains(&resp.status) {
            let bytes = expect_bytes(resp.body)?;
            return Err(RelayError::Upstream {
                status: resp.status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        match resp.body {
            UpstreamBody::Stream(rx) => Ok(rx),
            // Upstream ignored the stream request; relay the whole body
            // as a single unit.
            UpstreamBody::Bytes(bytes) => {
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.try_send(Ok(bytes));
                Ok(rx)
            }
        }
    }

    async fn send(
        &self,
        route: &Resolved,
        body: Bytes,
        accept_stream: bool,
    ) -> RelayResult<UpstreamResponse> {
        let req = UpstreamRequest {
            url: chat_completions_url(&route.provider.base_url),
            api_key: route.provider.api_key.clone(),
            body,
            accept_stream,
        };
        self.client.send(req).await.map_err(RelayError::from)
    }
}

impl From<UpstreamFailure> for RelayError {
    fn from(failure: UpstreamFailure) -> Self {
        match failure {
            UpstreamFailure::Timeout(message) => RelayError::Cancelled(message),
            // Transport failures carry no upstream status; surface them
            // as a bad-gateway upstream error.
            UpstreamFailure::Transport(message) => RelayError::Upstream {
                status: 502,
                body: message,
            },
        }
    }
}

fn chat_completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn expect_bytes(body: UpstreamBody) -> RelayResult<Bytes> {
    match body {
        UpstreamBody::Bytes(bytes) => Ok(bytes),
        UpstreamBody::Stream(_) => Err(RelayError::Translation(
            "unexpected streaming upstream body".to_string(),
        )),
    }
}

/// The uniform SDK request shape. Only the fields the gateway relays;
/// optional sampling parameters are forwarded when the caller set them.
#[derive(Serialize)]
struct UniformChatRequest<'a> {
    model: &'a str,
    messages: Vec<UniformMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "is_false")]
    stream: bool,
}

#[derive(Serialize)]
struct UniformMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct UniformChatResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    object: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<UniformChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct UniformChoice {
    message: UniformResponseMessage,
    #[serde(default)]
    finish_reason: String,
}

#[derive(Deserialize)]
struct UniformResponseMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Uniform mode rebuilds the request through the shared SDK shape.
fn uniform_body(request: &ChatRequest, model: &str, stream: bool) -> RelayResult<Bytes> {
    let messages = request
        .messages
        .iter()
        .map(|message| UniformMessage {
            role: &message.role,
            content: &message.content,
        })
        .collect();
    let upstream = UniformChatRequest {
        model,
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        stream,
    };
    serde_json::to_vec(&upstream)
        .map(Bytes::from)
        .map_err(|err| RelayError::Translation(err.to_string()))
}

/// Native mode forwards the caller's envelope as-is apart from the
/// resolved model id and the stream flag.
fn native_body(request: &ChatRequest, model: &str, stream: bool) -> RelayResult<Bytes> {
    let mut upstream = request.clone();
    upstream.model = model.to_string();
    upstream.stream = stream;
    serde_json::to_vec(&upstream)
        .map(Bytes::from)
        .map_err(|err| RelayError::Translation(err.to_string()))
}

fn map_uniform_response(bytes: &[u8]) -> RelayResult<ChatResponse> {
    let resp: UniformChatResponse = serde_json::from_slice(bytes)
        .map_err(|err| RelayError::Translation(format!("uniform response: {err}")))?;

    let choices = resp
        .choices
        .into_iter()
        .enumerate()
        .map(|(index, choice)| ChatChoice {
            index: index as u32,
            message: ChatMessage {
                role: choice.message.role,
                content: choice.message.content,
            },
            finish_reason: choice.finish_reason,
        })
        .collect();

    Ok(ChatResponse {
        id: resp.id,
        object: if resp.object.is_empty() {
            "chat.completion".to_string()
        } else {
            resp.object
        },
        created: resp.created,
        model: resp.model,
        choices,
        usage: resp.usage,
    })
}

fn map_native_response(bytes: &[u8]) -> RelayResult<ChatResponse> {
    let mut resp: ChatResponse = serde_json::from_slice(bytes)
        .map_err(|err| RelayError::Translation(format!("native response: {err}")))?;
    if resp.id.is_empty() {
        resp.id = synthesize_id();
    }
    if resp.created == 0 {
        resp.created = now_unix();
    }
    Ok(resp)
}

pub(crate) fn synthesize_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

pub(crate) fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
