use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mgate_protocol::chat::request::ChatRequest;
use mgate_protocol::chat::response::{ChatChoice, ChatResponse};
use mgate_protocol::chat::stream::StreamChunk;
use mgate_protocol::chat::types::{ChatMessage, Usage};
use mgate_protocol::error::ErrorBody;
use mgate_protocol::sse::{DONE_PAYLOAD, SseParser, encode_data, encode_done};

use crate::caller::Caller;
use crate::dispatch::{Dispatcher, now_unix, synthesize_id};
use crate::error::{RelayError, RelayResult};
use crate::recorder::{CallOutcome, CompletedCall, UsageRecorder};
use crate::registry::Resolved;
use crate::tokens::TokenEstimator;
use crate::upstream::StreamItem;

/// Hard bound on a whole streamed call, independent of per-read idle
/// timeouts in the upstream client.
pub const STREAM_DEADLINE: Duration = Duration::from_secs(180);

const FRAME_CHANNEL: usize = 16;

/// Relays an upstream SSE stream to a downstream frame channel while
/// accumulating enough state to finalize the call exactly once: frames
/// out as they arrive, one terminal `[DONE]`, one usage record.
pub struct StreamBridge {
    dispatcher: Arc<Dispatcher>,
    estimator: Arc<TokenEstimator>,
    recorder: Arc<dyn UsageRecorder>,
    deadline: Duration,
}

impl StreamBridge {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        estimator: Arc<TokenEstimator>,
        recorder: Arc<dyn UsageRecorder>,
    ) -> Self {
        Self {
            dispatcher,
            estimator,
            recorder,
            deadline: STREAM_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Opens the upstream stream and starts relaying. Errors before the
    /// first upstream frame surface here so the caller can still answer
    /// with a plain error response; they are recorded as failed calls.
    /// After this returns `Ok`, everything including failures flows
    /// through the returned frame channel.
    pub async fn open(
        &self,
        request: ChatRequest,
        route: Resolved,
        caller: Caller,
    ) -> RelayResult<mpsc::Receiver<Bytes>> {
        let started = Instant::now();
        let upstream = match self.dispatcher.open_stream(&request, &route).await {
            Ok(upstream) => upstream,
            Err(err) => {
                self.recorder
                    .record(self.failed_call(&request, &route, &caller, started, &err))
                    .await;
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL);
        let estimator = self.estimator.clone();
        let recorder = self.recorder.clone();
        let deadline = self.deadline;
        tokio::spawn(async move {
            relay(
                upstream, tx, request, route, caller, estimator, recorder, started, deadline,
            )
            .await;
        });
        Ok(rx)
    }

    fn failed_call(
        &self,
        request: &ChatRequest,
        route: &Resolved,
        caller: &Caller,
        started: Instant,
        err: &RelayError,
    ) -> CompletedCall {
        let prompt = self.estimator.count_messages(&request.messages, &route.model);
        CompletedCall {
            caller_id: caller.id.clone(),
            model: route.model.clone(),
            provider: route.provider.name().to_string(),
            outcome: CallOutcome::Failure,
            usage: Usage::from_counts(prompt, 0),
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(err.to_string()),
            response: None,
        }
    }
}

/// What accumulates while frames pass through.
struct StreamState {
    id: String,
    created: i64,
    content: String,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            id: String::new(),
            created: 0,
            content: String::new(),
            finish_reason: None,
            usage: None,
        }
    }

    fn absorb(&mut self, chunk: StreamChunk) {
        if self.id.is_empty() && !chunk.id.is_empty() {
            self.id = chunk.id;
        }
        if self.created == 0 && chunk.created != 0 {
            self.created = chunk.created;
        }
        // Usage may ride on any chunk, not only the last; when present
        // it is authoritative over our own estimate.
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.content.push_str(&content);
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }
    }
}

enum Flow {
    Continue,
    Done,
}

#[allow(clippy::too_many_arguments)]
async fn relay(
    upstream: mpsc::Receiver<StreamItem>,
    tx: mpsc::Sender<Bytes>,
    request: ChatRequest,
    route: Resolved,
    caller: Caller,
    estimator: Arc<TokenEstimator>,
    recorder: Arc<dyn UsageRecorder>,
    started: Instant,
    deadline: Duration,
) {
    let mut state = StreamState::new();
    let result = pump(upstream, &tx, &mut state, deadline).await;
    finish(
        result, state, tx, request, route, caller, estimator, recorder, started,
    )
    .await;
}

/// Drains the upstream channel into downstream frames, mutating the
/// accumulated state. Returns once per stream: `Ok` on a clean end
/// (`[DONE]` or channel close), `Err` on deadline, transport failure or
/// a dropped downstream.
async fn pump(
    mut upstream: mpsc::Receiver<StreamItem>,
    tx: &mpsc::Sender<Bytes>,
    state: &mut StreamState,
    deadline: Duration,
) -> RelayResult<()> {
    let mut parser = SseParser::new();
    let expiry = tokio::time::sleep(deadline);
    tokio::pin!(expiry);

    loop {
        let item = tokio::select! {
            _ = &mut expiry => {
                return Err(RelayError::Cancelled(format!(
                    "stream exceeded {deadline:?} deadline"
                )));
            }
            item = upstream.recv() => item,
        };
        let Some(item) = item else {
            // Upstream closed without [DONE]; drain the tail, treat it as
            // a clean end and synthesize the terminator ourselves.
            for payload in parser.finish() {
                if let Flow::Done = relay_payload(&payload, tx, state).await? {
                    break;
                }
            }
            return Ok(());
        };
        let bytes = item.map_err(RelayError::from)?;

        for payload in parser.push_bytes(&bytes) {
            match relay_payload(&payload, tx, state).await? {
                Flow::Continue => {}
                Flow::Done => return Ok(()),
            }
        }
    }
}

async fn relay_payload(
    payload: &str,
    tx: &mpsc::Sender<Bytes>,
    state: &mut StreamState,
) -> RelayResult<Flow> {
    if payload == DONE_PAYLOAD {
        return Ok(Flow::Done);
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => state.absorb(chunk),
        // Relay tolerantly: an unparsable frame still reaches the
        // caller, it just cannot contribute to accounting.
        Err(err) => warn!(error = %err, "unparsable stream chunk"),
    }
    if tx.send(encode_data(payload)).await.is_err() {
        return Err(RelayError::Cancelled("client disconnected".to_string()));
    }
    Ok(Flow::Continue)
}

/// The single finalize point: emits the terminal frames and the one
/// usage record, for clean and failed streams alike.
#[allow(clippy::too_many_arguments)]
async fn finish(
    result: RelayResult<()>,
    state: StreamState,
    tx: mpsc::Sender<Bytes>,
    request: ChatRequest,
    route: Resolved,
    caller: Caller,
    estimator: Arc<TokenEstimator>,
    recorder: Arc<dyn UsageRecorder>,
    started: Instant,
) {
    let error = result.err();
    if let Some(err) = &error {
        let body = ErrorBody::new(err.kind(), err.to_string());
        if let Ok(frame) = serde_json::to_string(&body) {
            let _ = tx.send(encode_data(&frame)).await;
        }
    }
    // Exactly one terminator, whatever the upstream did.
    let _ = tx.send(encode_done()).await;
    drop(tx);

    let usage = match state.usage {
        Some(usage) => usage,
        None => {
            let prompt = estimator.count_messages(&request.messages, &route.model);
            let completion = estimator.count_text(&state.content, &route.model);
            Usage::from_counts(prompt, completion)
        }
    };

    let outcome = if error.is_none() {
        CallOutcome::Success
    } else {
        CallOutcome::Failure
    };
    let response = ChatResponse {
        id: if state.id.is_empty() {
            synthesize_id()
        } else {
            state.id
        },
        object: "chat.completion".to_string(),
        created: if state.created == 0 {
            now_unix()
        } else {
            state.created
        },
        model: route.model.clone(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: state.content,
            },
            finish_reason: state.finish_reason.unwrap_or_default(),
        }],
        usage,
    };

    debug!(
        caller = %caller.id,
        model = %route.model,
        outcome = outcome.as_str(),
        total_tokens = usage.total_tokens,
        "stream finalized"
    );
    recorder
        .record(CompletedCall {
            caller_id: caller.id,
            model: route.model,
            provider: route.provider.name().to_string(),
            outcome,
            usage,
            duration_ms: started.elapsed().as_millis() as u64,
            error: error.map(|err| err.to_string()),
            response: Some(response),
        })
        .await;
}
