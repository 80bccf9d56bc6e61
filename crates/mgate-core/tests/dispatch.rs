use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use mgate_core::dispatch::Dispatcher;
use mgate_core::error::RelayError;
use mgate_core::registry::{ProviderConfig, ProviderFamily, Resolved};
use mgate_core::upstream::{
    UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse,
};
use mgate_protocol::chat::request::ChatRequest;
use mgate_protocol::chat::types::ChatMessage;

/// Replays a canned upstream answer and captures what was sent.
struct StubClient {
    status: u16,
    body: &'static str,
    seen: Mutex<Vec<UpstreamRequest>>,
}

impl StubClient {
    fn new(status: u16, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            status,
            body,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn last_request(&self) -> UpstreamRequest {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait::async_trait]
impl UpstreamClient for StubClient {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure> {
        self.seen.lock().unwrap().push(req);
        Ok(UpstreamResponse {
            status: self.status,
            body: UpstreamBody::Bytes(Bytes::from_static(self.body.as_bytes())),
        })
    }
}

/// Never answers; exercises the whole-call timeout.
struct StalledClient;

#[async_trait::async_trait]
impl UpstreamClient for StalledClient {
    async fn send(&self, _req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!()
    }
}

fn route(family: ProviderFamily, model: &str) -> Resolved {
    Resolved {
        provider: ProviderConfig::new(family, "sk-test"),
        model: model.to_string(),
    }
}

fn request(model: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: "hello".to_string(),
        }],
        temperature: None,
        max_tokens: None,
        top_p: None,
        stream: false,
    }
}

#[tokio::test]
async fn uniform_response_maps_into_the_wire_shape() {
    let upstream = r#"{
        "id": "x",
        "model": "gpt-4o",
        "choices": [
            {"message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}
        ],
        "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
    }"#;
    let client = StubClient::new(200, upstream);
    let dispatcher = Dispatcher::new(client.clone());

    let resp = dispatcher
        .complete(&request("gpt-4o"), &route(ProviderFamily::OpenAi, "gpt-4o"))
        .await
        .unwrap();

    assert_eq!(resp.id, "x");
    assert_eq!(resp.object, "chat.completion");
    assert_eq!(resp.choices.len(), 1);
    assert_eq!(resp.choices[0].index, 0);
    assert_eq!(resp.choices[0].message.content, "hi");
    assert_eq!(resp.choices[0].finish_reason, "stop");
    assert_eq!(
        (resp.usage.prompt_tokens, resp.usage.completion_tokens, resp.usage.total_tokens),
        (5, 1, 6)
    );
}

#[tokio::test]
async fn uniform_request_omits_unset_sampling_params() {
    let client = StubClient::new(200, r#"{"id":"x","choices":[],"usage":{}}"#);
    let dispatcher = Dispatcher::new(client.clone());

    dispatcher
        .complete(&request("gpt-4o"), &route(ProviderFamily::OpenAi, "gpt-4o"))
        .await
        .unwrap();

    let sent = client.last_request();
    assert_eq!(sent.url, "https://api.openai.com/v1/chat/completions");
    assert_eq!(sent.api_key, "sk-test");
    assert!(!sent.accept_stream);

    let body: serde_json::Value = serde_json::from_slice(&sent.body).unwrap();
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["messages"][0]["content"], "hello");
    assert!(body.get("temperature").is_none());
    assert!(body.get("top_p").is_none());
    assert!(body.get("stream").is_none());
}

#[tokio::test]
async fn native_response_gets_id_and_created_synthesized() {
    let upstream = r#"{
        "choices": [
            {"message": {"role": "assistant", "content": "hey"}, "finish_reason": "stop"}
        ]
    }"#;
    let client = StubClient::new(200, upstream);
    let dispatcher = Dispatcher::new(client.clone());
    let model = "claude-3-5-sonnet-20241022";

    let resp = dispatcher
        .complete(&request(model), &route(ProviderFamily::Claude, model))
        .await
        .unwrap();

    assert!(resp.id.starts_with("chatcmpl-"));
    assert!(resp.created > 0);
    assert_eq!(resp.choices[0].message.content, "hey");
}

#[tokio::test]
async fn native_request_forwards_the_envelope_with_resolved_model() {
    let client = StubClient::new(200, r#"{"id":"c1","created":1,"choices":[]}"#);
    let dispatcher = Dispatcher::new(client.clone());

    let mut req = request("auto-match");
    req.temperature = Some(0.2);
    dispatcher
        .complete(
            &req,
            &route(ProviderFamily::Claude, "claude-3-5-haiku-20241022"),
        )
        .await
        .unwrap();

    let body: serde_json::Value = serde_json::from_slice(&client.last_request().body).unwrap();
    assert_eq!(body["model"], "claude-3-5-haiku-20241022");
    assert_eq!(body["temperature"], 0.2);
}

#[tokio::test]
async fn non_success_status_surfaces_as_upstream_error() {
    let client = StubClient::new(500, r#"{"error":{"message":"boom"}}"#);
    let dispatcher = Dispatcher::new(client);

    let err = dispatcher
        .complete(&request("gpt-4o"), &route(ProviderFamily::OpenAi, "gpt-4o"))
        .await
        .unwrap_err();

    match err {
        RelayError::Upstream { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn stalled_upstream_is_cancelled_at_the_request_timeout() {
    let dispatcher =
        Dispatcher::new(Arc::new(StalledClient)).with_request_timeout(Duration::from_millis(50));

    let err = dispatcher
        .complete(&request("gpt-4o"), &route(ProviderFamily::OpenAi, "gpt-4o"))
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Cancelled(_)));
}

#[tokio::test]
async fn garbage_upstream_body_is_a_translation_error() {
    let client = StubClient::new(200, "not json");
    let dispatcher = Dispatcher::new(client);

    let err = dispatcher
        .complete(&request("gpt-4o"), &route(ProviderFamily::OpenAi, "gpt-4o"))
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Translation(_)));
}
