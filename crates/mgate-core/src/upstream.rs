use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Proxy};

/// One upstream completion call, already serialized.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub api_key: String,
    pub body: Bytes,
    /// Ask the upstream for an SSE body and deliver it incrementally.
    pub accept_stream: bool,
}

/// Items of a streaming body: raw byte chunks until the upstream either
/// closes cleanly (channel end) or fails (one terminal `Err`).
pub type StreamItem = Result<Bytes, UpstreamFailure>;

pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<StreamItem>),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// The call or a stream read exceeded its time budget.
    Timeout(String),
    /// Connection, TLS, DNS or mid-stream transport failure.
    Transport(String),
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamFailure::Timeout(message) => write!(f, "upstream timeout: {message}"),
            UpstreamFailure::Transport(message) => write!(f, "upstream transport: {message}"),
        }
    }
}

/// Seam between the dispatcher and the network so tests can stub the
/// upstream without sockets.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// Optional outbound proxy for upstream egress.
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    /// Whole-call bound; streaming calls are additionally bounded by the
    /// bridge deadline and the idle timeout below.
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(180),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    client: Client,
    stream_idle_timeout: Duration,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout);

        if let Some(proxy) = normalize_proxy(config.proxy.as_deref()) {
            builder = builder.proxy(Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }
}

fn normalize_proxy(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[async_trait::async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure> {
        let mut builder = self
            .client
            .post(&req.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", req.api_key));
        if req.accept_stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let resp = builder
            .body(req.body)
            .send()
            .await
            .map_err(map_wreq_error)?;

        let status = resp.status().as_u16();
        let is_success = (200..300).contains(&status);
        if !is_success || !req.accept_stream {
            let body = resp.bytes().await.map_err(map_wreq_error)?;
            return Ok(UpstreamResponse {
                status,
                body: UpstreamBody::Bytes(body),
            });
        }

        let idle = self.stream_idle_timeout;
        let (tx, rx) = mpsc::channel::<StreamItem>(16);
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            loop {
                let next = match tokio::time::timeout(idle, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let _ = tx
                            .send(Err(UpstreamFailure::Timeout(format!(
                                "no stream data for {idle:?}"
                            ))))
                            .await;
                        break;
                    }
                };
                let Some(item) = next else {
                    break;
                };
                let outcome = match item {
                    Ok(chunk) => tx.send(Ok(chunk)).await,
                    Err(err) => {
                        let _ = tx.send(Err(map_wreq_error(err))).await;
                        break;
                    }
                };
                if outcome.is_err() {
                    // Receiver dropped; stop pulling from the upstream.
                    break;
                }
            }
        });

        Ok(UpstreamResponse {
            status,
            body: UpstreamBody::Stream(rx),
        })
    }
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    if err.is_timeout() {
        UpstreamFailure::Timeout(err.to_string())
    } else {
        UpstreamFailure::Transport(err.to_string())
    }
}
