use mgate_protocol::chat::response::ChatResponse;
use mgate_protocol::chat::types::Usage;

/// How the relayed call ended, from the metering point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Completed normally; usage is provider-reported or estimated.
    Success,
    /// Ended early (upstream failure, disconnect, deadline); usage covers
    /// the prompt plus whatever output was relayed before the cut.
    Failure,
}

impl CallOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
        }
    }
}

/// The finalized record of one relayed call. Produced exactly once per
/// call, after the response (or its last relayed frame) is settled.
#[derive(Debug, Clone)]
pub struct CompletedCall {
    pub caller_id: String,
    pub model: String,
    pub provider: String,
    pub outcome: CallOutcome,
    pub usage: Usage,
    pub duration_ms: u64,
    /// Human-readable failure cause, absent on success.
    pub error: Option<String>,
    /// The assembled response, absent when nothing usable arrived.
    pub response: Option<ChatResponse>,
}

/// Boundary to the accounting side. The gateway emits records; whatever
/// persists them and advances usage counters lives behind this trait.
#[async_trait::async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, call: CompletedCall);
}

/// Discards every record. Useful when metering is switched off.
pub struct NoopRecorder;

#[async_trait::async_trait]
impl UsageRecorder for NoopRecorder {
    async fn record(&self, _call: CompletedCall) {}
}

/// Collects records in memory, for tests and local inspection.
#[derive(Default)]
pub struct MemoryRecorder {
    calls: std::sync::Mutex<Vec<CompletedCall>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CompletedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl UsageRecorder for MemoryRecorder {
    async fn record(&self, call: CompletedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}
