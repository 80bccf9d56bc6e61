use mgate_core::recorder::{CompletedCall, UsageRecorder};
use tracing::info;

/// Writes each finalized call to the structured log. A deployment that
/// bills for usage would persist these instead.
pub(crate) struct LogRecorder;

#[async_trait::async_trait]
impl UsageRecorder for LogRecorder {
    async fn record(&self, call: CompletedCall) {
        info!(
            caller = %call.caller_id,
            model = %call.model,
            provider = %call.provider,
            outcome = call.outcome.as_str(),
            prompt_tokens = call.usage.prompt_tokens,
            completion_tokens = call.usage.completion_tokens,
            total_tokens = call.usage.total_tokens,
            duration_ms = call.duration_ms,
            error = call.error.as_deref().unwrap_or(""),
            "call completed"
        );
    }
}
