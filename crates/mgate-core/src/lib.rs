//! Core relay engine: provider routing, quota gating, token estimation,
//! upstream dispatch, and the streaming bridge that accumulates usage.

pub mod bridge;
pub mod caller;
pub mod dispatch;
pub mod error;
pub mod quota;
pub mod recorder;
pub mod registry;
pub mod tokens;
pub mod upstream;

pub use bridge::{STREAM_DEADLINE, StreamBridge};
pub use caller::{AuthDenied, Caller, CallerDirectory, CallerEntry, MemoryDirectory, OpenDirectory};
pub use dispatch::{COMPLETE_TIMEOUT, Dispatcher};
pub use error::{RelayError, RelayResult};
pub use quota::{LimitMethod, LimitPolicy, QuotaDimension, UsageSnapshot, check_usage};
pub use recorder::{CallOutcome, CompletedCall, MemoryRecorder, NoopRecorder, UsageRecorder};
pub use registry::{
    AUTO_MATCH, CallMode, ProviderConfig, ProviderFamily, ProviderRegistry, Resolved,
};
pub use tokens::TokenEstimator;
pub use upstream::{
    StreamItem, UpstreamBody, UpstreamClient, UpstreamClientConfig, UpstreamFailure,
    UpstreamRequest, UpstreamResponse, WreqUpstreamClient,
};
