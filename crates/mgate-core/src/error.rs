use crate::quota::QuotaDimension;

pub type RelayResult<T> = Result<T, RelayError>;

/// Everything a relay call can fail with, from pre-flight rejection to
/// upstream trouble.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
    #[error("provider {0} not configured")]
    ProviderNotConfigured(String),
    #[error("{dimension} limit reached ({used}/{limit})")]
    QuotaExceeded {
        dimension: QuotaDimension,
        used: u64,
        limit: u64,
    },
    #[error("upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("request cancelled: {0}")]
    Cancelled(String),
    #[error("translation error: {0}")]
    Translation(String),
}

impl RelayError {
    /// Pre-flight errors are raised before any upstream work happens and
    /// are never reported to the usage recorder.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            RelayError::UnsupportedModel(_)
                | RelayError::ProviderNotConfigured(_)
                | RelayError::QuotaExceeded { .. }
        )
    }

    /// Stable machine-readable kind, used as the `type` field of wire
    /// error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::UnsupportedModel(_) => "unsupported_model",
            RelayError::ProviderNotConfigured(_) => "provider_not_configured",
            RelayError::QuotaExceeded { .. } => "quota_exceeded",
            RelayError::Upstream { .. } => "upstream_error",
            RelayError::Cancelled(_) => "cancelled",
            RelayError::Translation(_) => "translation_error",
        }
    }
}
