use serde::{Deserialize, Serialize};

use super::types::{ChatMessage, Usage};

/// Blocking-mode completion response.
///
/// All fields default on deserialization: native upstreams are allowed to
/// omit `id`/`created`, which the dispatcher then synthesizes so callers
/// never see empty identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default = "completion_object")]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: String,
}

pub(crate) fn completion_object() -> String {
    "chat.completion".to_string()
}
