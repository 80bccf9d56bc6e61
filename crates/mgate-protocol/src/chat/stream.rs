use serde::{Deserialize, Serialize};

use super::types::Usage;

/// One incremental unit of a streaming completion.
///
/// `usage` is absent on most chunks. Providers that report usage may put
/// it on any chunk, including a trailing sentinel with empty `choices`;
/// wherever it appears it is authoritative for metering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default = "chunk_object")]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: StreamDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

fn chunk_object() -> String {
    "chat.completion.chunk".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_chunk_parses() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"id":"c1","created":1,"model":"gpt-4o","choices":[{"index":0,"delta":{"content":"he"}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.object, "chat.completion.chunk");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("he"));
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn usage_only_sentinel_chunk_parses() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"id":"","choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
        )
        .unwrap();
        assert!(chunk.choices.is_empty());
        assert_eq!(chunk.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn empty_delta_fields_are_not_serialized() {
        let chunk = StreamChunk {
            id: "c1".to_string(),
            object: chunk_object(),
            created: 1,
            model: "m".to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta {
                    role: None,
                    content: Some("hi".to_string()),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(!json.contains("finish_reason"));
        assert!(!json.contains("role"));
        assert!(!json.contains("usage"));
    }
}
