use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model};

use mgate_protocol::chat::types::ChatMessage;

/// Advisory token estimator with a per-model encoder cache.
///
/// Counts are deterministic and monotonic in the input text, but not
/// guaranteed bit-identical to any provider's own accounting; they exist
/// so metering stays consistent when an upstream omits usage.
pub struct TokenEstimator {
    encoders: RwLock<HashMap<String, Arc<CoreBPE>>>,
    fallback: Arc<CoreBPE>,
}

impl TokenEstimator {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            encoders: RwLock::new(HashMap::new()),
            fallback: Arc::new(cl100k_base()?),
        })
    }

    /// Read-lock fast path, write-lock insert with a double check so two
    /// tasks racing on a first-seen model build the encoder once. A model
    /// tiktoken does not know gets the fallback cached under its id, so
    /// the lookup failure is paid once rather than per request.
    fn encoder(&self, model: &str) -> Arc<CoreBPE> {
        if let Ok(cache) = self.encoders.read()
            && let Some(encoder) = cache.get(model)
        {
            return encoder.clone();
        }

        let Ok(mut cache) = self.encoders.write() else {
            return self.fallback.clone();
        };
        if let Some(encoder) = cache.get(model) {
            return encoder.clone();
        }
        let encoder = match get_bpe_from_model(model) {
            Ok(bpe) => Arc::new(bpe),
            Err(_) => self.fallback.clone(),
        };
        cache.insert(model.to_string(), encoder.clone());
        encoder
    }

    pub fn count_text(&self, text: &str, model: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        self.encoder(model).encode_ordinary(text).len() as u32
    }

    /// Prompt-side estimate over a message sequence.
    ///
    /// Every message follows `<|start|>{role/name}\n{content}<|end|>\n`,
    /// costing 3 framing tokens (4 on gpt-3.5-turbo-0301, which also
    /// framed names), and every reply is primed with
    /// `<|start|>assistant<|message|>` for another 3.
    pub fn count_messages(&self, messages: &[ChatMessage], model: &str) -> u32 {
        let encoder = self.encoder(model);
        let per_message: u32 = if model == "gpt-3.5-turbo-0301" { 4 } else { 3 };

        let mut total = 0;
        for message in messages {
            total += per_message;
            total += encoded_len(&encoder, &message.role);
            total += encoded_len(&encoder, &message.content);
        }
        total + 3
    }
}

fn encoded_len(encoder: &CoreBPE, text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    encoder.encode_ordinary(text).len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn text_counting_is_deterministic() {
        let estimator = TokenEstimator::new().unwrap();
        let a = estimator.count_text("the quick brown fox", "gpt-4o");
        let b = estimator.count_text("the quick brown fox", "gpt-4o");
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn longer_text_never_counts_fewer_tokens() {
        let estimator = TokenEstimator::new().unwrap();
        let base = "hello world";
        let short = estimator.count_text(base, "gpt-4o");
        let long = estimator.count_text(&format!("{base}, and then some more"), "gpt-4o");
        assert!(long >= short);
    }

    #[test]
    fn empty_text_is_zero() {
        let estimator = TokenEstimator::new().unwrap();
        assert_eq!(estimator.count_text("", "gpt-4o"), 0);
    }

    #[test]
    fn unknown_model_uses_cached_fallback() {
        let estimator = TokenEstimator::new().unwrap();
        let first = estimator.count_text("hello", "no-such-model-v9");
        let second = estimator.count_text("hello", "no-such-model-v9");
        assert_eq!(first, second);
        assert!(first > 0);
        let cache = estimator.encoders.read().unwrap();
        assert!(cache.contains_key("no-such-model-v9"));
    }

    #[test]
    fn message_estimate_includes_framing_and_priming() {
        let estimator = TokenEstimator::new().unwrap();
        let messages = [message("user", "hi")];
        let count = estimator.count_messages(&messages, "gpt-4o");
        let parts = estimator.count_text("user", "gpt-4o") + estimator.count_text("hi", "gpt-4o");
        // 3 per-message framing tokens + 3 reply priming tokens.
        assert_eq!(count, parts + 6);
    }

    #[test]
    fn legacy_turbo_0301_pays_one_extra_token_per_message() {
        let estimator = TokenEstimator::new().unwrap();
        let messages = [message("user", "hi"), message("assistant", "hello")];
        let legacy = estimator.count_messages(&messages, "gpt-3.5-turbo-0301");
        let current = estimator.count_messages(&messages, "gpt-3.5-turbo");
        assert_eq!(legacy, current + messages.len() as u32);
    }
}
