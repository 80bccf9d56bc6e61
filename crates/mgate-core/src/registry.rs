use std::collections::HashMap;

use mgate_protocol::models::ModelInfo;

use crate::error::{RelayError, RelayResult};

/// Model value that asks the gateway to pick the first available model.
/// An empty model string means the same thing.
pub const AUTO_MATCH: &str = "auto-match";

/// How the gateway talks to a provider.
///
/// `Uniform` providers accept the shared OpenAI-SDK request shape;
/// `Native` providers get the caller's JSON envelope forwarded raw to
/// their `/chat/completions` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Uniform,
    Native,
}

/// Closed set of upstream provider families the gateway can route to.
///
/// `ALL` doubles as the classification order: it is scanned top to
/// bottom and the first matching family wins, so specific patterns
/// (the `qwen/` catalog prefix) must stay ahead of the broad
/// contains-a-slash fallback that routes to openrouter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    OpenAi,
    Claude,
    Qwen,
    Doubao,
    BigModel,
    DeepSeek,
    Grok,
    Gemini,
    SiliconFlow,
    OpenRouter,
    OpenAiLike,
}

impl ProviderFamily {
    pub const ALL: [ProviderFamily; 11] = [
        ProviderFamily::OpenAi,
        ProviderFamily::Claude,
        ProviderFamily::Qwen,
        ProviderFamily::Doubao,
        ProviderFamily::BigModel,
        ProviderFamily::DeepSeek,
        ProviderFamily::Grok,
        ProviderFamily::Gemini,
        ProviderFamily::SiliconFlow,
        ProviderFamily::OpenRouter,
        ProviderFamily::OpenAiLike,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Claude => "claude",
            ProviderFamily::Qwen => "qwen",
            ProviderFamily::Doubao => "doubao",
            ProviderFamily::BigModel => "bigmodel",
            ProviderFamily::DeepSeek => "deepseek",
            ProviderFamily::Grok => "grok",
            ProviderFamily::Gemini => "gemini",
            ProviderFamily::SiliconFlow => "siliconflow",
            ProviderFamily::OpenRouter => "openrouter",
            ProviderFamily::OpenAiLike => "openai-like",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|family| family.name() == name)
    }

    /// Claude and Gemini diverge from the uniform request envelope and
    /// are called in raw pass-through mode.
    pub fn mode(self) -> CallMode {
        match self {
            ProviderFamily::Claude | ProviderFamily::Gemini => CallMode::Native,
            _ => CallMode::Uniform,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "https://api.openai.com/v1",
            ProviderFamily::Claude => "https://api.anthropic.com/v1",
            ProviderFamily::Qwen => "https://dashscope.aliyuncs.com/api/v1",
            ProviderFamily::Doubao => "https://ark.cn-beijing.volces.com/api/v3",
            ProviderFamily::BigModel => "https://open.bigmodel.cn/api/paas/v4",
            ProviderFamily::DeepSeek => "https://api.deepseek.com/v1",
            ProviderFamily::Grok => "https://api.x.ai/v1",
            ProviderFamily::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderFamily::SiliconFlow => "https://api.siliconflow.cn/v1",
            ProviderFamily::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderFamily::OpenAiLike => "",
        }
    }

    fn matches(self, model: &str) -> bool {
        match self {
            ProviderFamily::OpenAi => model.starts_with("gpt-"),
            ProviderFamily::Claude => model.starts_with("claude-"),
            ProviderFamily::Qwen => model.starts_with("qwen-") || model.starts_with("qwen2"),
            ProviderFamily::Doubao => model.starts_with("doubao-"),
            ProviderFamily::BigModel => model.starts_with("glm-"),
            ProviderFamily::DeepSeek => model.starts_with("deepseek-"),
            ProviderFamily::Grok => model.starts_with("grok-"),
            ProviderFamily::Gemini => model.starts_with("gemini-"),
            ProviderFamily::SiliconFlow => {
                model.starts_with("qwen/") || model.starts_with("meta-llama/")
            }
            ProviderFamily::OpenRouter => model.contains('/'),
            ProviderFamily::OpenAiLike => model == "custom-model",
        }
    }

    /// First family whose pattern matches, in `ALL` order.
    pub fn classify(model: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|family| family.matches(model))
    }

    /// Provider-declared model catalog, `(model id, display name)` pairs.
    pub fn catalog(self) -> &'static [(&'static str, &'static str)] {
        match self {
            ProviderFamily::OpenAi => &[
                ("gpt-4", "GPT-4"),
                ("gpt-4-turbo", "GPT-4 Turbo"),
                ("gpt-3.5-turbo", "GPT-3.5 Turbo"),
                ("gpt-4o", "GPT-4o"),
                ("gpt-4o-mini", "GPT-4o Mini"),
            ],
            ProviderFamily::Claude => &[
                ("claude-3-5-sonnet-20241022", "Claude 3.5 Sonnet"),
                ("claude-3-5-haiku-20241022", "Claude 3.5 Haiku"),
                ("claude-3-opus-20240229", "Claude 3 Opus"),
            ],
            ProviderFamily::Qwen => &[
                ("qwen-turbo", "Qwen Turbo"),
                ("qwen-plus", "Qwen Plus"),
                ("qwen-max", "Qwen Max"),
                ("qwen2.5-72b-instruct", "Qwen 2.5 72B"),
            ],
            ProviderFamily::Doubao => &[("doubao-seed-1-6-250615", "Doubao Seed 1.6")],
            ProviderFamily::BigModel => &[
                ("glm-4", "GLM-4"),
                ("glm-4-plus", "GLM-4 Plus"),
                ("glm-4-air", "GLM-4 Air"),
                ("glm-4-flash", "GLM-4 Flash"),
            ],
            ProviderFamily::DeepSeek => &[
                ("deepseek-chat", "DeepSeek Chat"),
                ("deepseek-coder", "DeepSeek Coder"),
                ("deepseek-reasoner", "DeepSeek Reasoner"),
            ],
            ProviderFamily::Grok => &[
                ("grok-beta", "Grok Beta"),
                ("grok-vision-beta", "Grok Vision Beta"),
            ],
            ProviderFamily::Gemini => &[
                ("gemini-1.5-pro", "Gemini 1.5 Pro"),
                ("gemini-1.5-flash", "Gemini 1.5 Flash"),
                ("gemini-pro", "Gemini Pro"),
            ],
            ProviderFamily::SiliconFlow => &[
                ("qwen/qwen2.5-72b-instruct", "Qwen2.5 72B"),
                ("meta-llama/llama-3.1-405b-instruct", "Llama 3.1 405B"),
            ],
            ProviderFamily::OpenRouter => &[
                ("openai/gpt-4o", "GPT-4o (OpenRouter)"),
                ("anthropic/claude-3.5-sonnet", "Claude 3.5 Sonnet (OpenRouter)"),
                ("google/gemini-pro-1.5", "Gemini Pro 1.5 (OpenRouter)"),
            ],
            ProviderFamily::OpenAiLike => &[("custom-model", "Custom Model")],
        }
    }
}

/// One configured upstream. Built at startup, immutable afterwards.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub family: ProviderFamily,
    pub base_url: String,
    pub api_key: String,
}

impl ProviderConfig {
    pub fn new(family: ProviderFamily, api_key: impl Into<String>) -> Self {
        Self {
            family,
            base_url: family.default_base_url().to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.family.name()
    }

    pub fn mode(&self) -> CallMode {
        self.family.mode()
    }
}

/// Resolution outcome: the provider to call and the effective model id
/// (the requested one, or the auto-selected catalog head).
#[derive(Debug, Clone)]
pub struct Resolved {
    pub provider: ProviderConfig,
    pub model: String,
}

/// Read-only lookup from model id to configured provider.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderFamily, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(configs: impl IntoIterator<Item = ProviderConfig>) -> Self {
        let providers = configs
            .into_iter()
            .map(|config| (config.family, config))
            .collect();
        Self { providers }
    }

    pub fn get(&self, family: ProviderFamily) -> Option<&ProviderConfig> {
        self.providers.get(&family)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Static catalog filtered to configured providers, in family order.
    pub fn models(&self) -> Vec<ModelInfo> {
        let mut models = Vec::new();
        for family in ProviderFamily::ALL {
            if !self.providers.contains_key(&family) {
                continue;
            }
            for (id, name) in family.catalog() {
                models.push(ModelInfo::new(*id, *name, family.name()));
            }
        }
        models
    }

    /// Resolves a requested model to a provider and effective model id.
    ///
    /// Resolution is total: every input either maps to exactly one
    /// configured provider or fails with `UnsupportedModel` (no family
    /// pattern matches, or nothing is configured for auto-select) or
    /// `ProviderNotConfigured` (the matched family has no credential).
    /// There is no silent fallback to a different provider.
    pub fn resolve(&self, model: &str) -> RelayResult<Resolved> {
        if model.is_empty() || model == AUTO_MATCH {
            let first = self.models().into_iter().next().ok_or_else(|| {
                RelayError::UnsupportedModel(model.to_string())
            })?;
            let family = ProviderFamily::from_name(&first.provider)
                .ok_or_else(|| RelayError::UnsupportedModel(model.to_string()))?;
            let provider = self
                .get(family)
                .ok_or_else(|| RelayError::ProviderNotConfigured(family.name().to_string()))?;
            return Ok(Resolved {
                provider: provider.clone(),
                model: first.id,
            });
        }

        let family = ProviderFamily::classify(model)
            .ok_or_else(|| RelayError::UnsupportedModel(model.to_string()))?;
        let provider = self
            .get(family)
            .ok_or_else(|| RelayError::ProviderNotConfigured(family.name().to_string()))?;
        Ok(Resolved {
            provider: provider.clone(),
            model: model.to_string(),
        })
    }
}
