use mgate_core::registry::{ProviderConfig, ProviderFamily};
use tracing::info;

/// Builds the provider set from `<FAMILY>_API_KEY` / `<FAMILY>_BASE_URL`
/// environment variables. A family without a key is left unconfigured.
pub(crate) fn providers_from_env() -> Vec<ProviderConfig> {
    let mut providers = Vec::new();
    for family in ProviderFamily::ALL {
        let prefix = env_prefix(family);
        let Some(api_key) = read_env(&format!("{prefix}_API_KEY")) else {
            continue;
        };
        let mut config = ProviderConfig::new(family, api_key);
        if let Some(base_url) = read_env(&format!("{prefix}_BASE_URL")) {
            config.base_url = base_url;
        }
        if config.base_url.is_empty() {
            info!(provider = family.name(), "skipping: no base url");
            continue;
        }
        info!(provider = family.name(), base_url = %config.base_url, "provider configured");
        providers.push(config);
    }
    providers
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_prefix(family: ProviderFamily) -> &'static str {
    match family {
        ProviderFamily::OpenAi => "OPENAI",
        ProviderFamily::Claude => "CLAUDE",
        ProviderFamily::Qwen => "QWEN",
        ProviderFamily::Doubao => "DOUBAO",
        ProviderFamily::BigModel => "BIGMODEL",
        ProviderFamily::DeepSeek => "DEEPSEEK",
        ProviderFamily::Grok => "GROK",
        ProviderFamily::Gemini => "GEMINI",
        ProviderFamily::SiliconFlow => "SILICONFLOW",
        ProviderFamily::OpenRouter => "OPENROUTER",
        ProviderFamily::OpenAiLike => "OPENAI_LIKE",
    }
}
