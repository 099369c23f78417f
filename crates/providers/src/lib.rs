//! LLM provider adapters.
//!
//! One adapter per backend wire protocol, all behind the core `Provider`
//! trait. `build_provider` constructs the configured adapter wrapped in
//! the retry layer.

mod anthropic;
mod ollama;
mod openai;
mod retry;
mod sse;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatProvider;
pub use retry::RetryProvider;

use std::sync::Arc;

use relayclaw_config::LlmConfig;
use relayclaw_core::provider::Provider;

/// Build the configured provider, wrapped in the retry layer.
///
/// Unknown provider names fall back to the OpenAI-compatible adapter,
/// since most hosted endpoints speak that protocol.
pub fn build_provider(config: &LlmConfig) -> Arc<dyn Provider> {
    let inner: Arc<dyn Provider> = match config.provider.as_str() {
        "anthropic" => Arc::new(AnthropicProvider::new(
            &config.api_key,
            &config.model,
            config.timeout_s,
        )),
        "ollama" => Arc::new(OllamaProvider::new(
            &config.base_url,
            &config.model,
            config.timeout_s,
        )),
        _ => Arc::new(OpenAiCompatProvider::new(
            &config.api_key,
            &config.base_url,
            &config.model,
            config.timeout_s,
        )),
    };

    Arc::new(RetryProvider::new(inner, config.max_retries))
}
