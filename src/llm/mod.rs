//! LLM provider abstraction layer
//!
//! Provider-agnostic interface used by the reply composer, with OpenAI and
//! Anthropic backends selected from the `[llm]` configuration section.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;

use crate::config::LlmSection;
use std::sync::Arc;

/// Build the configured provider from the `[llm]` section and a resolved API key
pub fn build_provider(
    section: &LlmSection,
    api_key: String,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match section.provider.as_str() {
        "openai" => {
            let mut config = OpenAiConfig {
                api_key,
                ..Default::default()
            };
            if let Some(base_url) = &section.base_url {
                config.base_url = base_url.trim_end_matches('/').to_string();
            }
            Ok(Arc::new(OpenAiProvider::new(config)?))
        }
        "anthropic" => {
            let mut config = AnthropicConfig {
                api_key,
                ..Default::default()
            };
            if let Some(base_url) = &section.base_url {
                config.base_url = base_url.trim_end_matches('/').to_string();
            }
            Ok(Arc::new(AnthropicProvider::new(config)?))
        }
        other => Err(LlmError::NotConfigured(format!(
            "Unsupported LLM provider: {other}"
        ))),
    }
}
