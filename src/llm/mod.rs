//! LLM integration.
//!
//! A single OpenAI-compatible backend (`/chat/completions`) covers OpenAI
//! itself and any gateway exposing the same API via `LLM_BASE_URL`.

pub mod json;
pub mod openai;
pub mod provider;

pub use json::{extract_json_object, parse_json_reply};
pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;

use secrecy::SecretString;

use crate::config::env_required;
use crate::error::{ConfigError, LlmError};

const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: SecretString::from(env_required("LLM_API_KEY")?),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| openai::DEFAULT_BASE_URL.to_string()),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    if config.model.trim().is_empty() {
        return Err(LlmError::RequestFailed {
            provider: "openai".to_string(),
            reason: "model name is empty".to_string(),
        });
    }
    tracing::info!(model = %config.model, base_url = %config.base_url, "Using OpenAI-compatible LLM");
    Ok(Arc::new(OpenAiProvider::new(
        config.api_key.clone(),
        &config.model,
        &config.base_url,
    )))
}
