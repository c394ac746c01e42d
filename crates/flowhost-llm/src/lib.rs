pub mod model;
pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use flowhost_core::config::{AppConfig, ModelConfig};
use flowhost_core::traits::LlmClient;

pub use model::{ModelHandle, ModelTurn, ToolCall};
pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Arc<dyn LlmClient> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Arc::new(AnthropicClient::new()),
        // Everything else speaks the OpenAI chat completions protocol
        _ => Arc::new(OpenAiClient::new()),
    }
}

/// Provider client wrapped with retries and the configured fallback models.
pub fn create_retrying_client(config: &AppConfig, model: &ModelConfig) -> Arc<dyn LlmClient> {
    let retry = model.retry.clone().unwrap_or_default();
    let mut client = RetryingClient::new(create_client(model), retry);
    for fallback in &config.fallback_models {
        client = client.with_fallback(fallback.clone(), create_client(fallback));
    }
    Arc::new(client)
}

/// Model handle for an agent definition's `model` string.
pub fn model_for(config: &AppConfig, model: &str) -> ModelHandle {
    let model_config = config.model_for(model);
    ModelHandle::new(create_retrying_client(config, &model_config), model_config)
}
