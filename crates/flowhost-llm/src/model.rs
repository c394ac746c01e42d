use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use flowhost_core::config::ModelConfig;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::LlmClient;
use flowhost_core::types::*;

/// How far past the calls seen so far a tool block index may point.
/// Anthropic leaves one gap per preceding text block.
const MAX_TOOL_INDEX_GAP: usize = 64;

/// A tool call assembled from streamed deltas.
#[derive(Debug, Clone, Default)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input_json: String,
}

impl ToolCall {
    /// Parsed arguments; malformed JSON becomes `Null`.
    pub fn input(&self) -> serde_json::Value {
        if self.input_json.trim().is_empty() {
            return serde_json::Value::Object(Default::default());
        }
        serde_json::from_str(&self.input_json).unwrap_or(serde_json::Value::Null)
    }
}

/// One fully drained model response.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ModelTurn {
    /// Assistant message recording this turn, tool calls included.
    pub fn to_message(&self) -> ChatMessage {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text {
                text: self.text.clone(),
            });
        }
        for tc in &self.tool_calls {
            content.push(ContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.name.clone(),
                input: tc.input(),
            });
        }
        ChatMessage {
            role: Role::Assistant,
            content,
            timestamp: Some(chrono::Utc::now()),
        }
    }
}

/// A client bound to one model configuration. Shared read-only across runs.
#[derive(Clone)]
pub struct ModelHandle {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl ModelHandle {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }

    /// Single prompt completion: persona as system text, prompt as user text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !system.trim().is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(user));
        let turn = self.chat(messages, &[]).await?;
        Ok(turn.text)
    }

    /// Send a conversation and drain the response stream.
    pub async fn chat(&self, messages: Vec<ChatMessage>, tools: &[ToolDefinition]) -> Result<ModelTurn> {
        let mut stream = self.client.chat_stream(&self.config, messages, tools).await?;
        let mut turn = ModelTurn::default();

        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(text) => turn.text.push_str(&text),
                StreamDelta::ToolUseStart { index, id, name } => {
                    if index > turn.tool_calls.len() + MAX_TOOL_INDEX_GAP {
                        return Err(FlowhostError::LlmStream(format!(
                            "tool block index {index} is out of range"
                        )));
                    }
                    while turn.tool_calls.len() <= index {
                        turn.tool_calls.push(ToolCall::default());
                    }
                    turn.tool_calls[index].id = id;
                    turn.tool_calls[index].name = name;
                }
                StreamDelta::ToolInputDelta { index, delta } => match turn.tool_calls.get_mut(index) {
                    Some(tc) => tc.input_json.push_str(&delta),
                    None => warn!(index, "Tool input delta before tool start"),
                },
                StreamDelta::Stop(reason) => turn.stop_reason = Some(reason),
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    turn.input_tokens += input_tokens;
                    turn.output_tokens += output_tokens;
                }
            }
        }

        // Anthropic indexes tool blocks after text blocks, leaving gaps.
        turn.tool_calls.retain(|tc| !tc.name.is_empty());

        debug!(
            model = %self.config.model_id,
            chars = turn.text.len(),
            tool_calls = turn.tool_calls.len(),
            "Model turn complete"
        );
        Ok(turn)
    }
}
