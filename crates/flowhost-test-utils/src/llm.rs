use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};

use flowhost_core::config::ModelConfig;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::LlmClient;
use flowhost_core::types::*;

/// What the scripted model saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub system: Option<String>,
    /// Text of the last message: plain text, or tool result contents.
    pub user: String,
    pub message_count: usize,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    ToolCall { name: String, arguments: String },
    Fail(String),
}

/// `LlmClient` that answers from a script.
///
/// Rules are checked in insertion order against the text of the last
/// message in the request; the first rule whose needle is a substring
/// wins. Unmatched requests get the default reply.
pub struct ScriptedLlm {
    rules: Vec<(String, Reply)>,
    default: Reply,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default: Reply::Text("ok".to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_when(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), Reply::Text(reply.to_string())));
        self
    }

    /// Answer with a single tool call carrying `arguments` (JSON text).
    pub fn tool_call_when(mut self, needle: &str, tool: &str, arguments: &str) -> Self {
        self.rules.push((
            needle.to_string(),
            Reply::ToolCall {
                name: tool.to_string(),
                arguments: arguments.to_string(),
            },
        ));
        self
    }

    /// Fail the request with an HTTP-style `LlmRequest` error.
    pub fn fail_when(mut self, needle: &str, message: &str) -> Self {
        self.rules.push((needle.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn with_default(mut self, reply: &str) -> Self {
        self.default = Reply::Text(reply.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn pick(&self, prompt: &str) -> Reply {
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

fn last_message_text(messages: &[ChatMessage]) -> String {
    let Some(last) = messages.last() else {
        return String::new();
    };
    last.content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
            ContentBlock::ToolUse { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let prompt = last_message_text(&messages);
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(ChatMessage::text);

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                model: config.model_id.clone(),
                system,
                user: prompt.clone(),
                message_count: messages.len(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });

        let reply = self.pick(&prompt);
        Box::pin(async move {
            let deltas: Vec<Result<StreamDelta>> = match reply {
                Reply::Text(text) => vec![
                    Ok(StreamDelta::TextDelta(text)),
                    Ok(StreamDelta::Stop(StopReason::EndTurn)),
                ],
                Reply::ToolCall { name, arguments } => vec![
                    Ok(StreamDelta::ToolUseStart {
                        index: 0,
                        id: format!("call_{name}"),
                        name,
                    }),
                    Ok(StreamDelta::ToolInputDelta {
                        index: 0,
                        delta: arguments,
                    }),
                    Ok(StreamDelta::Stop(StopReason::ToolUse)),
                ],
                Reply::Fail(message) => return Err(FlowhostError::LlmRequest(message)),
            };
            Ok(futures::stream::iter(deltas).boxed())
        })
    }
}
