use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flowhost_core::config::ModelConfig;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::LlmClient;
use flowhost_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API streaming client.
pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    pub fn with_http(http: Client) -> Self {
        Self { http }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Serialize, Debug)]
struct ApiMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseData {
    MessageStart {
        message: MessageInfo,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlockInfo,
    },
    ContentBlockDelta {
        index: usize,
        delta: DeltaInfo,
    },
    ContentBlockStop {},
    MessageDelta {
        delta: MessageDeltaInfo,
        #[serde(default)]
        usage: Option<UsageInfo>,
    },
    MessageStop {},
    Ping {},
    Error {
        error: ApiError,
    },
}

#[derive(Deserialize, Debug)]
struct MessageInfo {
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockInfo {
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaInfo {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// System messages are lifted into the top-level `system` field.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Option<String> = None;
    let mut api_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                let text = msg.text();
                system = Some(match system {
                    Some(existing) => format!("{existing}\n\n{text}"),
                    None => text,
                });
            }
            Role::User => api_msgs.push(ApiMessage {
                role: "user",
                content: convert_content_blocks(&msg.content),
            }),
            Role::Assistant => api_msgs.push(ApiMessage {
                role: "assistant",
                content: convert_content_blocks(&msg.content),
            }),
        }
    }

    (system, api_msgs)
}

fn convert_content_blocks(blocks: &[ContentBlock]) -> serde_json::Value {
    if let [ContentBlock::Text { text }] = blocks {
        return serde_json::Value::String(text.clone());
    }

    blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => serde_json::json!({ "type": "text", "text": text }),
            ContentBlock::ToolUse { id, name, input } => serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            }),
        })
        .collect()
}

fn parse_sse_to_delta(event: SseEvent) -> Option<Result<StreamDelta>> {
    let data: SseData = match serde_json::from_str(&event.data) {
        Ok(data) => data,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse Anthropic SSE data");
            return None;
        }
    };

    match data {
        SseData::MessageStart { message } => message.usage.map(|usage| {
            Ok(StreamDelta::Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            })
        }),
        SseData::ContentBlockStart {
            index,
            content_block: ContentBlockInfo::ToolUse { id, name },
        } => Some(Ok(StreamDelta::ToolUseStart { index, id, name })),
        SseData::ContentBlockStart { .. } => None,
        SseData::ContentBlockDelta { index, delta } => match delta {
            DeltaInfo::TextDelta { text } => Some(Ok(StreamDelta::TextDelta(text))),
            DeltaInfo::InputJsonDelta { partial_json } => Some(Ok(StreamDelta::ToolInputDelta {
                index,
                delta: partial_json,
            })),
            DeltaInfo::Other => None,
        },
        SseData::MessageDelta { delta, usage } => {
            if let Some(usage) = usage {
                debug!(output_tokens = usage.output_tokens, "Anthropic usage");
            }
            let stop = match delta.stop_reason.as_deref()? {
                "tool_use" => StopReason::ToolUse,
                "max_tokens" => StopReason::MaxTokens,
                "stop_sequence" => StopReason::StopSequence,
                _ => StopReason::EndTurn,
            };
            Some(Ok(StreamDelta::Stop(stop)))
        }
        SseData::Error { error } => Some(Err(FlowhostError::LlmStream(error.message))),
        SseData::ContentBlockStop {} | SseData::MessageStop {} | SseData::Ping {} => None,
    }
}

impl LlmClient for AnthropicClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools: Vec<ApiTool> = tools
            .iter()
            .map(|t| ApiTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| FlowhostError::Config("Anthropic API key not set".into()))?;

            let url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
            let (system, messages) = convert_messages(messages);

            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                messages,
                system,
                stream: true,
                tools,
            };

            let response = self
                .http
                .post(url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| FlowhostError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(FlowhostError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let delta_stream = SseStream::new(response.bytes_stream())
                .filter_map(|event| async move { parse_sse_to_delta(event) });

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_system_lifted_out_of_messages() {
        let (system, msgs) = convert_messages(vec![
            ChatMessage::system("You are a travel assistant."),
            ChatMessage::user("Lisbon?"),
        ]);
        assert_eq!(system.as_deref(), Some("You are a travel assistant."));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, serde_json::json!("Lisbon?"));
    }

    #[test]
    fn test_parse_text_and_tool_deltas() {
        let d = parse_sse_to_delta(event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"true"}}"#,
        ));
        assert!(matches!(d, Some(Ok(StreamDelta::TextDelta(t))) if t == "true"));

        let d = parse_sse_to_delta(event(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"search","input":{}}}"#,
        ));
        assert!(matches!(d, Some(Ok(StreamDelta::ToolUseStart { index: 1, .. }))));

        let d = parse_sse_to_delta(event(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        ));
        assert!(d.is_none());
    }

    #[test]
    fn test_parse_stop_and_error() {
        let d = parse_sse_to_delta(event(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
        ));
        assert!(matches!(d, Some(Ok(StreamDelta::Stop(StopReason::ToolUse)))));

        let d = parse_sse_to_delta(event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        assert!(matches!(d, Some(Err(FlowhostError::LlmStream(m))) if m == "Overloaded"));
    }
}
