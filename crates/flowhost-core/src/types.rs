use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique chat session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A chat message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all tool use blocks from this message.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
                _ => None,
            })
            .collect()
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// Start of a tool use block.
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },

    /// A chunk of tool use input JSON.
    ToolInputDelta { index: usize, delta: String },

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// Capability description offered to the model in the single-shot tool loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Payload handed to every capability invocation.
///
/// Carries the same state view a node template sees: the run's original
/// input and every step produced so far, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInput {
    pub input: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

impl CapabilityInput {
    pub fn new(input: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            input: input.into(),
            steps,
        }
    }

    /// Input for a direct call with no flow state (single-shot tool loop).
    pub fn query(query: impl Into<String>) -> Self {
        Self::new(query, vec![])
    }

    /// The most recent step, falling back to the original input.
    pub fn latest(&self) -> &str {
        self.steps.last().map(String::as_str).unwrap_or(&self.input)
    }
}

/// Result of a capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityOutput {
    Text(String),
    Structured(serde_json::Value),
}

impl CapabilityOutput {
    /// Text recorded as a flow step. Structured results are stored as
    /// compact JSON so later templates can reference them verbatim.
    pub fn into_step(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(serde_json::Value::String(text)) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl From<String> for CapabilityOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for CapabilityOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Flow lifecycle event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// An agent run started (flow or single-shot).
    RunStarted { agent_id: String, depth: usize },
    /// A flow node is about to execute.
    NodeStarted { agent_id: String, node: String, index: usize },
    /// A flow node appended a step.
    NodeCompleted {
        agent_id: String,
        node: String,
        step_index: usize,
        elapsed_ms: u64,
    },
    /// A condition node selected a branch.
    ConditionEvaluated {
        agent_id: String,
        node: String,
        verdict: bool,
        target: String,
    },
    /// A coordinator handed work to another agent.
    Delegated { from: String, to: String, depth: usize },
    /// An agent run produced its final output.
    RunCompleted {
        agent_id: String,
        steps: usize,
        elapsed_ms: u64,
    },
    /// An agent run failed.
    RunFailed {
        agent_id: String,
        node: Option<String>,
        kind: String,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_input_latest_prefers_last_step() {
        let input = CapabilityInput::new("Weather in Lisbon", vec!["Lisbon".into()]);
        assert_eq!(input.latest(), "Lisbon");

        let empty = CapabilityInput::query("Weather in Lisbon");
        assert_eq!(empty.latest(), "Weather in Lisbon");
    }

    #[test]
    fn test_structured_output_becomes_json_step() {
        let out = CapabilityOutput::Structured(serde_json::json!({"temp_c": 21}));
        assert_eq!(out.into_step(), r#"{"temp_c":21}"#);

        let out = CapabilityOutput::Structured(serde_json::json!("plain"));
        assert_eq!(out.into_step(), "plain");
    }

    #[test]
    fn test_chat_message_text_skips_tool_blocks() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Text { text: "Checking ".into() },
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "calculator".into(),
                    input: serde_json::json!({"query": "2+2"}),
                },
                ContentBlock::Text { text: "now".into() },
            ],
            timestamp: None,
        };
        assert_eq!(msg.text(), "Checking now");
        assert_eq!(msg.tool_uses().len(), 1);
    }
}
