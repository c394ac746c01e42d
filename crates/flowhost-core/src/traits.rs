use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::delegation::DelegationContext;
use crate::error::Result;
use crate::types::*;

/// Streaming chat-completions client for one provider family.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// A named action an agent can invoke from a flow node or
/// from the single-shot tool loop.
pub trait Capability: Send + Sync + 'static {
    /// Name used in `tool_name` references and model tool calls.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema offered to the model. Every capability accepts a single
    /// `query` string when called outside a flow.
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Input for this capability" }
            },
            "required": ["query"]
        })
    }

    /// Invoke with the flow's `{input, steps}` view.
    ///
    /// `ctx` is the delegation context of the calling run; only agent
    /// delegates read it.
    fn invoke<'a>(
        &'a self,
        input: CapabilityInput,
        ctx: &'a DelegationContext,
    ) -> BoxFuture<'a, Result<CapabilityOutput>>;

    /// Timeout in seconds for one invocation.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Retrieval backend behind the `knowledge_base` capability.
pub trait KnowledgeSource: Send + Sync + 'static {
    /// Backend label used in logs (`vectordb`, `graph`).
    fn kind(&self) -> &str;

    /// Return passages relevant to `query`, best first.
    fn retrieve<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;
}
