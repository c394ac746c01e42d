use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::types::{CapabilityInput, ChatMessage, ContentBlock, Role, StopReason};
use flowhost_llm::{ModelHandle, ToolCall};
use flowhost_tools::CapabilityTable;

use crate::flow::node::cancellable;

/// ReAct loop for agents without a flow.
///
/// The model sees the persona, prior session messages, and the query, and
/// may call any capability on the agent. Capability failures are reported
/// back to the model; delegation guard failures and cancellation end the run.
pub struct ToolLoop<'a> {
    pub model: &'a ModelHandle,
    pub capabilities: &'a CapabilityTable,
    pub delegation: &'a DelegationContext,
    pub cancel: &'a CancellationToken,
    pub max_turns: usize,
}

/// Map model-supplied arguments onto a capability call.
///
/// `{"query": "..."}` is the advertised shape; anything else is passed
/// through as compact JSON text.
pub(crate) fn input_from_arguments(args: &serde_json::Value) -> CapabilityInput {
    match args {
        serde_json::Value::Object(map) => match map.get("query").and_then(|q| q.as_str()) {
            Some(query) => CapabilityInput::query(query),
            None if map.is_empty() => CapabilityInput::query(""),
            None => CapabilityInput::query(args.to_string()),
        },
        serde_json::Value::String(s) => CapabilityInput::query(s.as_str()),
        serde_json::Value::Null => CapabilityInput::query(""),
        other => CapabilityInput::query(other.to_string()),
    }
}

fn is_fatal(err: &FlowhostError) -> bool {
    matches!(
        err,
        FlowhostError::Cancelled
            | FlowhostError::DelegationCycle { .. }
            | FlowhostError::DelegationDepthExceeded { .. }
    )
}

impl ToolLoop<'_> {
    pub async fn run(&self, persona: &str, history: &[ChatMessage], query: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !persona.trim().is_empty() {
            messages.push(ChatMessage::system(persona));
        }
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(query));

        let tool_defs = self.capabilities.definitions();

        for turn in 0..self.max_turns {
            if self.cancel.is_cancelled() {
                return Err(FlowhostError::Cancelled);
            }
            debug!(turn, messages = messages.len(), "Starting model turn");

            let response = cancellable(self.cancel, self.model.chat(messages.clone(), &tool_defs)).await?;
            messages.push(response.to_message());

            if response.tool_calls.is_empty() {
                if response.stop_reason == Some(StopReason::MaxTokens) {
                    warn!("Model hit max tokens");
                }
                info!(
                    turns = turn + 1,
                    input_tokens = response.input_tokens,
                    output_tokens = response.output_tokens,
                    "Single-shot run complete"
                );
                return Ok(response.text);
            }

            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                results.push(self.execute_call(call).await?);
            }
            messages.push(ChatMessage {
                role: Role::User,
                content: results,
                timestamp: Some(chrono::Utc::now()),
            });
        }

        Err(FlowhostError::MaxTurnsExceeded(self.max_turns))
    }

    async fn execute_call(&self, call: &ToolCall) -> Result<ContentBlock> {
        let input = input_from_arguments(&call.input());
        debug!(tool = %call.name, "Executing tool call");

        let result = cancellable(
            self.cancel,
            self.capabilities.invoke(&call.name, input, self.delegation),
        )
        .await;

        match result {
            Ok(output) => Ok(ContentBlock::ToolResult {
                tool_use_id: call.id.clone(),
                content: output.into_step(),
                is_error: false,
            }),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                warn!(tool = %call.name, kind = e.kind(), error = %e, "Tool call failed");
                Ok(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: format!("Error: {e}"),
                    is_error: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flowhost_core::config::ModelConfig;
    use flowhost_test_utils::{FailingCapability, ScriptedLlm, StaticCapability};

    use super::*;

    fn run_loop<'a>(
        model: &'a ModelHandle,
        table: &'a CapabilityTable,
        ctx: &'a DelegationContext,
        cancel: &'a CancellationToken,
    ) -> ToolLoop<'a> {
        ToolLoop {
            model,
            capabilities: table,
            delegation: ctx,
            cancel,
            max_turns: 3,
        }
    }

    #[test]
    fn test_input_from_arguments() {
        assert_eq!(
            input_from_arguments(&serde_json::json!({"query": "2 + 2"})),
            CapabilityInput::query("2 + 2")
        );
        assert_eq!(
            input_from_arguments(&serde_json::json!({"city": "Lisbon"})),
            CapabilityInput::query(r#"{"city":"Lisbon"}"#)
        );
        assert_eq!(input_from_arguments(&serde_json::Value::Null), CapabilityInput::query(""));
    }

    #[tokio::test]
    async fn test_plain_answer_with_history() {
        let llm = Arc::new(ScriptedLlm::new().with_default("Hello again, Ana."));
        let model = ModelHandle::new(llm.clone(), ModelConfig::default());
        let table = CapabilityTable::new();
        let ctx = DelegationContext::root("chat", 5);
        let cancel = CancellationToken::new();

        let history = vec![ChatMessage::user("My name is Ana"), ChatMessage::assistant_text("Hi Ana")];
        let out = run_loop(&model, &table, &ctx, &cancel)
            .run("You are friendly.", &history, "Do you remember me?")
            .await
            .unwrap();

        assert_eq!(out, "Hello again, Ana.");
        let call = &llm.calls()[0];
        assert_eq!(call.message_count, 4);
        assert_eq!(call.user, "Do you remember me?");
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .tool_call_when("What is", "calculator", r#"{"query": "6 * 7"}"#)
                .with_default("The answer is 42."),
        );
        let model = ModelHandle::new(llm.clone(), ModelConfig::default());
        let calc = Arc::new(StaticCapability::new("calculator", "42"));
        let mut table = CapabilityTable::new();
        table.insert(calc.clone()).unwrap();
        let ctx = DelegationContext::root("chat", 5);
        let cancel = CancellationToken::new();

        let out = run_loop(&model, &table, &ctx, &cancel)
            .run("You do math.", &[], "What is 6 times 7?")
            .await
            .unwrap();

        assert_eq!(out, "The answer is 42.");
        assert_eq!(calc.inputs(), [CapabilityInput::query("6 * 7")]);
        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tools, ["calculator"]);
        assert_eq!(calls[1].user, "42");
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported_to_model() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .tool_call_when("Look up", "crm", r#"{"query": "42"}"#)
                .with_default("Sorry, the CRM is down."),
        );
        let model = ModelHandle::new(llm.clone(), ModelConfig::default());
        let mut table = CapabilityTable::new();
        table.register(FailingCapability::new("crm", "503 Service Unavailable")).unwrap();
        let ctx = DelegationContext::root("chat", 5);
        let cancel = CancellationToken::new();

        let out = run_loop(&model, &table, &ctx, &cancel)
            .run("", &[], "Look up order 42")
            .await
            .unwrap();
        assert_eq!(out, "Sorry, the CRM is down.");
        assert!(llm.calls()[1].user.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_max_turns_exceeded() {
        let llm = Arc::new(ScriptedLlm::new().tool_call_when("", "echo", r#"{"query": "again"}"#));
        let model = ModelHandle::new(llm.clone(), ModelConfig::default());
        let mut table = CapabilityTable::new();
        table.register(StaticCapability::new("echo", "again")).unwrap();
        let ctx = DelegationContext::root("chat", 5);
        let cancel = CancellationToken::new();

        let err = run_loop(&model, &table, &ctx, &cancel)
            .run("", &[], "loop forever")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowhostError::MaxTurnsExceeded(3)));
        assert_eq!(llm.call_count(), 3);
    }
}
