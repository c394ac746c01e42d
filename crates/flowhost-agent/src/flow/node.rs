use std::future::Future;

use tokio_util::sync::CancellationToken;

use flowhost_core::definition::NodeSpec;
use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::event::EventBus;
use flowhost_core::types::CapabilityInput;
use flowhost_llm::ModelHandle;
use flowhost_tools::CapabilityTable;

use super::condition;
use super::state::FlowState;
use super::template;

/// Handles lent to every node of one run.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub agent_id: &'a str,
    pub persona: &'a str,
    pub model: &'a ModelHandle,
    pub capabilities: &'a CapabilityTable,
    pub delegation: &'a DelegationContext,
    pub cancel: &'a CancellationToken,
    pub events: Option<&'a EventBus>,
}

/// What a node produced.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Append to `steps` and continue with the default successor.
    Step(String),
    /// Jump to `target` (a node name or terminal marker).
    Route { verdict: bool, target: String },
}

/// Race an external call against the run's cancellation token.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(FlowhostError::Cancelled),
    }
}

pub async fn execute(node: &NodeSpec, state: &FlowState, ctx: &RunContext<'_>) -> Result<NodeOutcome> {
    match node {
        NodeSpec::Llm { prompt, .. } => {
            let rendered = template::render(prompt, &state.input, &state.steps)?;
            let text = cancellable(ctx.cancel, ctx.model.complete(ctx.persona, &rendered))
                .await
                .map_err(|e| e.into_node_execution(None))?;
            Ok(NodeOutcome::Step(text))
        }
        NodeSpec::Capability { capability_name, .. } => {
            let input = CapabilityInput::new(state.input.clone(), state.steps.clone());
            let output = cancellable(
                ctx.cancel,
                ctx.capabilities.invoke(capability_name, input, ctx.delegation),
            )
            .await
            .map_err(|e| e.into_node_execution(Some(capability_name)))?;
            Ok(NodeOutcome::Step(output.into_step()))
        }
        NodeSpec::Condition {
            condition, targets, ..
        } => {
            let rendered = template::render(condition, &state.input, &state.steps)?;
            let verdict = cancellable(ctx.cancel, condition::evaluate(ctx.model, ctx.persona, &rendered))
                .await
                .map_err(|e| e.into_node_execution(None))?;
            let target = if verdict { &targets.on_true } else { &targets.on_false };
            Ok(NodeOutcome::Route {
                verdict,
                target: target.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flowhost_core::config::ModelConfig;
    use flowhost_core::definition::ConditionTargets;
    use flowhost_test_utils::{FailingCapability, ScriptedLlm, StaticCapability};

    use super::*;

    struct Harness {
        llm: Arc<ScriptedLlm>,
        model: ModelHandle,
        table: CapabilityTable,
        delegation: DelegationContext,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new(llm: ScriptedLlm, table: CapabilityTable) -> Self {
            let llm = Arc::new(llm);
            Self {
                model: ModelHandle::new(llm.clone(), ModelConfig::default()),
                llm,
                table,
                delegation: DelegationContext::root("tester", 5),
                cancel: CancellationToken::new(),
            }
        }

        fn ctx(&self) -> RunContext<'_> {
            RunContext {
                agent_id: "tester",
                persona: "You are terse.",
                model: &self.model,
                capabilities: &self.table,
                delegation: &self.delegation,
                cancel: &self.cancel,
                events: None,
            }
        }
    }

    fn llm_node(prompt: &str) -> NodeSpec {
        NodeSpec::Llm {
            name: "n".into(),
            prompt: prompt.into(),
        }
    }

    #[tokio::test]
    async fn test_llm_node_renders_prompt_with_persona() {
        let h = Harness::new(ScriptedLlm::new().reply_when("city name", "Lisbon"), CapabilityTable::new());
        let state = FlowState::new("Weather in Lisbon");

        let out = execute(&llm_node("Extract the city name from: {input}"), &state, &h.ctx())
            .await
            .unwrap();
        assert_eq!(out, NodeOutcome::Step("Lisbon".into()));

        let call = &h.llm.calls()[0];
        assert_eq!(call.system.as_deref(), Some("You are terse."));
        assert_eq!(call.user, "Extract the city name from: Weather in Lisbon");
    }

    #[tokio::test]
    async fn test_llm_failure_becomes_node_execution_error() {
        let h = Harness::new(ScriptedLlm::new().fail_when("", "HTTP 500: boom"), CapabilityTable::new());
        let err = execute(&llm_node("{input}"), &FlowState::new("q"), &h.ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowhostError::NodeExecution { capability: None, .. }));
    }

    #[tokio::test]
    async fn test_capability_node_receives_full_state() {
        let weather = Arc::new(StaticCapability::structured("get_weather", serde_json::json!({"temp_c": 21})));
        let mut table = CapabilityTable::new();
        table.insert(weather.clone()).unwrap();
        let h = Harness::new(ScriptedLlm::new(), table);

        let mut state = FlowState::new("Weather in Lisbon");
        state.push_step("Lisbon".into());
        let node = NodeSpec::Capability {
            name: "get_weather".into(),
            capability_name: "get_weather".into(),
        };

        let out = execute(&node, &state, &h.ctx()).await.unwrap();
        assert_eq!(out, NodeOutcome::Step(r#"{"temp_c":21}"#.into()));
        assert_eq!(
            weather.inputs(),
            [CapabilityInput::new("Weather in Lisbon", vec!["Lisbon".into()])]
        );
    }

    #[tokio::test]
    async fn test_capability_node_errors() {
        let mut table = CapabilityTable::new();
        table.register(FailingCapability::new("order_lookup", "503")).unwrap();
        let h = Harness::new(ScriptedLlm::new(), table);
        let state = FlowState::new("Where is order 42?");

        let missing = NodeSpec::Capability {
            name: "lookup".into(),
            capability_name: "crm_lookup".into(),
        };
        let err = execute(&missing, &state, &h.ctx()).await.unwrap_err();
        assert!(matches!(err, FlowhostError::UnknownCapability(ref n) if n == "crm_lookup"));

        let failing = NodeSpec::Capability {
            name: "lookup".into(),
            capability_name: "order_lookup".into(),
        };
        let err = execute(&failing, &state, &h.ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            FlowhostError::NodeExecution { capability: Some(ref c), .. } if c == "order_lookup"
        ));
    }

    #[tokio::test]
    async fn test_condition_node_routes_without_step() {
        let h = Harness::new(
            ScriptedLlm::new().reply_when("an order?", "False"),
            CapabilityTable::new(),
        );
        let mut state = FlowState::new("I want a refund");
        state.push_step("refund".into());
        let node = NodeSpec::Condition {
            name: "route".into(),
            condition: "Is this about an order? {steps[-1]}".into(),
            targets: ConditionTargets {
                on_true: "handle_order".into(),
                on_false: "handle_other".into(),
            },
        };

        let out = execute(&node, &state, &h.ctx()).await.unwrap();
        assert_eq!(
            out,
            NodeOutcome::Route {
                verdict: false,
                target: "handle_other".into()
            }
        );
        assert!(h.llm.calls()[0].user.contains("Is this about an order? refund"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_external_call() {
        let mut table = CapabilityTable::new();
        table
            .register(StaticCapability::new("slow", "done").with_delay(std::time::Duration::from_secs(60)))
            .unwrap();
        let h = Harness::new(ScriptedLlm::new(), table);
        h.cancel.cancel();

        let node = NodeSpec::Capability {
            name: "slow".into(),
            capability_name: "slow".into(),
        };
        let err = execute(&node, &FlowState::new("q"), &h.ctx()).await.unwrap_err();
        assert!(matches!(err, FlowhostError::Cancelled));
    }
}
