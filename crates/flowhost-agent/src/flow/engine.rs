use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use flowhost_core::definition::{is_terminal, FlowDefinition, FlowKind, NodeSpec};
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::types::FlowEvent;

use super::node::{self, NodeOutcome, RunContext};
use super::state::{FlowState, FlowStatus};

pub const DEFAULT_MAX_NODE_EXECUTIONS: usize = 50;

/// A validated flow with its successor links resolved.
///
/// Each node's `default_next` is its array successor. Condition nodes
/// override it at run time with the target they select; no other node
/// can jump.
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    kind: FlowKind,
    nodes: Vec<NodeSpec>,
    positions: HashMap<String, usize>,
}

impl CompiledFlow {
    pub fn compile(definition: &FlowDefinition) -> Result<Self> {
        definition.validate()?;
        let positions = definition
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name().to_string(), i))
            .collect();
        Ok(Self {
            kind: definition.kind,
            nodes: definition.nodes.clone(),
            positions,
        })
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn default_next(&self, index: usize) -> Option<usize> {
        let next = index + 1;
        (next < self.nodes.len()).then_some(next)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

/// Output of a completed run.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub output: String,
    pub state: FlowState,
}

/// Interprets a [`CompiledFlow`] one node at a time.
///
/// Holds no per-run state; one engine serves any number of concurrent runs.
#[derive(Debug, Clone)]
pub struct FlowEngine {
    max_node_executions: usize,
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NODE_EXECUTIONS)
    }
}

impl FlowEngine {
    pub fn new(max_node_executions: usize) -> Self {
        Self {
            max_node_executions: max_node_executions.max(1),
        }
    }

    pub fn max_node_executions(&self) -> usize {
        self.max_node_executions
    }

    /// Run `flow` on `input`. Any node failure ends the run; partial steps
    /// are logged at debug level and discarded.
    pub async fn run(&self, flow: &CompiledFlow, input: &str, ctx: &RunContext<'_>) -> Result<FlowOutcome> {
        let mut state = FlowState::new(input);
        match self.drive(flow, &mut state, ctx).await {
            Ok(()) => {
                state.status = FlowStatus::Completed;
                let output = match state.last_step() {
                    Some(last) => last.to_string(),
                    None => {
                        warn!(agent_id = ctx.agent_id, "Flow completed without producing a step");
                        String::new()
                    }
                };
                Ok(FlowOutcome { output, state })
            }
            Err(e) => {
                state.status = FlowStatus::Failed;
                debug!(agent_id = ctx.agent_id, state = %state.to_json(), "Flow state at failure");
                Err(e)
            }
        }
    }

    async fn drive(&self, flow: &CompiledFlow, state: &mut FlowState, ctx: &RunContext<'_>) -> Result<()> {
        let mut current = Some(0);
        let mut executed = 0usize;

        while let Some(index) = current {
            let node = &flow.nodes[index];
            let name = node.name();

            if ctx.cancel.is_cancelled() {
                return Err(FlowhostError::Cancelled);
            }
            if executed >= self.max_node_executions {
                return Err(FlowhostError::StepLimitExceeded {
                    node: name.to_string(),
                    limit: self.max_node_executions,
                });
            }
            executed += 1;

            state.enter(index, name);
            publish(ctx, FlowEvent::NodeStarted {
                agent_id: ctx.agent_id.to_string(),
                node: name.to_string(),
                index,
            });
            debug!(agent_id = ctx.agent_id, node = name, kind = node.kind(), index, "Executing node");

            let started = Instant::now();
            let outcome = match node::execute(node, state, ctx).await {
                Ok(outcome) => outcome,
                Err(FlowhostError::Cancelled) => return Err(FlowhostError::Cancelled),
                Err(e) => {
                    warn!(agent_id = ctx.agent_id, node = name, kind = e.kind(), error = %e, "Node failed");
                    return Err(FlowhostError::NodeFailed {
                        node: name.to_string(),
                        source: Box::new(e),
                    });
                }
            };

            current = match outcome {
                NodeOutcome::Step(value) => {
                    let step_index = state.push_step(value);
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    info!(agent_id = ctx.agent_id, node = name, step_index, elapsed_ms, "Node complete");
                    publish(ctx, FlowEvent::NodeCompleted {
                        agent_id: ctx.agent_id.to_string(),
                        node: name.to_string(),
                        step_index,
                        elapsed_ms,
                    });
                    flow.default_next(index)
                }
                NodeOutcome::Route { verdict, target } => {
                    info!(agent_id = ctx.agent_id, node = name, verdict, target = %target, "Condition routed");
                    publish(ctx, FlowEvent::ConditionEvaluated {
                        agent_id: ctx.agent_id.to_string(),
                        node: name.to_string(),
                        verdict,
                        target: target.clone(),
                    });
                    if is_terminal(&target) {
                        None
                    } else {
                        // Targets are checked at compile time; a miss means the flow was mutated.
                        Some(flow.position(&target).ok_or_else(|| FlowhostError::NodeFailed {
                            node: name.to_string(),
                            source: Box::new(FlowhostError::DanglingTarget {
                                node: name.to_string(),
                                target: target.clone(),
                            }),
                        })?)
                    }
                }
            };
        }

        Ok(())
    }
}

fn publish(ctx: &RunContext<'_>, event: FlowEvent) {
    if let Some(events) = ctx.events {
        events.publish(event);
    }
}
