use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use flowhost_core::definition::delegate_capability_name;
use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::Result;
use flowhost_core::traits::Capability;
use flowhost_core::types::{CapabilityInput, CapabilityOutput};

/// Runs a whole agent on behalf of another agent.
pub trait AgentInvoker: Send + Sync + 'static {
    /// Run the agent named by `ctx.current()` on `query`. `ctx` has already
    /// been derived for the delegated run.
    fn invoke_agent<'a>(&'a self, query: String, ctx: DelegationContext) -> BoxFuture<'a, Result<String>>;
}

/// Exposes agent `agent_id` as the `agent_<id>` capability.
///
/// The delegated query is the caller's most recent step, or its input when
/// no step exists yet. Cycle and depth guards run before anything else.
pub struct AgentDelegate {
    agent_id: String,
    name: String,
    description: String,
    timeout_secs: u64,
    invoker: Arc<dyn AgentInvoker>,
}

impl AgentDelegate {
    pub fn new(agent_id: &str, invoker: Arc<dyn AgentInvoker>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            name: delegate_capability_name(agent_id),
            description: format!("Ask the '{agent_id}' agent and return its answer"),
            timeout_secs: 120,
            invoker,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

impl Capability for AgentDelegate {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn invoke<'a>(
        &'a self,
        input: CapabilityInput,
        ctx: &'a DelegationContext,
    ) -> BoxFuture<'a, Result<CapabilityOutput>> {
        Box::pin(async move {
            let child = ctx.enter(&self.agent_id)?;
            info!(
                from = ctx.current().unwrap_or("-"),
                to = %self.agent_id,
                depth = child.depth(),
                "Delegating"
            );
            let query = input.latest().to_string();
            let output = self.invoker.invoke_agent(query, child).await?;
            Ok(CapabilityOutput::Text(output))
        })
    }
}
