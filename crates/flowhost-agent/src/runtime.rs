use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowhost_core::config::{AppConfig, EngineConfig};
use flowhost_core::definition::AgentDefinition;
use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::event::EventBus;
use flowhost_core::traits::Capability;
use flowhost_core::types::{ChatMessage, FlowEvent, Role, SessionId};
use flowhost_llm::ModelHandle;
use flowhost_tools::{CapabilityFactory, CapabilityTable, KNOWLEDGE_CAPABILITY};

use crate::delegate::{AgentDelegate, AgentInvoker};
use crate::flow::{CompiledFlow, FlowEngine, RunContext};
use crate::session::SessionManager;
use crate::single_shot::ToolLoop;
use crate::store::AgentResolver;

/// Picks the model handle for a definition's `model` string.
pub type ModelProvider = Arc<dyn Fn(&str) -> ModelHandle + Send + Sync>;

/// Everything one request needs to run an agent. Built fresh per request
/// and dropped when the request ends.
pub struct ResolvedAgent {
    pub id: String,
    pub definition: Arc<AgentDefinition>,
    pub model: ModelHandle,
    pub capabilities: CapabilityTable,
    pub flow: Option<CompiledFlow>,
}

/// Result of [`Runtime::query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub response: String,
    pub agent_id: String,
    pub session_id: SessionId,
    /// Wall-clock seconds.
    pub execution_time: f64,
}

struct Inner {
    engine_config: EngineConfig,
    resolver: Arc<dyn AgentResolver>,
    factory: CapabilityFactory,
    models: ModelProvider,
    overrides: HashMap<String, Arc<dyn Capability>>,
    engine: FlowEngine,
    events: Arc<EventBus>,
    sessions: Arc<SessionManager>,
}

/// Resolves agents and runs them. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

pub struct RuntimeBuilder {
    config: AppConfig,
    resolver: Arc<dyn AgentResolver>,
    factory: Option<CapabilityFactory>,
    models: Option<ModelProvider>,
    overrides: HashMap<String, Arc<dyn Capability>>,
    events: Option<Arc<EventBus>>,
    sessions: Option<Arc<SessionManager>>,
}

impl RuntimeBuilder {
    pub fn with_factory(mut self, factory: CapabilityFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_model_provider(mut self, provider: impl Fn(&str) -> ModelHandle + Send + Sync + 'static) -> Self {
        self.models = Some(Arc::new(provider));
        self
    }

    /// Use `cap` wherever an agent declares a tool (or knowledge base) of
    /// the same name, instead of building one from the definition.
    pub fn with_capability(mut self, cap: Arc<dyn Capability>) -> Self {
        self.overrides.insert(cap.name().to_string(), cap);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn build(self) -> Runtime {
        let engine_config = self.config.engine.clone();
        let config = self.config;
        let factory = self
            .factory
            .unwrap_or_else(|| CapabilityFactory::new(config.web_search.clone()));
        let models = self.models.unwrap_or_else(|| {
            let config = config.clone();
            Arc::new(move |model: &str| flowhost_llm::model_for(&config, model))
        });
        let sessions = self.sessions.unwrap_or_else(|| {
            Arc::new(SessionManager::new(
                engine_config.session_ttl_secs,
                engine_config.session_history_limit,
            ))
        });

        Runtime {
            inner: Arc::new(Inner {
                engine: FlowEngine::new(engine_config.max_node_executions),
                engine_config,
                resolver: self.resolver,
                factory,
                models,
                overrides: self.overrides,
                events: self.events.unwrap_or_default(),
                sessions,
            }),
        }
    }
}

/// Delegation entry point bound to the cancellation token of the run that
/// built it.
struct RunInvoker {
    runtime: Runtime,
    cancel: CancellationToken,
}

impl AgentInvoker for RunInvoker {
    fn invoke_agent<'a>(&'a self, query: String, ctx: DelegationContext) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let chain = ctx.chain();
            let Some(agent_id) = ctx.current().map(str::to_string) else {
                return Err(FlowhostError::InvalidDefinition("delegation without a target agent".into()));
            };
            let from = chain
                .len()
                .checked_sub(2)
                .and_then(|i| chain.get(i))
                .cloned()
                .unwrap_or_default();
            self.runtime.inner.events.publish(FlowEvent::Delegated {
                from,
                to: agent_id.clone(),
                depth: ctx.depth(),
            });
            self.runtime
                .execute(&agent_id, &query, &[], ctx.clone(), self.cancel.child_token())
                .await
        })
    }
}

impl Runtime {
    pub fn builder(config: AppConfig, resolver: Arc<dyn AgentResolver>) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            resolver,
            factory: None,
            models: None,
            overrides: HashMap::new(),
            events: None,
            sessions: None,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.inner.sessions
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.inner.engine_config
    }

    /// Build the agent named `agent_id` for a standalone inspection.
    pub async fn resolve(&self, agent_id: &str) -> Result<ResolvedAgent> {
        self.resolve_for_run(agent_id, &CancellationToken::new()).await
    }

    async fn resolve_for_run(&self, agent_id: &str, cancel: &CancellationToken) -> Result<ResolvedAgent> {
        let definition = self.inner.resolver.resolve(agent_id).await?;
        let model = (self.inner.models)(&definition.model);

        let mut capabilities = CapabilityTable::new();
        for tool in &definition.tools {
            match self.inner.overrides.get(&tool.name) {
                Some(cap) => capabilities.insert(cap.clone())?,
                None => {
                    for cap in self.inner.factory.build(std::slice::from_ref(tool)) {
                        capabilities.insert(cap)?;
                    }
                }
            }
        }

        if let Some(kb) = &definition.knowledge_base {
            let cap = match self.inner.overrides.get(KNOWLEDGE_CAPABILITY) {
                Some(cap) => cap.clone(),
                None => self.inner.factory.knowledge(kb),
            };
            capabilities.insert(cap)?;
        }

        if !definition.delegates.is_empty() {
            let invoker: Arc<dyn AgentInvoker> = Arc::new(RunInvoker {
                runtime: self.clone(),
                cancel: cancel.clone(),
            });
            for delegate_id in &definition.delegates {
                let delegate = AgentDelegate::new(delegate_id, invoker.clone())
                    .with_timeout_secs(self.inner.engine_config.request_timeout_secs);
                capabilities.register(delegate)?;
            }
        }

        let flow = definition
            .flow_template
            .as_ref()
            .map(CompiledFlow::compile)
            .transpose()?;

        debug!(
            agent_id,
            model = model.model_id(),
            capabilities = ?capabilities.names(),
            has_flow = flow.is_some(),
            "Resolved agent"
        );

        Ok(ResolvedAgent {
            id: agent_id.to_string(),
            definition,
            model,
            capabilities,
            flow,
        })
    }

    /// Run `agent_id` on `query` with no session history.
    pub async fn run(&self, agent_id: &str, query: &str) -> Result<String> {
        self.run_with(agent_id, query, &[], CancellationToken::new()).await
    }

    /// Run a top-level request, bounded by the request timeout.
    pub async fn run_with(
        &self,
        agent_id: &str,
        query: &str,
        history: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<String> {
        let ctx = DelegationContext::root(agent_id, self.inner.engine_config.max_delegation_depth);
        let secs = self.inner.engine_config.request_timeout_secs;

        let run = self.execute(agent_id, query, history, ctx, cancel.clone());
        match tokio::time::timeout(Duration::from_secs(secs), run).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                let err = FlowhostError::Timeout(secs);
                warn!(agent_id, timeout_secs = secs, "Request timed out");
                self.inner.events.publish(FlowEvent::RunFailed {
                    agent_id: agent_id.to_string(),
                    node: None,
                    kind: err.kind().to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Run a request within a chat session and record the exchange.
    pub async fn query(&self, agent_id: &str, query: &str, session_id: Option<&str>) -> Result<QueryOutcome> {
        let started = Instant::now();
        // Unknown agents fail before a session is created.
        self.inner.resolver.resolve(agent_id).await?;

        let sessions = &self.inner.sessions;
        sessions.expire().await;
        let session_id = sessions.get_or_create(session_id, agent_id).await;
        let history = sessions.history(&session_id.0).await;

        let response = self
            .run_with(agent_id, query, &history, CancellationToken::new())
            .await?;

        sessions.append(&session_id.0, Role::User, query).await;
        sessions.append(&session_id.0, Role::Assistant, &response).await;

        Ok(QueryOutcome {
            response,
            agent_id: agent_id.to_string(),
            session_id,
            execution_time: started.elapsed().as_secs_f64(),
        })
    }

    fn execute<'a>(
        &'a self,
        agent_id: &'a str,
        query: &'a str,
        history: &'a [ChatMessage],
        ctx: DelegationContext,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let started = Instant::now();
            let events = &self.inner.events;
            events.publish(FlowEvent::RunStarted {
                agent_id: agent_id.to_string(),
                depth: ctx.depth(),
            });
            info!(agent_id, depth = ctx.depth(), "Agent run started");

            let result = self.execute_resolved(agent_id, query, history, &ctx, &cancel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok((output, steps)) => {
                    info!(agent_id, steps, elapsed_ms, "Agent run complete");
                    events.publish(FlowEvent::RunCompleted {
                        agent_id: agent_id.to_string(),
                        steps,
                        elapsed_ms,
                    });
                    Ok(output)
                }
                Err(e) => {
                    warn!(agent_id, kind = e.kind(), node = e.failed_node(), error = %e, "Agent run failed");
                    events.publish(FlowEvent::RunFailed {
                        agent_id: agent_id.to_string(),
                        node: e.failed_node().map(str::to_string),
                        kind: e.kind().to_string(),
                        error: e.to_string(),
                    });
                    Err(e)
                }
            }
        })
    }

    /// Returns the output and the number of recorded steps.
    async fn execute_resolved(
        &self,
        agent_id: &str,
        query: &str,
        history: &[ChatMessage],
        ctx: &DelegationContext,
        cancel: &CancellationToken,
    ) -> Result<(String, usize)> {
        let agent = self.resolve_for_run(agent_id, cancel).await?;
        let persona = agent.definition.persona.as_str();

        match &agent.flow {
            Some(flow) => {
                let run_ctx = RunContext {
                    agent_id,
                    persona,
                    model: &agent.model,
                    capabilities: &agent.capabilities,
                    delegation: ctx,
                    cancel,
                    events: Some(self.inner.events.as_ref()),
                };
                let outcome = self.inner.engine.run(flow, query, &run_ctx).await?;
                Ok((outcome.output, outcome.state.steps.len()))
            }
            None => {
                let tool_loop = ToolLoop {
                    model: &agent.model,
                    capabilities: &agent.capabilities,
                    delegation: ctx,
                    cancel,
                    max_turns: self.inner.engine_config.max_turns,
                };
                let output = tool_loop.run(persona, history, query).await?;
                Ok((output, 0))
            }
        }
    }
}
