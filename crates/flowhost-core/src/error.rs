use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowhostError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    // Template / condition errors
    #[error("Template references steps[{index}] but only {len} step(s) exist")]
    Render { index: i64, len: usize },

    #[error("Condition verdict is not a boolean: {response:?}")]
    AmbiguousCondition { response: String },

    // Capability errors
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Capability execution failed: {capability}: {message}")]
    CapabilityExecution { capability: String, message: String },

    #[error("Capability timeout after {timeout_secs}s: {capability}")]
    CapabilityTimeout { capability: String, timeout_secs: u64 },

    #[error("Capability input validation failed: {0}")]
    CapabilityInput(String),

    // Node errors
    #[error("Node execution failed: {message}")]
    NodeExecution {
        capability: Option<String>,
        message: String,
    },

    #[error("Node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<FlowhostError>,
    },

    #[error("Flow exceeded {limit} node executions (last node '{node}')")]
    StepLimitExceeded { node: String, limit: usize },

    // Definition (load-time) errors
    #[error("Flow has no nodes")]
    EmptyFlow,

    #[error("Duplicate node name in flow: {0}")]
    DuplicateNode(String),

    #[error("Condition node '{node}' targets unknown node '{target}'")]
    DanglingTarget { node: String, target: String },

    #[error("Invalid agent definition: {0}")]
    InvalidDefinition(String),

    // Delegation errors
    #[error("Agent '{0}' cannot delegate to itself")]
    SelfDelegation(String),

    #[error("Delegation cycle: '{agent_id}' is already running in chain [{}]", .chain.join(" -> "))]
    DelegationCycle { agent_id: String, chain: Vec<String> },

    #[error("Delegation depth {depth} reached the ceiling of {max_depth}")]
    DelegationDepthExceeded { depth: usize, max_depth: usize },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    // Run control
    #[error("Agent exceeded max turns ({0})")]
    MaxTurnsExceeded(usize),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowhostError {
    /// Stable snake_case label for logs and API error bodies.
    ///
    /// `NodeFailed` reports the kind of the error it wraps.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LlmRequest(_) | Self::LlmStream(_) => "model_error",
            Self::Render { .. } => "render_error",
            Self::AmbiguousCondition { .. } => "ambiguous_condition",
            Self::UnknownCapability(_) => "unknown_capability",
            Self::CapabilityExecution { .. }
            | Self::CapabilityTimeout { .. }
            | Self::CapabilityInput(_) => "capability_error",
            Self::NodeExecution { .. } => "node_execution_error",
            Self::NodeFailed { source, .. } => source.kind(),
            Self::StepLimitExceeded { .. } => "step_limit_exceeded",
            Self::EmptyFlow => "empty_flow",
            Self::DuplicateNode(_) => "duplicate_node",
            Self::DanglingTarget { .. } => "dangling_target",
            Self::InvalidDefinition(_) => "invalid_definition",
            Self::SelfDelegation(_) => "self_delegation",
            Self::DelegationCycle { .. } => "delegation_cycle",
            Self::DelegationDepthExceeded { .. } => "delegation_depth_exceeded",
            Self::AgentNotFound(_) => "agent_not_found",
            Self::MaxTurnsExceeded(_) => "max_turns_exceeded",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Config(_) | Self::ConfigNotFound(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }

    /// Name of the flow node that failed, if this is a node-level failure.
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            Self::NodeFailed { node, .. } => Some(node),
            Self::StepLimitExceeded { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Errors raised while loading or validating a definition.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyFlow
                | Self::DuplicateNode(_)
                | Self::DanglingTarget { .. }
                | Self::InvalidDefinition(_)
                | Self::SelfDelegation(_)
        )
    }

    /// Wrap a model or capability failure as a node execution error.
    ///
    /// Errors that already carry engine meaning (render, routing,
    /// delegation guards, cancellation) pass through unchanged.
    pub fn into_node_execution(self, capability: Option<&str>) -> Self {
        match self {
            Self::LlmRequest(_)
            | Self::LlmStream(_)
            | Self::CapabilityExecution { .. }
            | Self::CapabilityTimeout { .. }
            | Self::CapabilityInput(_)
            | Self::MaxTurnsExceeded(_)
            | Self::Io(_)
            | Self::Json(_) => Self::NodeExecution {
                capability: capability.map(str::to_string),
                message: self.to_string(),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowhostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_failed_reports_inner_kind() {
        let err = FlowhostError::NodeFailed {
            node: "route_query".into(),
            source: Box::new(FlowhostError::AmbiguousCondition {
                response: "maybe".into(),
            }),
        };
        assert_eq!(err.kind(), "ambiguous_condition");
        assert_eq!(err.failed_node(), Some("route_query"));
        assert!(err.to_string().contains("route_query"));
    }

    #[test]
    fn test_into_node_execution_wraps_capability_failure() {
        let err = FlowhostError::CapabilityExecution {
            capability: "get_weather".into(),
            message: "502".into(),
        }
        .into_node_execution(Some("get_weather"));

        match err {
            FlowhostError::NodeExecution { capability, .. } => {
                assert_eq!(capability.as_deref(), Some("get_weather"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_into_node_execution_keeps_guard_errors() {
        let err = FlowhostError::DelegationDepthExceeded {
            depth: 5,
            max_depth: 5,
        }
        .into_node_execution(Some("agent_b"));
        assert_eq!(err.kind(), "delegation_depth_exceeded");
    }

    #[test]
    fn test_cycle_message_lists_chain() {
        let err = FlowhostError::DelegationCycle {
            agent_id: "coordinator".into(),
            chain: vec!["coordinator".into(), "researcher".into()],
        };
        assert_eq!(
            err.to_string(),
            "Delegation cycle: 'coordinator' is already running in chain [coordinator -> researcher]"
        );
    }
}
