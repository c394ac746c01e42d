//! Declarative agent definitions and their load-time validation.
//!
//! Definitions are JSON documents. Everything that can be checked without
//! running the agent is checked here, so a definition that passes
//! [`AgentDefinition::validate`] can only fail at run time on external calls,
//! rendering, or routing.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{FlowhostError, Result};

/// Reserved condition targets that end the run.
pub const TERMINAL_MARKERS: [&str; 2] = ["END", "final"];

pub fn is_terminal(target: &str) -> bool {
    TERMINAL_MARKERS.contains(&target)
}

/// Prefix of the capability name under which a delegate agent is exposed.
pub const DELEGATE_PREFIX: &str = "agent_";

pub fn delegate_capability_name(agent_id: &str) -> String {
    format!("{DELEGATE_PREFIX}{agent_id}")
}

/// Capability name under which a configured knowledge base is exposed.
pub const KNOWLEDGE_CAPABILITY: &str = "knowledge_base";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// System prompt for every model call this agent makes.
    pub persona: String,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<KnowledgeBaseConfig>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_template: Option<FlowDefinition>,
    /// Agent ids callable as `agent_<id>` capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delegates: Vec<String>,
}

fn default_model() -> String {
    "gpt-4".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Builtin,
    Mcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Tool-specific settings not covered by the fields above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeKind {
    Vectordb,
    Graph,
}

impl KnowledgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vectordb => "vectordb",
            Self::Graph => "graph",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    #[serde(rename = "type")]
    pub kind: KnowledgeKind,
    pub config: KnowledgeBackendConfig,
}

/// Connection settings shared by both knowledge backends. `index_name` and
/// `k` apply to vector stores; `auth` and `query_template` to graph stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBackendConfig {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_template: Option<String>,
}

fn default_k() -> usize {
    5
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    #[default]
    Sequential,
    Branching,
    MultiAgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(rename = "type", alias = "kind", default)]
    pub kind: FlowKind,
    pub nodes: Vec<NodeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeSpec {
    Llm {
        name: String,
        #[serde(default = "default_prompt")]
        prompt: String,
    },
    #[serde(rename = "tool", alias = "capability")]
    Capability {
        name: String,
        #[serde(rename = "tool_name", alias = "capability_name")]
        capability_name: String,
    },
    Condition {
        name: String,
        condition: String,
        targets: ConditionTargets,
    },
}

fn default_prompt() -> String {
    "{input}".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionTargets {
    #[serde(rename = "true")]
    pub on_true: String,
    #[serde(rename = "false")]
    pub on_false: String,
}

impl NodeSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Llm { name, .. } | Self::Capability { name, .. } | Self::Condition { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llm { .. } => "llm",
            Self::Capability { .. } => "tool",
            Self::Condition { .. } => "condition",
        }
    }
}

impl FlowDefinition {
    /// Check the graph shape: non-empty, unique names, resolvable targets.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(FlowhostError::EmptyFlow);
        }

        let mut names = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let name = node.name();
            if name.trim().is_empty() {
                return Err(FlowhostError::InvalidDefinition(
                    "flow node with empty name".to_string(),
                ));
            }
            if is_terminal(name) {
                return Err(FlowhostError::InvalidDefinition(format!(
                    "node name '{name}' is a reserved terminal marker"
                )));
            }
            if !names.insert(name) {
                return Err(FlowhostError::DuplicateNode(name.to_string()));
            }
        }

        for node in &self.nodes {
            match node {
                NodeSpec::Condition {
                    name,
                    condition,
                    targets,
                } => {
                    if condition.trim().is_empty() {
                        return Err(FlowhostError::InvalidDefinition(format!(
                            "condition node '{name}' has an empty condition"
                        )));
                    }
                    for target in [&targets.on_true, &targets.on_false] {
                        if !is_terminal(target) && !names.contains(target.as_str()) {
                            return Err(FlowhostError::DanglingTarget {
                                node: name.clone(),
                                target: target.clone(),
                            });
                        }
                    }
                }
                NodeSpec::Capability {
                    name,
                    capability_name,
                } if capability_name.trim().is_empty() => {
                    return Err(FlowhostError::InvalidDefinition(format!(
                        "tool node '{name}' has no tool_name"
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

impl AgentDefinition {
    /// Parse and validate a definition document for `agent_id`.
    pub fn from_json(agent_id: &str, json: &str) -> Result<Self> {
        let def: Self = serde_json::from_str(json)
            .map_err(|e| FlowhostError::InvalidDefinition(format!("{agent_id}: {e}")))?;
        def.validate(agent_id)?;
        Ok(def)
    }

    /// Load-time checks. Self-delegation needs the id the definition is
    /// registered under, which is not part of the document.
    pub fn validate(&self, agent_id: &str) -> Result<()> {
        let mut tool_names = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(FlowhostError::InvalidDefinition(
                    "tool with empty name".to_string(),
                ));
            }
            if !tool_names.insert(tool.name.as_str()) {
                return Err(FlowhostError::InvalidDefinition(format!(
                    "duplicate tool name '{}'",
                    tool.name
                )));
            }
        }

        if let Some(kb) = &self.knowledge_base {
            if kb.config.uri.trim().is_empty() {
                return Err(FlowhostError::InvalidDefinition(
                    "knowledge_base.config.uri is empty".to_string(),
                ));
            }
            if kb.config.k == 0 {
                return Err(FlowhostError::InvalidDefinition(
                    "knowledge_base.config.k must be at least 1".to_string(),
                ));
            }
        }

        let mut delegates = HashSet::new();
        for delegate in &self.delegates {
            if delegate == agent_id {
                return Err(FlowhostError::SelfDelegation(agent_id.to_string()));
            }
            if !delegates.insert(delegate.as_str()) {
                return Err(FlowhostError::InvalidDefinition(format!(
                    "duplicate delegate '{delegate}'"
                )));
            }
        }

        // Tools share one namespace with the generated capabilities.
        let generated = self
            .delegates
            .iter()
            .map(|d| delegate_capability_name(d))
            .chain(self.knowledge_base.is_some().then(|| KNOWLEDGE_CAPABILITY.to_string()));
        for name in generated {
            if tool_names.contains(name.as_str()) {
                return Err(FlowhostError::InvalidDefinition(format!(
                    "tool '{name}' collides with a generated capability"
                )));
            }
        }

        if let Some(flow) = &self.flow_template {
            flow.validate()?;
            if flow.kind == FlowKind::MultiAgent && self.delegates.is_empty() {
                return Err(FlowhostError::InvalidDefinition(
                    "multi_agent flow declares no delegates".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// First line of the persona, for listings.
    pub fn persona_summary(&self) -> &str {
        self.persona.lines().next().unwrap_or("").trim()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAVEL: &str = r#"{
        "persona": "You are a travel assistant.\nBe concise.",
        "model": "gpt-4",
        "tools": [
            {"name": "get_weather", "type": "mcp", "endpoint": "http://localhost:9000/weather"}
        ],
        "flow_template": {
            "type": "sequential",
            "nodes": [
                {"name": "extract_location", "type": "llm", "prompt": "Extract the city from: {input}"},
                {"name": "get_weather", "type": "tool", "tool_name": "get_weather"},
                {"name": "get_attractions", "type": "llm", "prompt": "{input} {steps[1]}"}
            ]
        }
    }"#;

    fn flow(nodes: serde_json::Value) -> FlowDefinition {
        serde_json::from_value(serde_json::json!({ "type": "branching", "nodes": nodes })).unwrap()
    }

    #[test]
    fn test_parse_travel_definition() {
        let def = AgentDefinition::from_json("travel_assistant", TRAVEL).unwrap();
        assert_eq!(def.persona_summary(), "You are a travel assistant.");
        let flow = def.flow_template.unwrap();
        assert_eq!(flow.kind, FlowKind::Sequential);
        assert_eq!(flow.nodes.len(), 3);
        assert_eq!(
            flow.nodes[1],
            NodeSpec::Capability {
                name: "get_weather".into(),
                capability_name: "get_weather".into(),
            }
        );
    }

    #[test]
    fn test_defaults_apply() {
        let def: AgentDefinition = serde_json::from_str(
            r#"{"persona": "p", "flow_template": {"nodes": [{"name": "answer", "type": "llm"}]}}"#,
        )
        .unwrap();
        assert_eq!(def.model, "gpt-4");
        let flow = def.flow_template.unwrap();
        assert_eq!(flow.kind, FlowKind::Sequential);
        assert!(matches!(&flow.nodes[0], NodeSpec::Llm { prompt, .. } if prompt == "{input}"));
    }

    #[test]
    fn test_capability_name_alias() {
        let node: NodeSpec = serde_json::from_str(
            r#"{"name": "lookup", "type": "tool", "capability_name": "search"}"#,
        )
        .unwrap();
        assert!(matches!(node, NodeSpec::Capability { capability_name, .. } if capability_name == "search"));
    }

    #[test]
    fn test_empty_flow_rejected() {
        let err = flow(serde_json::json!([])).validate().unwrap_err();
        assert!(matches!(err, FlowhostError::EmptyFlow));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let err = flow(serde_json::json!([
            {"name": "a", "type": "llm"},
            {"name": "a", "type": "llm"}
        ]))
        .validate()
        .unwrap_err();
        assert!(matches!(err, FlowhostError::DuplicateNode(name) if name == "a"));
    }

    #[test]
    fn test_dangling_target_rejected() {
        let err = flow(serde_json::json!([
            {"name": "check", "type": "condition", "condition": "{input}",
             "targets": {"true": "missing", "false": "END"}}
        ]))
        .validate()
        .unwrap_err();
        assert!(matches!(err, FlowhostError::DanglingTarget { target, .. } if target == "missing"));
    }

    #[test]
    fn test_terminal_markers_accepted_as_targets() {
        flow(serde_json::json!([
            {"name": "check", "type": "condition", "condition": "{input}",
             "targets": {"true": "END", "false": "final"}}
        ]))
        .validate()
        .unwrap();
    }

    #[test]
    fn test_self_delegation_rejected() {
        let json = r#"{
            "persona": "coordinator",
            "delegates": ["researcher", "coordinator"],
            "flow_template": {"type": "multi_agent", "nodes": [
                {"name": "ask", "type": "tool", "tool_name": "agent_researcher"}
            ]}
        }"#;
        let err = AgentDefinition::from_json("coordinator", json).unwrap_err();
        assert!(matches!(err, FlowhostError::SelfDelegation(id) if id == "coordinator"));
    }

    #[test]
    fn test_capability_name_collision_rejected() {
        let with_delegate = r#"{
            "persona": "coordinator",
            "tools": [{"name": "agent_helper", "type": "mcp", "endpoint": "http://localhost:9000/helper"}],
            "delegates": ["helper"]
        }"#;
        let err = AgentDefinition::from_json("coordinator", with_delegate).unwrap_err();
        assert!(err.is_definition_error());
        assert!(err.to_string().contains("agent_helper"));

        let with_knowledge = r#"{
            "persona": "librarian",
            "tools": [{"name": "knowledge_base", "type": "builtin"}],
            "knowledge_base": {"type": "vectordb", "config": {"uri": "http://localhost:6333"}}
        }"#;
        let err = AgentDefinition::from_json("librarian", with_knowledge).unwrap_err();
        assert!(err.to_string().contains("knowledge_base"));

        let without_knowledge = r#"{
            "persona": "librarian",
            "tools": [{"name": "knowledge_base", "type": "builtin"}]
        }"#;
        assert!(AgentDefinition::from_json("librarian", without_knowledge).is_ok());
    }

    #[test]
    fn test_multi_agent_requires_delegates() {
        let json = r#"{
            "persona": "coordinator",
            "flow_template": {"type": "multi_agent", "nodes": [{"name": "a", "type": "llm"}]}
        }"#;
        let err = AgentDefinition::from_json("coordinator", json).unwrap_err();
        assert!(err.is_definition_error());
    }

    #[test]
    fn test_unknown_node_type_is_invalid_definition() {
        let json = r#"{"persona": "p", "flow_template": {"nodes": [{"name": "a", "type": "loop"}]}}"#;
        let err = AgentDefinition::from_json("a", json).unwrap_err();
        assert!(matches!(err, FlowhostError::InvalidDefinition(_)));
    }

    #[test]
    fn test_knowledge_base_defaults() {
        let json = r#"{
            "persona": "p",
            "knowledge_base": {"type": "vectordb", "config": {"uri": "http://localhost:6333"}}
        }"#;
        let def = AgentDefinition::from_json("kb_agent", json).unwrap();
        let kb = def.knowledge_base.unwrap();
        assert_eq!(kb.kind, KnowledgeKind::Vectordb);
        assert_eq!(kb.config.k, 5);
    }
}
