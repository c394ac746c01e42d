use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use flowhost_core::config::WebSearchConfig;
use flowhost_core::definition::{KnowledgeBaseConfig, ToolConfig, ToolKind};
use flowhost_core::traits::Capability;

use crate::builtin::{CalculatorCapability, HttpEndpointCapability, SearchCapability};
use crate::knowledge::{HttpKnowledgeSource, KnowledgeCapability};

/// Shared resources handed to built-in constructors.
pub struct BuildContext<'a> {
    pub http: &'a reqwest::Client,
    pub web_search: Option<&'a WebSearchConfig>,
}

/// Constructor for a named built-in. `None` means the tool cannot be built
/// with the given config (for example a missing API key).
pub type BuiltinConstructor =
    Arc<dyn Fn(&ToolConfig, &BuildContext<'_>) -> Option<Arc<dyn Capability>> + Send + Sync>;

/// Builds capability handles from a definition's `tools` list.
///
/// Unknown built-ins and endpoint tools without an endpoint are skipped
/// with a warning rather than failing the request.
pub struct CapabilityFactory {
    http: reqwest::Client,
    web_search: Option<WebSearchConfig>,
    builtins: HashMap<String, BuiltinConstructor>,
}

impl CapabilityFactory {
    pub fn new(web_search: Option<WebSearchConfig>) -> Self {
        let mut factory = Self {
            http: reqwest::Client::new(),
            web_search,
            builtins: HashMap::new(),
        };
        factory.register_builtin("calculator", Arc::new(build_calculator));
        factory.register_builtin("search", Arc::new(build_search));
        factory
    }

    /// Add or replace a built-in. Names match case-insensitively.
    pub fn register_builtin(&mut self, name: &str, ctor: BuiltinConstructor) {
        self.builtins.insert(name.to_ascii_lowercase(), ctor);
    }

    pub fn builtin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builtins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn build(&self, tools: &[ToolConfig]) -> Vec<Arc<dyn Capability>> {
        let ctx = BuildContext {
            http: &self.http,
            web_search: self.web_search.as_ref(),
        };

        tools
            .iter()
            .filter_map(|tool| {
                let built = match tool.kind {
                    ToolKind::Builtin => match self.builtins.get(&tool.name.to_ascii_lowercase()) {
                        Some(ctor) => ctor(tool, &ctx),
                        None => {
                            warn!(tool = %tool.name, "Unknown built-in tool, skipping");
                            None
                        }
                    },
                    ToolKind::Mcp => build_endpoint(tool, &ctx),
                };
                if let Some(cap) = &built {
                    debug!(tool = %tool.name, capability = cap.name(), "Built capability");
                }
                built
            })
            .collect()
    }

    pub fn knowledge(&self, kb: &KnowledgeBaseConfig) -> Arc<dyn Capability> {
        let source = HttpKnowledgeSource::new(kb, self.http.clone());
        Arc::new(KnowledgeCapability::new(Arc::new(source)))
    }
}

impl Default for CapabilityFactory {
    fn default() -> Self {
        Self::new(None)
    }
}

fn build_calculator(tool: &ToolConfig, _ctx: &BuildContext<'_>) -> Option<Arc<dyn Capability>> {
    Some(Arc::new(CalculatorCapability::new(&tool.name, tool.description.as_deref())))
}

fn build_search(tool: &ToolConfig, ctx: &BuildContext<'_>) -> Option<Arc<dyn Capability>> {
    let api_key = tool
        .api_key
        .as_deref()
        .or(ctx.web_search.map(|ws| ws.api_key.as_str()))
        .filter(|k| !k.trim().is_empty());

    let Some(api_key) = api_key else {
        warn!(tool = %tool.name, "Search tool has no API key ([web_search] or tool api_key), skipping");
        return None;
    };

    let mut cap = SearchCapability::new(&tool.name, api_key, ctx.http.clone());
    if let Some(desc) = &tool.description {
        cap = cap.with_description(desc);
    }
    if let Some(max) = tool.extra.get("max_results").and_then(|v| v.as_u64()) {
        cap = cap.with_max_results(max);
    }
    Some(Arc::new(cap))
}

fn build_endpoint(tool: &ToolConfig, ctx: &BuildContext<'_>) -> Option<Arc<dyn Capability>> {
    let Some(endpoint) = tool.endpoint.as_deref().filter(|e| !e.trim().is_empty()) else {
        warn!(tool = %tool.name, "Endpoint tool missing endpoint, skipping");
        return None;
    };

    let mut cap = HttpEndpointCapability::new(&tool.name, endpoint, ctx.http.clone())
        .with_api_key(tool.api_key.as_deref());
    if let Some(desc) = &tool.description {
        cap = cap.with_description(desc);
    }
    if let Some(secs) = tool.extra.get("timeout_secs").and_then(|v| v.as_u64()) {
        cap = cap.with_timeout_secs(secs);
    }
    Some(Arc::new(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(json: serde_json::Value) -> Vec<ToolConfig> {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_builds_known_tools_and_skips_the_rest() {
        let factory = CapabilityFactory::default();
        let caps = factory.build(&tools(serde_json::json!([
            {"name": "Calculator", "type": "builtin"},
            {"name": "teleport", "type": "builtin"},
            {"name": "get_weather", "type": "mcp", "endpoint": "http://localhost:9100/weather"},
            {"name": "no_endpoint", "type": "mcp"},
            {"name": "search", "type": "builtin"}
        ])));

        let names: Vec<&str> = caps.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["Calculator", "get_weather"]);
    }

    #[test]
    fn test_search_uses_configured_key() {
        let factory = CapabilityFactory::new(Some(WebSearchConfig {
            provider: "tavily".into(),
            api_key: "tvly-test".into(),
        }));
        let caps = factory.build(&tools(serde_json::json!([
            {"name": "search", "type": "builtin", "description": "Find travel news"}
        ])));
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].description(), "Find travel news");
    }

    #[test]
    fn test_register_custom_builtin() {
        let mut factory = CapabilityFactory::default();
        factory.register_builtin(
            "Echo",
            Arc::new(|tool: &ToolConfig, _ctx: &BuildContext<'_>| {
                Some(Arc::new(CalculatorCapability::new(&tool.name, Some("echo"))) as Arc<dyn Capability>)
            }),
        );
        let caps = factory.build(&tools(serde_json::json!([{"name": "echo", "type": "builtin"}])));
        assert_eq!(caps.len(), 1);
        assert!(factory.builtin_names().contains(&"echo".to_string()));
    }

    #[test]
    fn test_knowledge_capability_name() {
        let factory = CapabilityFactory::default();
        let kb: KnowledgeBaseConfig = serde_json::from_value(serde_json::json!({
            "type": "vectordb", "config": {"uri": "http://localhost:6333/search"}
        }))
        .unwrap();
        assert_eq!(factory.knowledge(&kb).name(), "knowledge_base");
    }
}
