//! Agent definition fixtures.

use std::path::Path;

use flowhost_core::definition::AgentDefinition;

/// Sequential flow: extract a city, fetch its weather, suggest attractions.
pub const TRAVEL_ASSISTANT: &str = r#"{
    "persona": "You are a travel assistant.\nAnswer with practical suggestions.",
    "model": "gpt-4",
    "tools": [
        {"name": "get_weather", "type": "mcp", "endpoint": "http://localhost:9100/weather",
         "description": "Current weather for a city"}
    ],
    "flow_template": {
        "type": "sequential",
        "description": "Weather-aware attraction suggestions",
        "nodes": [
            {"name": "extract_location", "type": "llm",
             "prompt": "Extract the city name from: {input}"},
            {"name": "get_weather", "type": "tool", "tool_name": "get_weather"},
            {"name": "get_attractions", "type": "llm",
             "prompt": "Suggest things to do for '{input}' given this weather: {steps[1]}"}
        ]
    }
}"#;

/// Branching flow. Orders take the `order_lookup` capability; everything
/// else is drafted and polished, then rejoins `format_response`.
///
/// Array order is the only implicit edge, so the non-order branch can only
/// get past `handle_order` through a condition. `skip_order_lookup` sends
/// both verdicts to `format_response`.
pub const CUSTOMER_SERVICE: &str = r#"{
    "persona": "You are a customer service agent for an online store.",
    "model": "gpt-4",
    "tools": [
        {"name": "order_lookup", "type": "mcp", "endpoint": "http://localhost:9100/orders"}
    ],
    "flow_template": {
        "type": "branching",
        "nodes": [
            {"name": "detect_intent", "type": "llm",
             "prompt": "Classify the intent of: {input}"},
            {"name": "route_query", "type": "condition",
             "condition": "Does this intent concern an order? {steps[-1]}",
             "targets": {"true": "handle_order", "false": "draft_other"}},
            {"name": "draft_other", "type": "llm",
             "prompt": "Draft a helpful reply to: {input}"},
            {"name": "handle_other", "type": "llm",
             "prompt": "Polish this reply: {steps[-1]}"},
            {"name": "skip_order_lookup", "type": "condition",
             "condition": "Is this reply ready to be formatted for the customer? {steps[-1]}",
             "targets": {"true": "format_response", "false": "format_response"}},
            {"name": "handle_order", "type": "tool", "tool_name": "order_lookup"},
            {"name": "format_response", "type": "llm",
             "prompt": "Format for the customer: {steps[-1]}"}
        ]
    }
}"#;

pub fn travel_assistant() -> AgentDefinition {
    parse("travel_assistant", TRAVEL_ASSISTANT)
}

pub fn customer_service() -> AgentDefinition {
    parse("customer_service", CUSTOMER_SERVICE)
}

/// Single-node llm agent; the prompt echoes the query.
pub fn simple_agent(persona: &str) -> AgentDefinition {
    parse(
        "simple",
        &serde_json::json!({
            "persona": persona,
            "flow_template": {"nodes": [{"name": "answer", "type": "llm", "prompt": "{input}"}]}
        })
        .to_string(),
    )
}

/// Agent with no flow, answered through the single-shot tool loop.
pub fn chat_agent(persona: &str, tools: &[&str]) -> AgentDefinition {
    let tools: Vec<serde_json::Value> = tools
        .iter()
        .map(|name| serde_json::json!({"name": name, "type": "builtin"}))
        .collect();
    parse(
        "chat",
        &serde_json::json!({ "persona": persona, "tools": tools }).to_string(),
    )
}

/// Multi-agent coordinator whose flow calls each delegate in order.
pub fn coordinator(delegates: &[&str]) -> AgentDefinition {
    let nodes: Vec<serde_json::Value> = delegates
        .iter()
        .map(|id| {
            serde_json::json!({
                "name": format!("ask_{id}"),
                "type": "tool",
                "tool_name": format!("agent_{id}")
            })
        })
        .collect();
    let json = serde_json::json!({
        "persona": "You coordinate expert agents.",
        "delegates": delegates,
        "flow_template": {"type": "multi_agent", "nodes": nodes}
    });
    serde_json::from_value(json).unwrap_or_else(|e| panic!("coordinator fixture: {e}"))
}

/// Write `<dir>/<id>.json` for each definition.
pub fn write_definitions(dir: &Path, defs: &[(&str, &AgentDefinition)]) {
    for (id, def) in defs {
        let json = serde_json::to_string_pretty(def).unwrap_or_else(|e| panic!("serialize {id}: {e}"));
        std::fs::write(dir.join(format!("{id}.json")), json)
            .unwrap_or_else(|e| panic!("write {id}: {e}"));
    }
}

fn parse(id: &str, json: &str) -> AgentDefinition {
    AgentDefinition::from_json(id, json).unwrap_or_else(|e| panic!("fixture {id}: {e}"))
}
