use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use flowhost_agent::QueryOutcome;
use flowhost_core::definition::AgentDefinition;

use crate::error::ApiError;
use crate::state::AppState;

// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.runtime.sessions().len().await,
        "started_at": state.started_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub persona_summary: String,
    pub model: String,
    pub has_knowledge_base: bool,
    pub tool_names: Vec<String>,
}

impl AgentSummary {
    fn new(id: String, def: &AgentDefinition) -> Self {
        Self {
            id,
            persona_summary: def.persona_summary().to_string(),
            model: def.model.clone(),
            has_knowledge_base: def.knowledge_base.is_some(),
            tool_names: def.tool_names().into_iter().map(str::to_string).collect(),
        }
    }
}

// GET /agents. Invalid definitions are left out.
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let mut agents = Vec::new();
    for status in state.store.list().await? {
        if !status.valid {
            warn!(agent_id = %status.id, error = status.error.as_deref().unwrap_or(""), "Skipping invalid definition");
            continue;
        }
        let def = state.store.get(&status.id).await?;
        agents.push(AgentSummary::new(status.id, &def));
    }
    Ok(Json(serde_json::json!({ "agents": agents })))
}

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub agent_id: String,
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

// POST /query
pub async fn query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryOutcome>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    info!(agent_id = %body.agent_id, session_id = body.session_id.as_deref(), "Query received");

    let outcome = state
        .runtime
        .query(&body.agent_id, &body.query, body.session_id.as_deref())
        .await?;
    Ok(Json(outcome))
}

// POST /agents/{id}/reload
pub async fn reload_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let def = state.store.load(&id, true).await?;
    info!(agent_id = %id, "Reloaded agent definition");
    Ok(Json(serde_json::json!({
        "status": "reloaded",
        "agent": AgentSummary::new(id, &def),
    })))
}

// DELETE /sessions/{id}
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.runtime.sessions().delete(&id).await {
        return Err(ApiError::SessionNotFound(id));
    }
    Ok(Json(serde_json::json!({ "status": "deleted", "session_id": id })))
}
