//! Knowledge base access.
//!
//! Retrieval itself happens in an external service; this module only knows
//! how to ask it for passages and how to present them as a capability.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

pub use flowhost_core::definition::KNOWLEDGE_CAPABILITY;
use flowhost_core::definition::{KnowledgeBackendConfig, KnowledgeBaseConfig, KnowledgeKind};
use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::{Capability, KnowledgeSource};
use flowhost_core::types::{CapabilityInput, CapabilityOutput};

/// Queries a retrieval service at the configured URI.
///
/// Vector stores receive `{query, k, index_name}`; graph stores receive the
/// rendered `query_template` (with `{query}` substituted) and optional
/// basic-auth credentials from `auth.username` / `auth.password`.
pub struct HttpKnowledgeSource {
    kind: KnowledgeKind,
    config: KnowledgeBackendConfig,
    http: reqwest::Client,
}

impl HttpKnowledgeSource {
    pub fn new(kb: &KnowledgeBaseConfig, http: reqwest::Client) -> Self {
        Self {
            kind: kb.kind,
            config: kb.config.clone(),
            http,
        }
    }

    fn request_body(&self, query: &str) -> serde_json::Value {
        match self.kind {
            KnowledgeKind::Vectordb => serde_json::json!({
                "query": query,
                "k": self.config.k,
                "index_name": self.config.index_name,
            }),
            KnowledgeKind::Graph => {
                let rendered = self
                    .config
                    .query_template
                    .as_deref()
                    .map(|t| t.replace("{query}", query))
                    .unwrap_or_else(|| query.to_string());
                serde_json::json!({ "query": rendered, "k": self.config.k })
            }
        }
    }

    fn failure(&self, message: impl Into<String>) -> FlowhostError {
        FlowhostError::CapabilityExecution {
            capability: KNOWLEDGE_CAPABILITY.to_string(),
            message: message.into(),
        }
    }
}

/// Accepts `{"results": [...]}` or a bare array; items are strings or
/// objects with `text`, `content`, or `page_content`.
pub(crate) fn extract_passages(body: &serde_json::Value, k: usize) -> Vec<String> {
    let items = body
        .get("results")
        .and_then(|r| r.as_array())
        .or_else(|| body.as_array());

    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(obj) => ["text", "content", "page_content"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
                .map(str::to_string),
            _ => None,
        })
        .take(k)
        .collect()
}

impl KnowledgeSource for HttpKnowledgeSource {
    fn kind(&self) -> &str {
        self.kind.as_str()
    }

    fn retrieve<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let mut req = self.http.post(&self.config.uri).json(&self.request_body(query));
            if let Some(auth) = &self.config.auth {
                if let Some(user) = auth.get("username") {
                    req = req.basic_auth(user, auth.get("password"));
                }
            }

            let resp = req.send().await.map_err(|e| self.failure(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(self.failure(format!("HTTP {}", resp.status())));
            }
            let body: serde_json::Value = resp.json().await.map_err(|e| self.failure(e.to_string()))?;
            let passages = extract_passages(&body, self.config.k);
            debug!(kind = self.kind.as_str(), passages = passages.len(), "Knowledge retrieved");
            Ok(passages)
        })
    }
}

/// Exposes a [`KnowledgeSource`] as the `knowledge_base` capability.
pub struct KnowledgeCapability {
    source: Arc<dyn KnowledgeSource>,
    description: String,
}

impl KnowledgeCapability {
    pub fn new(source: Arc<dyn KnowledgeSource>) -> Self {
        let description = match source.kind() {
            "graph" => "Answer questions about relationships between entities from the graph knowledge base",
            _ => "Look up passages from the agent's knowledge base relevant to a question",
        }
        .to_string();
        Self { source, description }
    }
}

impl Capability for KnowledgeCapability {
    fn name(&self) -> &str {
        KNOWLEDGE_CAPABILITY
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn invoke<'a>(
        &'a self,
        input: CapabilityInput,
        _ctx: &'a DelegationContext,
    ) -> BoxFuture<'a, Result<CapabilityOutput>> {
        Box::pin(async move {
            let passages = self.source.retrieve(input.latest()).await?;
            if passages.is_empty() {
                return Ok(CapabilityOutput::Text("No relevant knowledge found.".to_string()));
            }
            Ok(CapabilityOutput::Text(passages.join("\n\n")))
        })
    }
}
