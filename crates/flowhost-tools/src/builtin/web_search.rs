use futures::future::BoxFuture;
use serde_json::json;

use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::Capability;
use flowhost_core::types::{CapabilityInput, CapabilityOutput};

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Web search through the Tavily API.
pub struct SearchCapability {
    name: String,
    description: String,
    api_key: String,
    max_results: u64,
    http: reqwest::Client,
}

impl SearchCapability {
    pub fn new(name: &str, api_key: &str, http: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            description: "Search the web for current information. Returns relevant results with snippets."
                .to_string(),
            api_key: api_key.to_string(),
            max_results: 5,
            http,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_max_results(mut self, max_results: u64) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    fn failure(&self, message: impl Into<String>) -> FlowhostError {
        FlowhostError::CapabilityExecution {
            capability: self.name.clone(),
            message: message.into(),
        }
    }
}

/// Render Tavily `results` as markdown-ish blocks.
pub(crate) fn format_results(body: &serde_json::Value) -> String {
    let Some(results) = body["results"].as_array().filter(|r| !r.is_empty()) else {
        return "No results found.".to_string();
    };
    results
        .iter()
        .map(|r| {
            format!(
                "**{}**\n{}\nURL: {}",
                r["title"].as_str().unwrap_or(""),
                r["content"].as_str().unwrap_or(""),
                r["url"].as_str().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

impl Capability for SearchCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn timeout_secs(&self) -> u64 {
        20
    }

    fn invoke<'a>(
        &'a self,
        input: CapabilityInput,
        _ctx: &'a DelegationContext,
    ) -> BoxFuture<'a, Result<CapabilityOutput>> {
        Box::pin(async move {
            let query = input.latest().trim();
            if query.is_empty() {
                return Err(FlowhostError::CapabilityInput(format!("{}: empty query", self.name)));
            }

            let resp = self
                .http
                .post(TAVILY_SEARCH_URL)
                .json(&json!({
                    "api_key": self.api_key,
                    "query": query,
                    "max_results": self.max_results,
                }))
                .send()
                .await
                .map_err(|e| self.failure(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(self.failure(format!("HTTP {}", resp.status())));
            }

            let body: serde_json::Value = resp.json().await.map_err(|e| self.failure(e.to_string()))?;
            Ok(CapabilityOutput::Text(format_results(&body)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_results() {
        let body = json!({"results": [
            {"title": "Belem Tower", "content": "16th century fortification", "url": "https://example.org/belem"}
        ]});
        let text = format_results(&body);
        assert!(text.starts_with("**Belem Tower**"));
        assert!(text.contains("URL: https://example.org/belem"));

        assert_eq!(format_results(&json!({"results": []})), "No results found.");
    }
}
