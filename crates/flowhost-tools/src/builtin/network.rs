use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::Capability;
use flowhost_core::types::{CapabilityInput, CapabilityOutput};

/// Remote capability behind an HTTP endpoint (`type: "mcp"` tools).
///
/// POSTs the `{input, steps}` payload as JSON with optional bearer auth.
/// JSON responses become structured output, anything else is text.
pub struct HttpEndpointCapability {
    name: String,
    description: String,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
    http: reqwest::Client,
}

impl HttpEndpointCapability {
    pub fn new(name: &str, endpoint: &str, http: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            description: format!("Tool for {name}"),
            endpoint: endpoint.to_string(),
            api_key: None,
            timeout_secs: 60,
            http,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<&str>) -> Self {
        self.api_key = api_key.map(str::to_string);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn failure(&self, message: impl Into<String>) -> FlowhostError {
        FlowhostError::CapabilityExecution {
            capability: self.name.clone(),
            message: message.into(),
        }
    }
}

/// Interpret a response body by content type.
pub(crate) fn decode_body(content_type: Option<&str>, body: String) -> CapabilityOutput {
    let is_json = content_type.is_some_and(|ct| ct.contains("json"));
    if is_json {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            return CapabilityOutput::Structured(value);
        }
    }
    CapabilityOutput::Text(body)
}

impl Capability for HttpEndpointCapability {
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
        _ctx: &'a DelegationContext,
    ) -> BoxFuture<'a, Result<CapabilityOutput>> {
        Box::pin(async move {
            let mut req = self
                .http
                .post(&self.endpoint)
                .timeout(Duration::from_secs(self.timeout_secs))
                .json(&input);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await.map_err(|e| self.failure(e.to_string()))?;
            let status = resp.status();
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = resp.text().await.map_err(|e| self.failure(e.to_string()))?;

            debug!(capability = %self.name, status = status.as_u16(), bytes = body.len(), "Endpoint responded");

            if !status.is_success() {
                return Err(self.failure(format!("HTTP {status}: {body}")));
            }
            Ok(decode_body(content_type.as_deref(), body))
        })
    }
}
