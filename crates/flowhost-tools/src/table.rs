use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::Capability;
use flowhost_core::types::{CapabilityInput, CapabilityOutput, ToolDefinition};

/// Capabilities available to one agent, keyed by name.
///
/// Built fresh for every request and read-only once handed to a run.
#[derive(Clone, Default)]
pub struct CapabilityTable {
    caps: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Names are unique within a table.
    pub fn insert(&mut self, cap: Arc<dyn Capability>) -> Result<()> {
        let name = cap.name().to_string();
        if self.caps.contains_key(&name) {
            return Err(FlowhostError::InvalidDefinition(format!(
                "capability '{name}' registered twice"
            )));
        }
        self.caps.insert(name, cap);
        Ok(())
    }

    pub fn register(&mut self, cap: impl Capability) -> Result<()> {
        self.insert(Arc::new(cap))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.caps.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caps.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.caps.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Tool definitions offered to the model in the single-shot loop.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.caps
            .values()
            .map(|c| ToolDefinition {
                name: c.name().to_string(),
                description: c.description().to_string(),
                input_schema: c.input_schema(),
            })
            .collect()
    }

    /// Invoke a capability by name, bounded by its own timeout.
    pub async fn invoke(
        &self,
        name: &str,
        input: CapabilityInput,
        ctx: &DelegationContext,
    ) -> Result<CapabilityOutput> {
        let cap = self
            .get(name)
            .ok_or_else(|| FlowhostError::UnknownCapability(name.to_string()))?;

        let timeout_secs = cap.timeout_secs();
        debug!(capability = name, steps = input.steps.len(), timeout_secs, "Invoking capability");

        match tokio::time::timeout(Duration::from_secs(timeout_secs), cap.invoke(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(FlowhostError::CapabilityTimeout {
                capability: name.to_string(),
                timeout_secs,
            }),
        }
    }
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("capabilities", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use flowhost_test_utils::{FailingCapability, StaticCapability};

    use super::*;

    #[tokio::test]
    async fn test_invoke_passes_full_state() {
        let weather = Arc::new(StaticCapability::new("get_weather", "21C and sunny"));
        let mut table = CapabilityTable::new();
        table.insert(weather.clone()).unwrap();

        let input = CapabilityInput::new("Weather in Lisbon", vec!["Lisbon".into()]);
        let out = table
            .invoke("get_weather", input.clone(), &DelegationContext::default())
            .await
            .unwrap();

        assert_eq!(out, CapabilityOutput::Text("21C and sunny".into()));
        assert_eq!(weather.inputs(), vec![input]);
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let table = CapabilityTable::new();
        let err = table
            .invoke("missing", CapabilityInput::query("x"), &DelegationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowhostError::UnknownCapability(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let mut table = CapabilityTable::new();
        table.register(FailingCapability::new("order_lookup", "backend down")).unwrap();
        let err = table
            .invoke("order_lookup", CapabilityInput::query("x"), &DelegationContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "capability_error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mut table = CapabilityTable::new();
        table
            .register(
                StaticCapability::new("slow", "late")
                    .with_delay(Duration::from_secs(10))
                    .with_timeout_secs(1),
            )
            .unwrap();
        let err = table
            .invoke("slow", CapabilityInput::query("x"), &DelegationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowhostError::CapabilityTimeout { timeout_secs: 1, .. }));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut table = CapabilityTable::new();
        table.register(StaticCapability::new("search", "a")).unwrap();
        let err = table.register(StaticCapability::new("search", "b")).unwrap_err();
        assert!(err.is_definition_error());
        assert_eq!(table.names(), ["search"]);
    }
}
