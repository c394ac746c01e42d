use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::Capability;
use flowhost_core::types::{CapabilityInput, CapabilityOutput};

/// Capability returning a fixed output and recording every input.
pub struct StaticCapability {
    name: String,
    output: CapabilityOutput,
    delay: Option<Duration>,
    timeout_secs: u64,
    inputs: Mutex<Vec<CapabilityInput>>,
}

impl StaticCapability {
    pub fn new(name: &str, output: impl Into<CapabilityOutput>) -> Self {
        Self {
            name: name.to_string(),
            output: output.into(),
            delay: None,
            timeout_secs: 30,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn structured(name: &str, value: serde_json::Value) -> Self {
        Self::new(name, CapabilityOutput::Structured(value))
    }

    /// Sleep before answering (for timeout and cancellation tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn inputs(&self) -> Vec<CapabilityInput> {
        self.inputs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Capability for StaticCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Static test capability"
    }

    fn invoke<'a>(
        &'a self,
        input: CapabilityInput,
        _ctx: &'a DelegationContext,
    ) -> BoxFuture<'a, Result<CapabilityOutput>> {
        Box::pin(async move {
            self.inputs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(input);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.output.clone())
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

/// Capability that always fails with `CapabilityExecution`.
pub struct FailingCapability {
    name: String,
    message: String,
}

impl FailingCapability {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

impl Capability for FailingCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn invoke<'a>(
        &'a self,
        _input: CapabilityInput,
        _ctx: &'a DelegationContext,
    ) -> BoxFuture<'a, Result<CapabilityOutput>> {
        Box::pin(async move {
            Err(FlowhostError::CapabilityExecution {
                capability: self.name.clone(),
                message: self.message.clone(),
            })
        })
    }
}
