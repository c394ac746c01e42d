use futures::future::BoxFuture;

use flowhost_core::delegation::DelegationContext;
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::Capability;
use flowhost_core::types::{CapabilityInput, CapabilityOutput};

/// Evaluates an arithmetic expression (`+ - * / ^ %`, parentheses, and
/// functions such as `sqrt`, `abs`, `max`). Reads the latest step, or the
/// query when called directly.
pub struct CalculatorCapability {
    name: String,
    description: String,
}

impl CalculatorCapability {
    pub fn new(name: &str, description: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            description: description
                .unwrap_or("Evaluate a mathematical expression and return the numeric result")
                .to_string(),
        }
    }
}

impl Default for CalculatorCapability {
    fn default() -> Self {
        Self::new("calculator", None)
    }
}

/// Integral results print without a fractional part.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

pub fn evaluate(expression: &str) -> std::result::Result<String, String> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Err("empty expression".to_string());
    }
    let value = meval::eval_str(expr).map_err(|e| e.to_string())?;
    if !value.is_finite() {
        return Err(format!("result is not finite: {value}"));
    }
    Ok(format_number(value))
}

impl Capability for CalculatorCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Expression to evaluate, e.g. (3 + 4) * 2" }
            },
            "required": ["query"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        5
    }

    fn invoke<'a>(
        &'a self,
        input: CapabilityInput,
        _ctx: &'a DelegationContext,
    ) -> BoxFuture<'a, Result<CapabilityOutput>> {
        Box::pin(async move {
            evaluate(input.latest())
                .map(CapabilityOutput::Text)
                .map_err(|message| FlowhostError::CapabilityExecution {
                    capability: self.name.clone(),
                    message,
                })
        })
    }
}
