use serde::{Deserialize, Serialize};

use super::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

/// State threaded through one flow run.
///
/// `steps` is append-only and ordered by execution: `steps[i]` is the value
/// produced by the i-th executed non-condition node. Condition nodes move
/// the cursor but never append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    pub input: String,
    pub steps: Vec<String>,
    pub current_index: Option<usize>,
    pub current_name: Option<String>,
    pub status: FlowStatus,
    /// Every node executed, condition nodes included, in order.
    pub path: Vec<String>,
}

impl FlowState {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            steps: Vec::new(),
            current_index: None,
            current_name: None,
            status: FlowStatus::NotStarted,
            path: Vec::new(),
        }
    }

    /// Step at `index`, negative counting from the end.
    pub fn step(&self, index: i64) -> Option<&str> {
        template::resolve_index(self.steps.len(), index).map(|i| self.steps[i].as_str())
    }

    pub fn last_step(&self) -> Option<&str> {
        self.steps.last().map(String::as_str)
    }

    pub(crate) fn enter(&mut self, index: usize, name: &str) {
        self.status = FlowStatus::Running;
        self.current_index = Some(index);
        self.current_name = Some(name.to_string());
        self.path.push(name.to_string());
    }

    pub(crate) fn push_step(&mut self, value: String) -> usize {
        self.steps.push(value);
        self.steps.len() - 1
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
