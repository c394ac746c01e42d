use std::sync::Arc;

use chrono::{DateTime, Utc};

use flowhost_agent::{DefinitionStore, Runtime};

/// Shared application state for axum handlers.
pub struct AppState {
    pub runtime: Runtime,
    pub store: Arc<DefinitionStore>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(runtime: Runtime, store: Arc<DefinitionStore>) -> Self {
        Self {
            runtime,
            store,
            started_at: Utc::now(),
        }
    }
}
