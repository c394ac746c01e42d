use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use flowhost_agent::{DefinitionStore, Runtime};
use flowhost_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;

/// The HTTP API over a shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/agents", get(routes::list_agents))
        .route("/agents/{id}/reload", post(routes::reload_agent))
        .route("/query", post(routes::query))
        .route("/sessions/{id}", delete(routes::delete_session))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    runtime: Runtime,
    store: Arc<DefinitionStore>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, runtime: Runtime, store: Arc<DefinitionStore>) -> Self {
        Self { config, runtime, store }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState::new(self.runtime.clone(), self.store.clone()));
        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, agents_dir = %self.store.dir().display(), "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
