mod handlers;
mod router;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::config::EnvConfig;
use crate::core::db::Backend;
use crate::core::recorder::{ArtifactStore, RunStore};
use crate::core::storage::ObjectStore;

pub use router::build_api_router;

/// Shared state for the worker API. Stores are trait objects so tests drive
/// the router with in-memory fakes instead of live backends.
#[derive(Clone)]
pub struct AppState {
    pub(crate) runs: Arc<dyn RunStore>,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
}

impl AppState {
    pub fn new(runs: Arc<dyn RunStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { runs, artifacts }
    }

    pub fn from_config(cfg: &EnvConfig) -> Result<Self> {
        let backend = Backend::from_config(cfg)?;
        let store = ObjectStore::from_config(cfg)?;
        Ok(Self::new(Arc::new(backend), Arc::new(store)))
    }
}

/// The worker API server: liveness on `/`, the tracked smoke action on
/// `/smoke`.
pub struct ApiServer {
    host: String,
    port: u16,
    state: AppState,
}

impl ApiServer {
    pub fn new(host: String, port: u16, state: AppState) -> Self {
        Self { host, port, state }
    }

    pub async fn serve(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("worker API listening on http://{}", addr);
        let app = build_api_router(self.state);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
