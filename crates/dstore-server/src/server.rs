use std::sync::Arc;

use dstore_store::ObjectStore;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::{build_router, AppState};

/// dstore HTTP server.
pub struct DstoreServer {
    config: ServerConfig,
    store: Arc<dyn ObjectStore>,
}

impl DstoreServer {
    /// Connect the configured store.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let store = config.store.connect()?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: ServerConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> ServerResult<axum::Router> {
        Ok(build_router(AppState::from_config(&self.config, self.store.clone())?))
    }

    /// Serve until ctrl-c. Running exports are cancelled on shutdown.
    pub async fn serve(self) -> ServerResult<()> {
        let state = AppState::from_config(&self.config, self.store.clone())?;
        let shutdown = state.shutdown.clone();
        let app = build_router(state);

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(
            addr = %self.config.bind_addr,
            collections = self.config.collections.len(),
            "dstore server listening"
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for shutdown signal");
                }
                tracing::info!("shutting down");
                shutdown.cancel();
            })
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_construction() {
        let server = DstoreServer::new(ServerConfig::default()).unwrap();
        assert_eq!(server.config().bind_addr, "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn router_builds() {
        let server = DstoreServer::new(ServerConfig::default()).unwrap();
        let _router = server.router().unwrap();
    }

    #[test]
    fn invalid_config_fails_router() {
        let mut config = ServerConfig::default();
        config.collections[1].prefix = "content".to_string();
        let server = DstoreServer::new(config).unwrap();
        assert!(server.router().is_err());
    }
}
