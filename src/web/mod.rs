//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::query::QueryFacade;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub query: Arc<QueryFacade>,
}

/// Read-only JSON API over the recorded samples and rollups.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, query: Arc<QueryFacade>) -> Self {
        Self {
            state: AppState { config, query },
        }
    }

    /// Build the router with all routes.
    pub(crate) fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/health", get(handlers::handle_health))
            .route("/api/status", get(handlers::handle_status))
            .route("/api/samples", get(handlers::handle_get_samples))
            .route("/api/uptime", get(handlers::handle_get_uptime))
            .route("/api/rollups/daily", get(handlers::handle_get_daily_rollups))
            .route("/api/rollups/hourly", get(handlers::handle_get_hourly_rollups))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
