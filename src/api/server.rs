//! API server using Axum
//!
//! Serves the classroom REST endpoints and the classroom WebSocket upgrade.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::database::Database;
use crate::error::{ClassroomError, Result};
use crate::execution::ExecutionService;
use crate::realtime::SessionHub;

use super::middleware::{cors_layer, JwtAuth, RequestLogging};
use super::routes;

/// Upper bound on one HTTP request; longer than the most generous sandbox limit
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ApiServerConfig,
    pub hub: SessionHub,
    pub executions: Arc<ExecutionService>,
    pub jwt_auth: JwtAuth,
    pub started_at: Instant,
    /// Audit database, when auditing is enabled
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        config: ApiServerConfig,
        hub: SessionHub,
        executions: Arc<ExecutionService>,
    ) -> Result<Self> {
        let jwt_auth = JwtAuth::new(&config.jwt_secret)?;

        Ok(Self {
            config,
            hub,
            executions,
            jwt_auth,
            started_at: Instant::now(),
            database: None,
        })
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}

/// API server
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with CORS, tracing, timeout and request logging
    pub fn build_router(&self) -> Router {
        let cors = cors_layer(&self.state.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(axum::middleware::from_fn(RequestLogging::log_request))
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.state.config.host, self.state.config.port)
            .parse()
            .map_err(|e| ClassroomError::InvalidConfig(format!("invalid API address: {}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    ///
    /// On shutdown every live classroom connection is closed before the
    /// server drains.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let router = self.build_router();
        let registry = self.state.hub.registry().clone();

        info!("API server listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
                let closed = registry.close_all();
                info!(connections = closed, "Closed classroom connections");
            })
            .await
            .map_err(|e| ClassroomError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
