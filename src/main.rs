//! Online Classroom Server - Entry Point
//!
//! Starts the API server and background services with graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use online_classroom::api::{ApiServer, AppState};
use online_classroom::config::{Config, LogConfig};
use online_classroom::execution::{DockerSandbox, ExecutionQuota, ExecutionService};
use online_classroom::realtime::{ClassroomManager, SessionHub, SessionRegistry};
use online_classroom::repository::ExecutionRepository;
use online_classroom::services::{QuotaCleanupConfig, QuotaCleanupHandle, QuotaCleanupService};
use online_classroom::{Database, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Online Classroom server");

    // Optional audit trail
    let database = if config.database.audit_enabled {
        let db = Database::new(&config).await?;
        db.run_migrations().await?;
        info!("Execution audit enabled");
        Some(db)
    } else {
        None
    };

    // Execution service
    let sandbox = Arc::new(DockerSandbox::new(&config.sandbox));
    let mut executions = ExecutionService::new(sandbox, ExecutionQuota::from_config(&config.sandbox));
    if let Some(db) = &database {
        executions = executions.with_audit(Arc::new(ExecutionRepository::new(db.pool().clone())));
    }
    let executions = Arc::new(executions);

    match executions.check_sandbox().await {
        Ok(()) => info!(image = %config.sandbox.image, "Sandbox runtime available"),
        Err(e) => warn!(error = %e, "Sandbox runtime unavailable, executions will fail until it is"),
    }

    // Real-time hub
    let hub = SessionHub::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(ClassroomManager::new()),
        config.realtime.clone(),
    );

    // Start quota sweeper
    let (sweeper_handle, sweeper_shutdown) = QuotaCleanupHandle::new();
    let sweeper = QuotaCleanupService::new(executions.clone(), QuotaCleanupConfig::default());
    let sweeper_task = tokio::spawn(async move {
        sweeper.run(sweeper_shutdown).await;
    });

    // Start API server
    let (shutdown_tx, api_shutdown) = watch::channel(false);
    let mut state = AppState::new(config.api.clone(), hub, executions)?;
    if let Some(db) = &database {
        state = state.with_database(db.clone());
    }
    let api_server = ApiServer::new(state);
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("Server started - API: {}", config.api_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    sweeper_handle.shutdown();

    let _ = tokio::join!(api_task, sweeper_task);

    if let Some(db) = database {
        db.close().await;
    }

    info!("Online Classroom server stopped");
    Ok(())
}

/// Install the global subscriber; `RUST_LOG` overrides `LOG_LEVEL`
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("online_classroom={},tower_http=debug", log.level).into()
    });

    if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
