//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use super::ApiResponse;
use crate::api::server::AppState;
use crate::database::PoolStats;

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "online-classroom"
        })),
    )
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub sandbox: &'static str,
    pub sandbox_available: bool,
    pub connections: usize,
    pub classrooms: usize,
    pub executions: usize,
    pub auth_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditStatus>,
}

#[derive(Debug, Serialize)]
pub struct AuditStatus {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub pool: PoolStats,
}

/// Uptime and collaborator availability
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let audit = match &state.database {
        Some(db) => {
            let latency = match db.health_check().await {
                Ok(latency) => Some(latency.as_millis() as u64),
                Err(e) => {
                    warn!(error = %e, "Audit database health check failed");
                    None
                }
            };
            Some(AuditStatus {
                healthy: latency.is_some(),
                latency_ms: latency,
                pool: db.pool_stats(),
            })
        }
        None => None,
    };

    ApiResponse::ok(ServiceStatus {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        sandbox: state.executions.sandbox_name(),
        sandbox_available: state.executions.sandbox_available(),
        connections: state.hub.registry().stats().total_connections,
        classrooms: state.hub.classrooms().len(),
        executions: state.executions.record_count(),
        auth_enabled: state.config.auth_enabled,
        audit,
    })
}
