//! Code execution handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use super::ApiResponse;
use crate::api::middleware::AuthenticatedUser;
use crate::api::server::AppState;
use crate::error::{ClassroomError, Result};
use crate::models::{ExecutionRequest, Role};

#[derive(Debug, Deserialize, Default)]
pub struct ExecuteQuery {
    pub role: Option<String>,
}

/// Run a snippet and return its record
///
/// A run that fails inside the sandbox still answers `success: true`; the
/// record's status and error carry the failure.
pub async fn execute_code(
    State(state): State<AppState>,
    Query(query): Query<ExecuteQuery>,
    user: Option<AuthenticatedUser>,
    payload: std::result::Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(mut request) = payload.map_err(|e| {
        debug!(error = %e, "Rejected execution request body");
        ClassroomError::InvalidInput("Invalid request format".to_string())
    })?;

    let role = match user {
        Some(user) => {
            request.user_zcode = user.identity.id;
            user.identity.role
        }
        None => query
            .role
            .as_deref()
            .and_then(Role::from_str)
            .unwrap_or(Role::Student),
    };

    let record = state.executions.submit(request, role).await?;
    Ok(ApiResponse::ok(record))
}

/// Look up a previous run by id
pub async fn execution_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    if id.trim().is_empty() {
        return Err(ClassroomError::InvalidInput(
            "Execution ID is required".to_string(),
        ));
    }

    let record = state.executions.get_result(&id)?;
    Ok(ApiResponse::ok(record))
}
