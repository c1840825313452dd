//! Classroom WebSocket upgrade
//!
//! Identity comes from the `zcode`/`role`/`name` query, or from a `token`
//! query parameter when authentication is enabled (browsers cannot set an
//! Authorization header on a socket upgrade).

use axum::extract::rejection::PathRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::error::{ClassroomError, Result};
use crate::models::{LectureId, Role, UserIdentity};
use crate::realtime::JoinParams;

#[derive(Debug, Deserialize, Default)]
pub struct ClassroomWsQuery {
    pub zcode: Option<String>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub token: Option<String>,
}

/// Validate the join and hand the socket to the session hub
pub async fn classroom_ws(
    State(state): State<AppState>,
    lecture_id: std::result::Result<Path<LectureId>, PathRejection>,
    Query(query): Query<ClassroomWsQuery>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let lecture_id = match lecture_id {
        Ok(Path(id)) => id,
        Err(_) => {
            return ClassroomError::InvalidInput("Invalid lecture ID".to_string()).into_response()
        }
    };

    let params = match join_params(&state, lecture_id, query) {
        Ok(params) => params,
        Err(e) => {
            warn!(lecture_id, error = %e, "Rejected classroom socket");
            return e.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(lecture_id, error = %rejection, "Not a WebSocket upgrade");
            return rejection.into_response();
        }
    };

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| hub.run(socket, params))
}

/// Resolve who is joining which lecture
pub fn join_params(
    state: &AppState,
    lecture_id: LectureId,
    query: ClassroomWsQuery,
) -> Result<JoinParams> {
    let identity = if state.config.auth_enabled {
        let token = query
            .token
            .as_deref()
            .ok_or_else(|| ClassroomError::Unauthorized("Missing token parameter".to_string()))?;
        state.jwt_auth.validate_token(token)?.identity()
    } else {
        let zcode = non_empty(query.zcode.as_deref());
        let role = non_empty(query.role.as_deref());
        let (Some(zcode), Some(role)) = (zcode, role) else {
            return Err(ClassroomError::InvalidInput(
                "Missing zcode or role parameter".to_string(),
            ));
        };
        let role = Role::from_str(role)
            .ok_or_else(|| ClassroomError::InvalidInput(format!("Invalid role: {}", role)))?;
        UserIdentity::new(zcode, role)
    };

    let name = non_empty(query.name.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| identity.id.clone());

    Ok(JoinParams {
        lecture_id,
        identity,
        name,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
