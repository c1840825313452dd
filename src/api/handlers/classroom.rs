//! Classroom handlers
//!
//! Join resolves a participant's role and hands back the socket URL; state and
//! stats expose the in-memory presence view.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::ApiResponse;
use crate::api::middleware::AuthenticatedUser;
use crate::api::server::AppState;
use crate::error::{ClassroomError, Result};
use crate::models::{ClassroomStats, LectureId, RegistryStats, Role};

#[derive(Debug, Deserialize)]
pub struct JoinClassroomRequest {
    pub lecture_id: LectureId,
    pub zcode: String,
    pub lecturer_zcode: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinClassroomResponse {
    pub lecture_id: LectureId,
    pub user_zcode: String,
    pub user_name: String,
    pub user_role: Role,
    pub websocket_url: String,
    pub message: &'static str,
}

/// Resolve role and display name, and build the classroom socket URL
pub async fn join_classroom(
    State(state): State<AppState>,
    user: Option<AuthenticatedUser>,
    payload: std::result::Result<Json<JoinClassroomRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(mut req) = payload.map_err(|e| {
        debug!(error = %e, "Rejected join request body");
        invalid_parameters()
    })?;

    if let Some(user) = user {
        req.zcode = user.identity.id;
    }
    if req.lecture_id == 0 || req.zcode.trim().is_empty() || req.lecturer_zcode.trim().is_empty() {
        return Err(invalid_parameters());
    }

    let name = match req.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => req.zcode.clone(),
    };
    let role = if req.zcode == req.lecturer_zcode {
        Role::Teacher
    } else {
        Role::Student
    };

    let websocket_url = classroom_socket_url(
        &state.config.public_ws_url,
        req.lecture_id,
        &req.zcode,
        role,
        &name,
    )?;

    info!(lecture_id = req.lecture_id, participant = %req.zcode, %role, "Classroom join prepared");

    Ok(ApiResponse::ok(JoinClassroomResponse {
        lecture_id: req.lecture_id,
        user_zcode: req.zcode,
        user_name: name,
        user_role: role,
        websocket_url: websocket_url.to_string(),
        message: "Ready to join classroom",
    }))
}

/// `{base}/ws/classroom/{lecture_id}?zcode=&role=&name=`
pub fn classroom_socket_url(
    base: &Url,
    lecture_id: LectureId,
    zcode: &str,
    role: Role,
    name: &str,
) -> Result<Url> {
    let mut url = base.clone();
    let lecture = lecture_id.to_string();
    url.path_segments_mut()
        .map_err(|_| ClassroomError::InvalidConfig("PUBLIC_WS_URL cannot be a base URL".into()))?
        .pop_if_empty()
        .extend(["ws", "classroom", lecture.as_str()]);
    url.query_pairs_mut()
        .append_pair("zcode", zcode)
        .append_pair("role", role.as_str())
        .append_pair("name", name);
    Ok(url)
}

fn invalid_parameters() -> ClassroomError {
    ClassroomError::InvalidInput("Invalid request parameters".to_string())
}

#[derive(Debug, Deserialize, Default)]
pub struct ClassroomStateQuery {
    pub zcode: Option<String>,
}

/// Roster, chat history and online count of one lecture
pub async fn classroom_state(
    State(state): State<AppState>,
    lecture_id: std::result::Result<Path<LectureId>, PathRejection>,
    Query(query): Query<ClassroomStateQuery>,
) -> Result<impl IntoResponse> {
    let Path(lecture_id) =
        lecture_id.map_err(|_| ClassroomError::InvalidInput("Invalid lecture ID".to_string()))?;

    if query.zcode.as_deref().map_or(true, |z| z.trim().is_empty()) {
        return Err(ClassroomError::InvalidInput(
            "Missing zcode parameter".to_string(),
        ));
    }

    Ok(ApiResponse::ok(state.hub.classrooms().snapshot(lecture_id)))
}

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub websocket: RegistryStats,
    pub classroom: ClassroomStats,
    pub timestamp: DateTime<Utc>,
}

/// Process-wide connection and classroom counts
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::ok(StatsReport {
        websocket: state.hub.registry().stats(),
        classroom: state.hub.classrooms().stats(),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::{call, get, post_json, router, state, state_with};
    use super::*;
    use crate::execution::service::testing::FakeSandbox;
    use crate::execution::ExecutionQuota;
    use crate::models::{RosterEntry, UserIdentity};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_join_resolves_teacher_role() {
        let state = state();
        let (status, body) = call(
            router(&state),
            post_json(
                "/api/classroom/join",
                json!({"lecture_id": 3, "zcode": "t1", "lecturer_zcode": "t1", "name": "Ada"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user_role"], "teacher");
        assert_eq!(body["data"]["user_name"], "Ada");
        assert_eq!(
            body["data"]["websocket_url"],
            "ws://localhost:8081/ws/classroom/3?zcode=t1&role=teacher&name=Ada"
        );
    }

    #[tokio::test]
    async fn test_join_defaults_name_and_student_role() {
        let state = state();
        let (status, body) = call(
            router(&state),
            post_json(
                "/api/classroom/join",
                json!({"lecture_id": 3, "zcode": "s1", "lecturer_zcode": "t1"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user_role"], "student");
        assert_eq!(body["data"]["user_name"], "s1");
        assert_eq!(body["data"]["message"], "Ready to join classroom");
    }

    #[tokio::test]
    async fn test_join_rejects_missing_fields() {
        let state = state();
        let (status, body) = call(
            router(&state),
            post_json("/api/classroom/join", json!({"lecture_id": 3, "zcode": "s1"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Invalid input: Invalid request parameters");
    }

    #[tokio::test]
    async fn test_join_requires_token_when_auth_enabled() {
        let state = state_with(
            true,
            Arc::new(FakeSandbox::completing("", 0)),
            ExecutionQuota::unlimited(),
        );
        let body = json!({"lecture_id": 3, "zcode": "t1", "lecturer_zcode": "t1"});

        let (status, _) = call(router(&state), post_json("/api/classroom/join", body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // The token's subject replaces the body's zcode
        let token = state
            .jwt_auth
            .generate_token(&UserIdentity::student("s9"), 1)
            .unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/api/classroom/join")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, body) = call(router(&state), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user_zcode"], "s9");
        assert_eq!(body["data"]["user_role"], "student");
    }

    #[test]
    fn test_socket_url_keeps_base_path_and_encodes_query() {
        let base = Url::parse("wss://classroom.example/realtime").unwrap();
        let url = classroom_socket_url(&base, 12, "s1", Role::Student, "Sam Lee").unwrap();

        assert_eq!(
            url.as_str(),
            "wss://classroom.example/realtime/ws/classroom/12?zcode=s1&role=student&name=Sam+Lee"
        );
    }

    #[tokio::test]
    async fn test_state_requires_zcode() {
        let state = state();
        let (status, body) = call(router(&state), get("/api/classroom/3/state")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid input: Missing zcode parameter");
    }

    #[tokio::test]
    async fn test_state_rejects_bad_lecture_id() {
        let state = state();
        let (status, body) = call(router(&state), get("/api/classroom/abc/state?zcode=s1")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid input: Invalid lecture ID");
    }

    #[tokio::test]
    async fn test_state_of_unknown_lecture_is_empty() {
        let state = state();
        let (status, body) = call(router(&state), get("/api/classroom/99/state?zcode=s1")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"],
            json!({"online_users": [], "chat_messages": [], "online_count": 0})
        );
        assert!(state.hub.classrooms().get(99).is_none());
    }

    #[tokio::test]
    async fn test_state_and_stats_reflect_presence() {
        let state = state();
        state.hub.classrooms().join(
            3,
            RosterEntry {
                participant_id: "t1".to_string(),
                name: "T".to_string(),
                role: Role::Teacher,
                joined_at: Utc::now(),
                connection_id: 1,
            },
        );
        state.hub.classrooms().append_chat(3, "t1", "welcome").unwrap();

        let (_, body) = call(router(&state), get("/api/classroom/3/state?zcode=s1")).await;
        assert_eq!(body["data"]["lecture_id"], 3);
        assert_eq!(body["data"]["teacher_zcode"], "t1");
        assert_eq!(body["data"]["online_count"], 1);
        assert_eq!(body["data"]["chat_messages"][0]["content"], "welcome");

        let (status, body) = call(router(&state), get("/api/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["classroom"]["total_classrooms"], 1);
        assert_eq!(body["data"]["classroom"]["total_users"], 1);
        assert_eq!(body["data"]["websocket"]["total_connections"], 0);
        assert!(body["data"]["timestamp"].is_string());
    }
}
