use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::LectureId;

/// Execution lifecycle; terminal states are final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Code-run request as submitted over HTTP
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    pub lecture_id: LectureId,
    pub user_zcode: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub document_key: Option<String>,
}

/// Tracked result of one sandboxed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub lecture_id: LectureId,
    pub user_zcode: String,
    pub code: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_key: Option<String>,
    pub status: ExecutionStatus,
    /// stdout, with stderr appended after a separator marker
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub exit_code: i32,
    pub duration_ms: i64,
    pub executed_at: DateTime<Utc>,
}

/// Row shape of the execution audit table
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionAuditRow {
    pub id: String,
    pub lecture_id: i64,
    pub user_zcode: String,
    pub language: String,
    pub status: String,
    pub exit_code: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl From<&ExecutionRecord> for ExecutionAuditRow {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            id: record.id.clone(),
            lecture_id: record.lecture_id as i64,
            user_zcode: record.user_zcode.clone(),
            language: record.language.clone(),
            status: record.status.as_str().to_string(),
            exit_code: record.exit_code,
            duration_ms: record.duration_ms,
            error: record.error.clone(),
            executed_at: record.executed_at,
        }
    }
}
