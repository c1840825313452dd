use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LectureId, Role};

/// One present participant in a classroom roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(rename = "zcode")]
    pub participant_id: String,
    pub name: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    /// Connection that owns this entry; a stale teardown must not remove a newer one
    #[serde(skip)]
    pub connection_id: u64,
}

/// A persisted chat message, as replayed to late joiners and echoed to senders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Presence view of one classroom
///
/// A lecture with no live classroom reports the empty shape: no roster,
/// no history and an online count of zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassroomSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lecture_id: Option<LectureId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_zcode: Option<String>,
    pub online_users: Vec<RosterEntry>,
    pub chat_messages: Vec<ChatMessage>,
    pub online_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Per-classroom line in the stats report
#[derive(Debug, Clone, Serialize)]
pub struct ClassroomSummary {
    pub lecture_id: LectureId,
    pub teacher_zcode: Option<String>,
    pub user_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Aggregate classroom statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassroomStats {
    pub total_classrooms: usize,
    pub total_users: usize,
    pub classrooms: Vec<ClassroomSummary>,
}

/// Aggregate connection statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub active_lectures: usize,
    pub lecture_stats: BTreeMap<String, usize>,
}
