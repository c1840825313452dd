//! Per-lecture presence roster and chat history
//!
//! Roster and chat for one classroom sit behind that classroom's own mutex;
//! creation and deletion go through the manager's entry lock so a join can
//! never land in a classroom that is being garbage-collected.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::connection::ConnectionId;
use crate::error::{ClassroomError, Result};
use crate::models::{
    ChatMessage, ClassroomSnapshot, ClassroomStats, ClassroomSummary, LectureId, RosterEntry,
};

/// Chat messages retained per classroom; oldest are evicted first
pub const CHAT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Default)]
struct ClassroomInner {
    owner: Option<String>,
    roster: HashMap<String, RosterEntry>,
    chat: VecDeque<ChatMessage>,
}

/// Live presence and chat state of one lecture
#[derive(Debug)]
pub struct Classroom {
    lecture_id: LectureId,
    created_at: DateTime<Utc>,
    inner: Mutex<ClassroomInner>,
}

impl Classroom {
    pub fn new(lecture_id: LectureId, owner: Option<String>) -> Self {
        Self {
            lecture_id,
            created_at: Utc::now(),
            inner: Mutex::new(ClassroomInner {
                owner,
                ..Default::default()
            }),
        }
    }

    pub fn lecture_id(&self) -> LectureId {
        self.lecture_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn owner(&self) -> Option<String> {
        self.inner.lock().owner.clone()
    }

    /// Add or refresh a participant; the first teacher to join claims ownership
    pub fn add_participant(&self, entry: RosterEntry) {
        let mut inner = self.inner.lock();
        if entry.role.is_teacher() && inner.owner.is_none() {
            inner.owner = Some(entry.participant_id.clone());
        }
        inner.roster.insert(entry.participant_id.clone(), entry);
    }

    /// Remove a participant's entry if it still belongs to `connection_id`
    ///
    /// Returns `None` when a newer connection owns the entry (or there is
    /// none), otherwise whether the roster is now empty.
    pub fn remove_participant(&self, participant: &str, connection_id: ConnectionId) -> Option<bool> {
        let mut inner = self.inner.lock();
        match inner.roster.get(participant) {
            Some(entry) if entry.connection_id == connection_id => {
                inner.roster.remove(participant);
                Some(inner.roster.is_empty())
            }
            _ => None,
        }
    }

    pub fn participant_count(&self) -> usize {
        self.inner.lock().roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().roster.is_empty()
    }

    /// Append a chat message, assigning its id and timestamp
    pub fn append_chat(&self, sender: &str, text: &str) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender.to_string(),
            content: text.to_string(),
            created_at: Utc::now(),
        };

        let mut inner = self.inner.lock();
        inner.chat.push_back(message.clone());
        while inner.chat.len() > CHAT_HISTORY_LIMIT {
            inner.chat.pop_front();
        }

        message
    }

    /// Roster sorted by join time, oldest first
    pub fn roster(&self) -> Vec<RosterEntry> {
        let inner = self.inner.lock();
        sorted_roster(&inner.roster)
    }

    pub fn snapshot(&self) -> ClassroomSnapshot {
        let inner = self.inner.lock();
        let online_users = sorted_roster(&inner.roster);

        ClassroomSnapshot {
            lecture_id: Some(self.lecture_id),
            teacher_zcode: inner.owner.clone(),
            online_count: online_users.len(),
            online_users,
            chat_messages: inner.chat.iter().cloned().collect(),
            created_at: Some(self.created_at),
        }
    }

    fn summary(&self) -> ClassroomSummary {
        let inner = self.inner.lock();
        ClassroomSummary {
            lecture_id: self.lecture_id,
            teacher_zcode: inner.owner.clone(),
            user_count: inner.roster.len(),
            created_at: self.created_at,
        }
    }
}

fn sorted_roster(roster: &HashMap<String, RosterEntry>) -> Vec<RosterEntry> {
    let mut entries: Vec<RosterEntry> = roster.values().cloned().collect();
    entries.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.participant_id.cmp(&b.participant_id))
    });
    entries
}

/// What a roster removal did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The entry belongs to a newer connection, or is already gone
    Superseded,
    Left,
    /// The last participant left and the classroom was deleted
    Deleted,
}

/// Owns every live classroom, keyed by lecture
#[derive(Debug, Default)]
pub struct ClassroomManager {
    classrooms: DashMap<LectureId, Arc<Classroom>>,
}

impl ClassroomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the classroom, creating it on first access
    pub fn get_or_create(&self, lecture_id: LectureId, owner: Option<&str>) -> Arc<Classroom> {
        self.classrooms
            .entry(lecture_id)
            .or_insert_with(|| {
                info!(lecture_id, owner = ?owner, "Created classroom");
                Arc::new(Classroom::new(lecture_id, owner.map(str::to_string)))
            })
            .clone()
    }

    pub fn get(&self, lecture_id: LectureId) -> Option<Arc<Classroom>> {
        self.classrooms.get(&lecture_id).map(|c| c.clone())
    }

    /// Add a participant, creating the classroom if needed
    ///
    /// Runs under the lecture's entry lock so it cannot race a concurrent
    /// deletion of the same classroom.
    pub fn join(&self, lecture_id: LectureId, entry: RosterEntry) -> Arc<Classroom> {
        let slot = self.classrooms.entry(lecture_id).or_insert_with(|| {
            info!(lecture_id, "Created classroom");
            Arc::new(Classroom::new(lecture_id, None))
        });
        slot.add_participant(entry);
        slot.clone()
    }

    /// Remove the participant entry owned by `connection_id`; deletes the
    /// classroom when its roster empties
    pub fn leave(
        &self,
        lecture_id: LectureId,
        participant: &str,
        connection_id: ConnectionId,
    ) -> LeaveOutcome {
        match self.classrooms.entry(lecture_id) {
            Entry::Occupied(slot) => match slot.get().remove_participant(participant, connection_id) {
                Some(true) => {
                    slot.remove();
                    info!(lecture_id, "Deleted empty classroom");
                    LeaveOutcome::Deleted
                }
                Some(false) => LeaveOutcome::Left,
                None => {
                    debug!(
                        lecture_id,
                        participant, connection_id, "Roster entry owned by a newer connection"
                    );
                    LeaveOutcome::Superseded
                }
            },
            Entry::Vacant(_) => {
                debug!(lecture_id, participant, "Leave for unknown classroom");
                LeaveOutcome::Superseded
            }
        }
    }

    /// Persist a chat message into a live classroom
    pub fn append_chat(&self, lecture_id: LectureId, sender: &str, text: &str) -> Result<ChatMessage> {
        let classroom = self
            .get(lecture_id)
            .ok_or_else(|| ClassroomError::NotFound(format!("classroom for lecture {}", lecture_id)))?;
        Ok(classroom.append_chat(sender, text))
    }

    /// Presence view; the empty shape when no classroom is live
    pub fn snapshot(&self, lecture_id: LectureId) -> ClassroomSnapshot {
        self.get(lecture_id)
            .map(|classroom| classroom.snapshot())
            .unwrap_or_default()
    }

    pub fn roster(&self, lecture_id: LectureId) -> Vec<RosterEntry> {
        self.get(lecture_id)
            .map(|classroom| classroom.roster())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> ClassroomStats {
        let mut classrooms: Vec<ClassroomSummary> =
            self.classrooms.iter().map(|c| c.summary()).collect();
        classrooms.sort_by_key(|c| c.lecture_id);

        ClassroomStats {
            total_classrooms: classrooms.len(),
            total_users: classrooms.iter().map(|c| c.user_count).sum(),
            classrooms,
        }
    }

    pub fn len(&self) -> usize {
        self.classrooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classrooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn entry(id: &str, role: Role) -> RosterEntry {
        owned_entry(id, role, 1)
    }

    fn owned_entry(id: &str, role: Role, connection_id: ConnectionId) -> RosterEntry {
        RosterEntry {
            participant_id: id.to_string(),
            name: id.to_uppercase(),
            role,
            joined_at: Utc::now(),
            connection_id,
        }
    }

    #[test]
    fn test_chat_history_is_capped_fifo() {
        let classroom = Classroom::new(1, Some("t1".to_string()));

        let first = classroom.append_chat("t1", "message 0");
        for i in 1..=CHAT_HISTORY_LIMIT {
            classroom.append_chat("t1", &format!("message {}", i));
        }

        let snapshot = classroom.snapshot();
        assert_eq!(snapshot.chat_messages.len(), CHAT_HISTORY_LIMIT);
        assert!(snapshot.chat_messages.iter().all(|m| m.id != first.id));
        assert_eq!(snapshot.chat_messages[0].content, "message 1");
        assert_eq!(
            snapshot.chat_messages.last().unwrap().content,
            format!("message {}", CHAT_HISTORY_LIMIT)
        );
    }

    #[test]
    fn test_chat_ids_are_unique() {
        let classroom = Classroom::new(1, None);
        let a = classroom.append_chat("s1", "a");
        let b = classroom.append_chat("s1", "a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_first_teacher_claims_ownership() {
        let manager = ClassroomManager::new();

        manager.join(2, entry("s1", Role::Student));
        assert_eq!(manager.get(2).unwrap().owner(), None);

        manager.join(2, entry("t1", Role::Teacher));
        manager.join(2, entry("t2", Role::Teacher));
        assert_eq!(manager.get(2).unwrap().owner().as_deref(), Some("t1"));
    }

    #[test]
    fn test_last_leave_deletes_classroom() {
        let manager = ClassroomManager::new();
        manager.join(5, entry("t1", Role::Teacher));
        manager.join(5, entry("s1", Role::Student));

        assert_eq!(manager.leave(5, "t1", 1), LeaveOutcome::Left);
        assert!(manager.get(5).is_some());
        assert_eq!(manager.leave(5, "s1", 1), LeaveOutcome::Deleted);
        assert!(manager.get(5).is_none());

        let snapshot = manager.snapshot(5);
        assert_eq!(snapshot.online_count, 0);
        assert!(snapshot.lecture_id.is_none());

        // A fresh access creates a new classroom with no owner or history
        let fresh = manager.get_or_create(5, None);
        assert_eq!(fresh.owner(), None);
        assert!(fresh.snapshot().chat_messages.is_empty());
    }

    #[test]
    fn test_rejoin_refreshes_entry_without_duplicating() {
        let manager = ClassroomManager::new();
        manager.join(1, entry("s1", Role::Student));
        manager.join(1, entry("s1", Role::Student));
        assert_eq!(manager.get(1).unwrap().participant_count(), 1);
    }

    #[test]
    fn test_stale_leave_keeps_newer_entry() {
        let manager = ClassroomManager::new();
        manager.join(6, owned_entry("s1", Role::Student, 1));
        manager.join(6, owned_entry("s1", Role::Student, 2));

        assert_eq!(manager.leave(6, "s1", 1), LeaveOutcome::Superseded);
        let classroom = manager.get(6).unwrap();
        assert_eq!(classroom.participant_count(), 1);
        assert_eq!(classroom.roster()[0].connection_id, 2);
        assert!(manager.append_chat(6, "s1", "still here").is_ok());

        assert_eq!(manager.leave(6, "s1", 2), LeaveOutcome::Deleted);
        assert_eq!(manager.leave(6, "s1", 2), LeaveOutcome::Superseded);
    }

    #[test]
    fn test_append_chat_requires_live_classroom() {
        let manager = ClassroomManager::new();
        assert!(matches!(
            manager.append_chat(9, "s1", "hi"),
            Err(ClassroomError::NotFound(_))
        ));

        manager.join(9, entry("s1", Role::Student));
        let message = manager.append_chat(9, "s1", "hi").unwrap();
        assert_eq!(message.sender_id, "s1");
        assert_eq!(manager.snapshot(9).chat_messages, vec![message]);
    }

    #[test]
    fn test_stats_counts_users() {
        let manager = ClassroomManager::new();
        manager.join(1, entry("t1", Role::Teacher));
        manager.join(1, entry("s1", Role::Student));
        manager.join(2, entry("s2", Role::Student));

        let stats = manager.stats();
        assert_eq!(stats.total_classrooms, 2);
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.classrooms[0].lecture_id, 1);
        assert_eq!(stats.classrooms[0].teacher_zcode.as_deref(), Some("t1"));
    }
}
