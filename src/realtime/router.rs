//! Role-aware dispatch of inbound frames
//!
//! The router holds no state of its own between frames. Every decision reads
//! the session registry (who is connected) and the classroom manager (chat).
//! Frames that break a routing rule are logged and dropped; the wire
//! protocol has no negative acknowledgement for relay frames.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use super::classroom::ClassroomManager;
use super::registry::SessionRegistry;
use crate::error::{ClassroomError, Result};
use crate::models::message::chat_frame;
use crate::models::{
    ClientMessage, DocumentKey, DocumentPayload, InboundFrame, LectureId, MessageKind, Role,
};

#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    classrooms: Arc<ClassroomManager>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>, classrooms: Arc<ClassroomManager>) -> Self {
        Self {
            registry,
            classrooms,
        }
    }

    /// Route one decoded frame; returns how many connections received it
    ///
    /// Never fails: rule violations and encoding problems are logged here.
    #[instrument(skip(self, frame), fields(kind = %frame.message.kind(), sender = %frame.sender.id))]
    pub fn dispatch(&self, lecture_id: LectureId, frame: InboundFrame) -> usize {
        match self.route(lecture_id, frame) {
            Ok(delivered) => {
                debug!(delivered, "Frame routed");
                delivered
            }
            Err(ClassroomError::RoutingViolation(reason)) => {
                warn!(lecture_id, %reason, "Dropping frame");
                0
            }
            Err(e) => {
                warn!(lecture_id, error = %e, "Failed to route frame");
                0
            }
        }
    }

    fn route(&self, lecture_id: LectureId, mut frame: InboundFrame) -> Result<usize> {
        let sender_role = frame.sender.role;

        match &mut frame.message {
            ClientMessage::DocumentUpdate(payload) => {
                let destination = self.update_destination(&frame.sender.id, sender_role, payload)?;
                let bytes = encode(&frame)?;
                Ok(self.deliver(lecture_id, destination, bytes))
            }
            ClientMessage::SyncRequest(payload) => {
                payload.requester = Some(frame.sender.id.clone());
                let destination = match document_key(payload)? {
                    DocumentKey::Teacher => Destination::Teacher,
                    DocumentKey::Student(id) => Destination::Participant(id.to_string()),
                };
                let bytes = encode(&frame)?;
                Ok(self.deliver(lecture_id, destination, bytes))
            }
            ClientMessage::SyncResponse(payload) => {
                let requester = payload
                    .requester
                    .clone()
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        ClassroomError::RoutingViolation(
                            "sync response without requester".to_string(),
                        )
                    })?;
                let bytes = encode(&frame)?;
                Ok(self.deliver(lecture_id, Destination::Participant(requester), bytes))
            }
            ClientMessage::Chat(payload) => {
                let message =
                    self.classrooms
                        .append_chat(lecture_id, &frame.sender.id, &payload.message)?;
                let bytes = chat_frame(&message).map_err(encoding_error)?;
                Ok(self.deliver(lecture_id, Destination::Everyone, bytes))
            }
            ClientMessage::TeacherExecution(_) => {
                if !sender_role.is_teacher() {
                    return Err(ClassroomError::RoutingViolation(format!(
                        "student {} sent {}",
                        frame.sender.id,
                        MessageKind::TeacherExecution
                    )));
                }
                let bytes = encode(&frame)?;
                Ok(self.deliver(lecture_id, Destination::Students, bytes))
            }
            ClientMessage::StudentExecution(_) => {
                let destination = match (sender_role, frame.target.clone()) {
                    (Role::Student, _) => Destination::Teacher,
                    (Role::Teacher, Some(target)) => Destination::Participant(target),
                    (Role::Teacher, None) => Destination::Students,
                };
                let bytes = encode(&frame)?;
                Ok(self.deliver(lecture_id, destination, bytes))
            }
        }
    }

    /// Apply the document ownership rules to an update
    fn update_destination(
        &self,
        sender_id: &str,
        sender_role: Role,
        payload: &DocumentPayload,
    ) -> Result<Destination> {
        match (document_key(payload)?, sender_role) {
            (DocumentKey::Teacher, Role::Teacher) => Ok(Destination::Students),
            (DocumentKey::Teacher, Role::Student) => Err(ClassroomError::RoutingViolation(
                format!("student {} attempted to update the teacher document", sender_id),
            )),
            (DocumentKey::Student(owner), Role::Student) if owner == sender_id => {
                Ok(Destination::Teacher)
            }
            (DocumentKey::Student(owner), Role::Student) => {
                Err(ClassroomError::RoutingViolation(format!(
                    "student {} attempted to update the document of {}",
                    sender_id, owner
                )))
            }
            (DocumentKey::Student(owner), Role::Teacher) => {
                Ok(Destination::Participant(owner.to_string()))
            }
        }
    }

    fn deliver(&self, lecture_id: LectureId, destination: Destination, bytes: Bytes) -> usize {
        match destination {
            Destination::Everyone => self.registry.broadcast(lecture_id, None, &bytes),
            Destination::Students => {
                self.registry
                    .broadcast_to_role(lecture_id, Role::Student, &bytes)
            }
            Destination::Teacher => {
                usize::from(
                    self.registry
                        .send_to_first_with_role(lecture_id, Role::Teacher, bytes),
                )
            }
            Destination::Participant(id) => {
                usize::from(self.registry.send_to(lecture_id, &id, bytes))
            }
        }
    }
}

/// Where a routed frame goes
#[derive(Debug, Clone, PartialEq, Eq)]
enum Destination {
    Everyone,
    Students,
    Teacher,
    Participant(String),
}

fn document_key(payload: &DocumentPayload) -> Result<DocumentKey<'_>> {
    payload.key().ok_or_else(|| {
        ClassroomError::RoutingViolation(format!(
            "unroutable document key '{}'",
            payload.document_key
        ))
    })
}

fn encode(frame: &InboundFrame) -> Result<Bytes> {
    frame.encode().map_err(encoding_error)
}

fn encoding_error(e: serde_json::Error) -> ClassroomError {
    ClassroomError::Internal(format!("failed to encode frame: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RosterEntry, UserIdentity};
    use crate::realtime::connection::Connection;
    use chrono::Utc;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    struct Harness {
        registry: Arc<SessionRegistry>,
        classrooms: Arc<ClassroomManager>,
        router: MessageRouter,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(SessionRegistry::new());
            let classrooms = Arc::new(ClassroomManager::new());
            let router = MessageRouter::new(registry.clone(), classrooms.clone());
            Self {
                registry,
                classrooms,
                router,
            }
        }

        fn join(&self, lecture_id: LectureId, identity: UserIdentity) -> mpsc::Receiver<Bytes> {
            let (conn, rx) = Connection::new(identity.clone(), lecture_id, 16);
            let connection_id = conn.id();
            self.registry.register(Arc::new(conn));
            self.classrooms.join(
                lecture_id,
                RosterEntry {
                    participant_id: identity.id.clone(),
                    name: identity.id.clone(),
                    role: identity.role,
                    joined_at: Utc::now(),
                    connection_id,
                },
            );
            rx
        }

        fn send(&self, lecture_id: LectureId, from: &UserIdentity, frame: Value) -> usize {
            let raw = frame.to_string();
            let frame = InboundFrame::decode(raw.as_bytes(), from).unwrap();
            self.router.dispatch(lecture_id, frame)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            frames.push(serde_json::from_slice(&bytes).unwrap());
        }
        frames
    }

    fn update(key: &str) -> Value {
        json!({"type": "yjs_update", "data": {"document_key": key, "update": [1, 2, 3]}})
    }

    #[test]
    fn test_student_update_reaches_only_teacher() {
        let h = Harness::new();
        let mut teacher = h.join(1, UserIdentity::teacher("t1"));
        let mut s42 = h.join(1, UserIdentity::student("42"));
        let mut s43 = h.join(1, UserIdentity::student("43"));

        assert_eq!(h.send(1, &UserIdentity::student("42"), update("student-42")), 1);

        let received = drain(&mut teacher);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["sender"], "42");
        assert_eq!(received[0]["data"]["update"], json!([1, 2, 3]));
        assert!(drain(&mut s42).is_empty());
        assert!(drain(&mut s43).is_empty());
    }

    #[test]
    fn test_student_cannot_write_teacher_document() {
        let h = Harness::new();
        let mut teacher = h.join(1, UserIdentity::teacher("t1"));
        let mut other = h.join(1, UserIdentity::student("s2"));
        h.join(1, UserIdentity::student("s1"));

        assert_eq!(h.send(1, &UserIdentity::student("s1"), update("teacher-code")), 0);
        assert!(drain(&mut teacher).is_empty());
        assert!(drain(&mut other).is_empty());
    }

    #[test]
    fn test_student_cannot_write_other_student_document() {
        let h = Harness::new();
        let mut teacher = h.join(1, UserIdentity::teacher("t1"));
        let mut s2 = h.join(1, UserIdentity::student("s2"));
        h.join(1, UserIdentity::student("s1"));

        assert_eq!(h.send(1, &UserIdentity::student("s1"), update("student-s2")), 0);
        assert!(drain(&mut teacher).is_empty());
        assert!(drain(&mut s2).is_empty());
    }

    #[test]
    fn test_teacher_document_fans_out_to_students() {
        let h = Harness::new();
        let mut teacher = h.join(1, UserIdentity::teacher("t1"));
        let mut s1 = h.join(1, UserIdentity::student("s1"));
        let mut s2 = h.join(1, UserIdentity::student("s2"));

        assert_eq!(h.send(1, &UserIdentity::teacher("t1"), update("teacher-code")), 2);
        assert!(drain(&mut teacher).is_empty());
        assert_eq!(drain(&mut s1).len(), 1);
        assert_eq!(drain(&mut s2).len(), 1);
    }

    #[test]
    fn test_teacher_edit_reaches_named_student_only() {
        let h = Harness::new();
        h.join(1, UserIdentity::teacher("t1"));
        let mut s1 = h.join(1, UserIdentity::student("s1"));
        let mut s2 = h.join(1, UserIdentity::student("s2"));

        assert_eq!(h.send(1, &UserIdentity::teacher("t1"), update("student-s1")), 1);
        assert_eq!(drain(&mut s1).len(), 1);
        assert!(drain(&mut s2).is_empty());
    }

    #[test]
    fn test_unroutable_key_is_dropped() {
        let h = Harness::new();
        h.join(1, UserIdentity::teacher("t1"));
        assert_eq!(h.send(1, &UserIdentity::teacher("t1"), update("scratchpad")), 0);
    }

    #[test]
    fn test_sync_request_stamps_requester_and_sync_response_returns() {
        let h = Harness::new();
        let mut teacher = h.join(1, UserIdentity::teacher("t1"));
        let mut s1 = h.join(1, UserIdentity::student("s1"));

        let request = json!({
            "type": "yjs_sync_request",
            "data": {"document_key": "teacher-code", "requester": "forged"}
        });
        assert_eq!(h.send(1, &UserIdentity::student("s1"), request), 1);

        let received = drain(&mut teacher);
        assert_eq!(received[0]["data"]["requester"], "s1");

        let response = json!({
            "type": "yjs_sync_response",
            "data": {"document_key": "teacher-code", "update": [9], "requester": "s1"}
        });
        assert_eq!(h.send(1, &UserIdentity::teacher("t1"), response), 1);
        let received = drain(&mut s1);
        assert_eq!(received[0]["type"], "yjs_sync_response");
        assert_eq!(received[0]["data"]["update"], json!([9]));
    }

    #[test]
    fn test_sync_response_without_requester_is_dropped() {
        let h = Harness::new();
        h.join(1, UserIdentity::teacher("t1"));
        h.join(1, UserIdentity::student("s1"));

        let response = json!({
            "type": "yjs_sync_response",
            "data": {"document_key": "teacher-code", "update": [9]}
        });
        assert_eq!(h.send(1, &UserIdentity::teacher("t1"), response), 0);
    }

    #[test]
    fn test_chat_fans_out_with_echo() {
        let h = Harness::new();
        let mut teacher = h.join(3, UserIdentity::teacher("t1"));
        let mut s1 = h.join(3, UserIdentity::student("s1"));
        let mut s2 = h.join(3, UserIdentity::student("s2"));

        let chat = json!({"type": "chat_message", "data": {"message": "hello"}});
        assert_eq!(h.send(3, &UserIdentity::teacher("t1"), chat), 3);

        let frames: Vec<Vec<Value>> = vec![drain(&mut teacher), drain(&mut s1), drain(&mut s2)];
        let id = frames[0][0]["data"]["id"].clone();
        for received in &frames {
            assert_eq!(received.len(), 1);
            assert_eq!(received[0]["type"], "chat_message");
            assert_eq!(received[0]["data"]["id"], id);
            assert_eq!(received[0]["data"]["content"], "hello");
            assert_eq!(received[0]["sender"], "t1");
        }

        let history = h.classrooms.snapshot(3).chat_messages;
        assert_eq!(history.len(), 1);
        assert_eq!(json!(history[0].id), id);
    }

    #[test]
    fn test_teacher_execution_from_student_is_dropped() {
        let h = Harness::new();
        let mut teacher = h.join(1, UserIdentity::teacher("t1"));
        let _s1 = h.join(1, UserIdentity::student("s1"));
        let mut s2 = h.join(1, UserIdentity::student("s2"));

        let relay = json!({"type": "teacher_execution", "data": {"output": "hi"}});
        assert_eq!(h.send(1, &UserIdentity::student("s1"), relay.clone()), 0);
        assert!(drain(&mut s2).is_empty());

        assert_eq!(h.send(1, &UserIdentity::teacher("t1"), relay), 2);
        assert!(drain(&mut teacher).is_empty());
    }

    #[test]
    fn test_student_execution_routing() {
        let h = Harness::new();
        let mut teacher = h.join(1, UserIdentity::teacher("t1"));
        let mut s1 = h.join(1, UserIdentity::student("s1"));
        let mut s2 = h.join(1, UserIdentity::student("s2"));

        let from_student = json!({"type": "student_execution", "data": {"output": "1"}});
        assert_eq!(h.send(1, &UserIdentity::student("s1"), from_student), 1);
        assert_eq!(drain(&mut teacher).len(), 1);

        let targeted = json!({
            "type": "student_execution",
            "data": {"output": "2"},
            "target": "s2"
        });
        assert_eq!(h.send(1, &UserIdentity::teacher("t1"), targeted), 1);
        assert!(drain(&mut s1).is_empty());
        assert_eq!(drain(&mut s2)[0]["target"], "s2");

        let untargeted = json!({"type": "student_execution", "data": {"output": "3"}});
        assert_eq!(h.send(1, &UserIdentity::teacher("t1"), untargeted), 2);
    }

    #[test]
    fn test_routing_is_scoped_to_lecture() {
        let h = Harness::new();
        h.join(1, UserIdentity::teacher("t1"));
        let mut elsewhere = h.join(2, UserIdentity::student("s1"));

        assert_eq!(h.send(1, &UserIdentity::teacher("t1"), update("teacher-code")), 0);
        assert!(drain(&mut elsewhere).is_empty());
    }
}
