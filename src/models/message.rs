//! Classroom wire protocol
//!
//! Every frame in both directions is a JSON envelope
//! `{type, data, sender, target?, timestamp}`. Inbound frames are decoded by
//! tag into [`ClientMessage`]; unknown tags and server-only tags are rejected.

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::{ChatMessage, LectureId, Role, RosterEntry, UserIdentity};

/// Document key of the teacher's shared editor
pub const TEACHER_DOCUMENT_KEY: &str = "teacher-code";

/// Prefix of per-student document keys (`student-{id}`)
pub const STUDENT_DOCUMENT_PREFIX: &str = "student-";

/// Sender name used for server-originated frames
pub const SYSTEM_SENDER: &str = "system";

/// Recognized envelope tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    YjsUpdate,
    YjsSyncRequest,
    YjsSyncResponse,
    ChatMessage,
    UserJoin,
    UserLeave,
    ConnectionAck,
    Error,
    TeacherExecution,
    StudentExecution,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::YjsUpdate => "yjs_update",
            MessageKind::YjsSyncRequest => "yjs_sync_request",
            MessageKind::YjsSyncResponse => "yjs_sync_response",
            MessageKind::ChatMessage => "chat_message",
            MessageKind::UserJoin => "user_join",
            MessageKind::UserLeave => "user_leave",
            MessageKind::ConnectionAck => "connection_ack",
            MessageKind::Error => "error",
            MessageKind::TeacherExecution => "teacher_execution",
            MessageKind::StudentExecution => "student_execution",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wire envelope shared by both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: T,
    #[serde(default)]
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

impl<T: Serialize> Envelope<T> {
    /// Envelope originated by the server itself
    pub fn system(kind: MessageKind, data: T) -> Self {
        Self::from_sender(kind, data, SYSTEM_SENDER)
    }

    pub fn from_sender(kind: MessageKind, data: T, sender: impl Into<String>) -> Self {
        Self {
            kind,
            data,
            sender: sender.into(),
            target: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Serialize into an outbound frame
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Parsed collaborative-document key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKey<'a> {
    Teacher,
    Student(&'a str),
}

impl<'a> DocumentKey<'a> {
    /// Prefix-based parse; anything else is unroutable
    pub fn parse(key: &'a str) -> Option<Self> {
        if key == TEACHER_DOCUMENT_KEY {
            return Some(DocumentKey::Teacher);
        }
        key.strip_prefix(STUDENT_DOCUMENT_PREFIX)
            .filter(|id| !id.is_empty())
            .map(DocumentKey::Student)
    }
}

/// Payload of the `yjs_*` frames; update bytes are relayed untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub document_key: String,
    #[serde(default, with = "byte_array")]
    pub update: Vec<u8>,
    #[serde(
        default,
        with = "byte_array::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub state_vector: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

impl DocumentPayload {
    pub fn key(&self) -> Option<DocumentKey<'_>> {
        DocumentKey::parse(&self.document_key)
    }
}

/// Inbound chat body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message: String,
}

/// Execution result relayed between peers, opaque to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionRelay(pub Map<String, Value>);

/// Body of a `user_join` presence event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserJoinPayload {
    pub user_zcode: String,
    pub user_name: String,
    pub user_role: Role,
    pub online_users: Vec<RosterEntry>,
    pub online_count: usize,
}

/// Body of a `user_leave` presence event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLeavePayload {
    pub user_zcode: String,
    pub user_name: String,
    pub online_users: Vec<RosterEntry>,
    pub online_count: usize,
}

/// Body of the `connection_ack` sent right after upgrade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAckPayload {
    pub user_zcode: String,
    pub user_role: Role,
    pub lecture_id: LectureId,
    pub message: String,
}

/// Strongly-typed inbound message, one variant per client-originated tag
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    DocumentUpdate(DocumentPayload),
    SyncRequest(DocumentPayload),
    SyncResponse(DocumentPayload),
    Chat(ChatPayload),
    TeacherExecution(ExecutionRelay),
    StudentExecution(ExecutionRelay),
}

impl ClientMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::DocumentUpdate(_) => MessageKind::YjsUpdate,
            ClientMessage::SyncRequest(_) => MessageKind::YjsSyncRequest,
            ClientMessage::SyncResponse(_) => MessageKind::YjsSyncResponse,
            ClientMessage::Chat(_) => MessageKind::ChatMessage,
            ClientMessage::TeacherExecution(_) => MessageKind::TeacherExecution,
            ClientMessage::StudentExecution(_) => MessageKind::StudentExecution,
        }
    }

    fn data(&self) -> Result<Value, serde_json::Error> {
        match self {
            ClientMessage::DocumentUpdate(p)
            | ClientMessage::SyncRequest(p)
            | ClientMessage::SyncResponse(p) => serde_json::to_value(p),
            ClientMessage::Chat(p) => serde_json::to_value(p),
            ClientMessage::TeacherExecution(p) | ClientMessage::StudentExecution(p) => {
                serde_json::to_value(p)
            }
        }
    }
}

/// Why an inbound frame could not be decoded
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("frame type '{0}' is server-originated and cannot be sent by clients")]
    ServerOnly(MessageKind),

    #[error("invalid '{kind}' payload: {source}")]
    InvalidPayload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded inbound frame with the sender identity injected by the server
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub message: ClientMessage,
    pub sender: UserIdentity,
    pub target: Option<String>,
    pub timestamp: i64,
}

impl InboundFrame {
    /// Decode raw bytes; client-supplied sender and timestamp are overwritten
    pub fn decode(raw: &[u8], sender: &UserIdentity) -> Result<Self, FrameError> {
        let envelope: Envelope<Value> = serde_json::from_slice(raw).map_err(FrameError::Malformed)?;
        let kind = envelope.kind;

        let invalid = |source| FrameError::InvalidPayload { kind, source };
        let message = match kind {
            MessageKind::YjsUpdate => {
                ClientMessage::DocumentUpdate(serde_json::from_value(envelope.data).map_err(invalid)?)
            }
            MessageKind::YjsSyncRequest => {
                ClientMessage::SyncRequest(serde_json::from_value(envelope.data).map_err(invalid)?)
            }
            MessageKind::YjsSyncResponse => {
                ClientMessage::SyncResponse(serde_json::from_value(envelope.data).map_err(invalid)?)
            }
            MessageKind::ChatMessage => {
                ClientMessage::Chat(serde_json::from_value(envelope.data).map_err(invalid)?)
            }
            MessageKind::TeacherExecution => ClientMessage::TeacherExecution(
                serde_json::from_value(envelope.data).map_err(invalid)?,
            ),
            MessageKind::StudentExecution => ClientMessage::StudentExecution(
                serde_json::from_value(envelope.data).map_err(invalid)?,
            ),
            MessageKind::UserJoin
            | MessageKind::UserLeave
            | MessageKind::ConnectionAck
            | MessageKind::Error => return Err(FrameError::ServerOnly(kind)),
        };

        Ok(Self {
            message,
            sender: sender.clone(),
            target: envelope.target.filter(|t| !t.is_empty()),
            timestamp: Utc::now().timestamp(),
        })
    }

    /// Re-encode for relay, stamped with the authenticated sender
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        Envelope {
            kind: self.message.kind(),
            data: self.message.data()?,
            sender: self.sender.id.clone(),
            target: self.target.clone(),
            timestamp: self.timestamp,
        }
        .to_bytes()
    }
}

/// Update bytes travel as JSON number arrays; base64 strings are accepted on input
mod byte_array {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Array(Vec<u8>),
        Base64(String),
    }

    impl Repr {
        fn into_bytes<E: serde::de::Error>(self) -> Result<Vec<u8>, E> {
            match self {
                Repr::Array(bytes) => Ok(bytes),
                Repr::Base64(encoded) => BASE64.decode(encoded).map_err(E::custom),
            }
        }
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Repr::deserialize(deserializer)?.into_bytes::<D::Error>()
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.collect_seq(bytes),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            match Option::<Repr>::deserialize(deserializer)? {
                Some(repr) => repr.into_bytes::<D::Error>().map(Some),
                None => Ok(None),
            }
        }
    }
}

/// Build the outbound chat frame for a persisted message
pub fn chat_frame(message: &ChatMessage) -> Result<Bytes, serde_json::Error> {
    let mut envelope =
        Envelope::from_sender(MessageKind::ChatMessage, message, message.sender_id.clone());
    envelope.timestamp = message.created_at.timestamp();
    envelope.to_bytes()
}
