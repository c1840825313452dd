pub mod classroom;
pub mod execution;
pub mod identity;
pub mod message;

pub use classroom::*;
pub use execution::*;
pub use identity::*;
pub use message::{
    ChatPayload, ClientMessage, ConnectionAckPayload, DocumentKey, DocumentPayload, Envelope,
    ExecutionRelay, FrameError, InboundFrame, MessageKind, UserJoinPayload, UserLeavePayload,
};
