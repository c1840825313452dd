//! Real-time classroom fabric
//!
//! Per-lecture presence, document relay and chat over WebSocket connections.

pub mod classroom;
pub mod connection;
pub mod registry;
pub mod router;
pub mod session;

pub use classroom::{Classroom, ClassroomManager, LeaveOutcome, CHAT_HISTORY_LIMIT};
pub use connection::{Connection, ConnectionId};
pub use registry::SessionRegistry;
pub use router::MessageRouter;
pub use session::{JoinParams, SessionHub};
