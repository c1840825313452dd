//! One participant's live transport for one lecture
//!
//! The outbound side is a bounded queue drained by the connection's write
//! pump. `send` never blocks: a full queue drops the frame, so a slow
//! consumer can only lose its own traffic and never stalls a broadcaster.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::models::{LectureId, Role, UserIdentity};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection handle id, used to tell a replaced connection apart
pub type ConnectionId = u64;

pub struct Connection {
    id: ConnectionId,
    identity: UserIdentity,
    lecture_id: LectureId,
    active: AtomicBool,
    last_activity: Mutex<Instant>,
    outbound: mpsc::Sender<Bytes>,
    closed_tx: watch::Sender<bool>,
}

impl Connection {
    /// Create a connection and the receiving half of its outbound queue
    pub fn new(
        identity: UserIdentity,
        lecture_id: LectureId,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(buffer.max(1));
        let (closed_tx, _) = watch::channel(false);

        let connection = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            lecture_id,
            active: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            outbound,
            closed_tx,
        };

        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn participant_id(&self) -> &str {
        &self.identity.id
    }

    pub fn role(&self) -> Role {
        self.identity.role
    }

    pub fn lecture_id(&self) -> LectureId {
        self.lecture_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Queue a frame for delivery
    ///
    /// Returns `false` when the frame was dropped (inactive connection or
    /// full queue). Callers treat that as fire-and-forget.
    pub fn send(&self, frame: Bytes) -> bool {
        if !self.is_active() {
            return false;
        }

        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(
                    participant = %self.identity.id,
                    lecture_id = self.lecture_id,
                    "Outbound queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Close the connection; only the first call has any effect
    ///
    /// Returns `true` if this call performed the close.
    pub fn close(&self) -> bool {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let _ = self.closed_tx.send(true);
        debug!(
            participant = %self.identity.id,
            lecture_id = self.lecture_id,
            connection_id = self.id,
            "Connection closed"
        );
        true
    }

    /// Record inbound activity (frame or pong)
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }

    /// Resolve once the connection has been closed
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("participant", &self.identity.id)
            .field("role", &self.identity.role)
            .field("lecture_id", &self.lecture_id)
            .field("active", &self.is_active())
            .finish()
    }
}
