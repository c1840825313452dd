//! Connection lifecycle
//!
//! A session joins the registry and the classroom, announces presence, then
//! runs three tasks per connection: read, write and liveness. Whichever task
//! ends first closes the connection, and the close signal stops the other
//! two. Teardown only runs leave-side effects if this connection still owns
//! its registry slot.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::classroom::{ClassroomManager, LeaveOutcome};
use super::connection::Connection;
use super::registry::SessionRegistry;
use super::router::MessageRouter;
use crate::config::RealtimeConfig;
use crate::error::ClassroomError;
use crate::models::{
    ConnectionAckPayload, Envelope, InboundFrame, LectureId, MessageKind, RosterEntry,
    UserIdentity, UserJoinPayload, UserLeavePayload,
};

/// Resolved parameters of one WebSocket join
#[derive(Debug, Clone)]
pub struct JoinParams {
    pub lecture_id: LectureId,
    pub identity: UserIdentity,
    pub name: String,
}

/// Shared handles every session needs, constructed once at startup
#[derive(Debug, Clone)]
pub struct SessionHub {
    registry: Arc<SessionRegistry>,
    classrooms: Arc<ClassroomManager>,
    router: MessageRouter,
    config: RealtimeConfig,
}

impl SessionHub {
    pub fn new(
        registry: Arc<SessionRegistry>,
        classrooms: Arc<ClassroomManager>,
        config: RealtimeConfig,
    ) -> Self {
        let router = MessageRouter::new(registry.clone(), classrooms.clone());
        Self {
            registry,
            classrooms,
            router,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn classrooms(&self) -> &Arc<ClassroomManager> {
        &self.classrooms
    }

    /// Register a new connection and announce it
    ///
    /// Any previous connection of the same participant is closed first. The
    /// acknowledgement is queued before anyone else hears about the join.
    pub fn join(&self, params: &JoinParams) -> (Arc<Connection>, mpsc::Receiver<Bytes>) {
        let (connection, outbound) = Connection::new(
            params.identity.clone(),
            params.lecture_id,
            self.config.send_buffer,
        );
        let connection = Arc::new(connection);

        self.registry.register(connection.clone());
        self.classrooms.join(
            params.lecture_id,
            RosterEntry {
                participant_id: params.identity.id.clone(),
                name: params.name.clone(),
                role: params.identity.role,
                joined_at: Utc::now(),
                connection_id: connection.id(),
            },
        );

        let ack = Envelope::system(
            MessageKind::ConnectionAck,
            ConnectionAckPayload {
                user_zcode: params.identity.id.clone(),
                user_role: params.identity.role,
                lecture_id: params.lecture_id,
                message: "WebSocket connected successfully".to_string(),
            },
        );
        match ack.to_bytes() {
            Ok(frame) => {
                connection.send(frame);
            }
            Err(e) => warn!(error = %e, "Failed to encode connection ack"),
        }

        let online_users = self.classrooms.roster(params.lecture_id);
        let joined = Envelope::system(
            MessageKind::UserJoin,
            UserJoinPayload {
                user_zcode: params.identity.id.clone(),
                user_name: params.name.clone(),
                user_role: params.identity.role,
                online_count: online_users.len(),
                online_users,
            },
        );
        match joined.to_bytes() {
            Ok(frame) => {
                self.registry
                    .broadcast(params.lecture_id, Some(&params.identity.id), &frame);
            }
            Err(e) => warn!(error = %e, "Failed to encode user_join"),
        }

        info!(
            lecture_id = params.lecture_id,
            participant = %params.identity.id,
            role = %params.identity.role,
            "Participant joined"
        );

        (connection, outbound)
    }

    /// Tear a connection down
    ///
    /// Returns `false` when the connection had already been replaced, in
    /// which case the roster and peers are left untouched.
    pub fn leave(&self, connection: &Connection, name: &str) -> bool {
        connection.close();

        if self.registry.unregister_connection(connection).is_none() {
            debug!(
                lecture_id = connection.lecture_id(),
                participant = %connection.participant_id(),
                "Replaced connection torn down"
            );
            return false;
        }

        self.depart(connection, name)
    }

    /// Roster removal and `user_leave`, once the registry slot is released
    ///
    /// A reconnect can register between the registry release and this call;
    /// the roster entry then belongs to the new connection and is kept.
    fn depart(&self, connection: &Connection, name: &str) -> bool {
        let lecture_id = connection.lecture_id();
        let outcome = self
            .classrooms
            .leave(lecture_id, connection.participant_id(), connection.id());
        if outcome == LeaveOutcome::Superseded {
            debug!(
                lecture_id,
                participant = %connection.participant_id(),
                "Roster entry taken over by a reconnect"
            );
            return false;
        }

        let deleted = outcome == LeaveOutcome::Deleted;
        let online_users = self.classrooms.roster(lecture_id);
        let left = Envelope::system(
            MessageKind::UserLeave,
            UserLeavePayload {
                user_zcode: connection.participant_id().to_string(),
                user_name: name.to_string(),
                online_count: online_users.len(),
                online_users,
            },
        );
        match left.to_bytes() {
            Ok(frame) => {
                self.registry.broadcast(lecture_id, None, &frame);
            }
            Err(e) => warn!(error = %e, "Failed to encode user_leave"),
        }

        info!(
            lecture_id,
            participant = %connection.participant_id(),
            classroom_deleted = deleted,
            "Participant left"
        );
        true
    }

    /// Drive one upgraded socket until it closes
    pub async fn run(self, socket: WebSocket, params: JoinParams) {
        let (connection, outbound) = self.join(&params);
        let (sink, stream) = socket.split();

        let write = tokio::spawn(write_pump(
            connection.clone(),
            sink,
            outbound,
            self.config.ping_interval(),
        ));
        let read = tokio::spawn(read_pump(
            connection.clone(),
            stream,
            self.router.clone(),
        ));
        let liveness = tokio::spawn(liveness_check(
            connection.clone(),
            self.config.liveness_check(),
            self.config.stale_timeout(),
        ));

        let (write, read, liveness) = tokio::join!(write, read, liveness);
        for (task, result) in [("write", write), ("read", read), ("liveness", liveness)] {
            if let Err(e) = result {
                warn!(task, error = %e, "Connection task failed");
            }
        }

        self.leave(&connection, &params.name);
    }
}

/// Inbound loop: decode, mark activity, route
async fn read_pump(
    connection: Arc<Connection>,
    mut stream: SplitStream<WebSocket>,
    router: MessageRouter,
) {
    loop {
        let message = tokio::select! {
            _ = connection.closed() => break,
            message = stream.next() => message,
        };

        let raw = match message {
            Some(Ok(Message::Text(text))) => Bytes::from(text),
            Some(Ok(Message::Binary(data))) => Bytes::from(data),
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                connection.touch();
                continue;
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(participant = %connection.participant_id(), "Peer closed socket");
                break;
            }
            Some(Err(e)) => {
                let err = ClassroomError::Transport(e.to_string());
                debug!(participant = %connection.participant_id(), error = %err, "Socket read failed");
                break;
            }
        };

        connection.touch();
        match InboundFrame::decode(&raw, connection.identity()) {
            Ok(frame) => {
                router.dispatch(connection.lecture_id(), frame);
            }
            Err(e) => {
                warn!(
                    lecture_id = connection.lecture_id(),
                    participant = %connection.participant_id(),
                    error = %e,
                    "Dropping undecodable frame"
                );
            }
        }
    }

    connection.close();
}

/// Outbound loop: drain the queue, keep idle sockets alive with pings
async fn write_pump(
    connection: Arc<Connection>,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    ping_interval: Duration,
) {
    let mut keepalive = interval(ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.reset();

    loop {
        tokio::select! {
            _ = connection.closed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let text = match String::from_utf8(frame.to_vec()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Dropping non-UTF-8 outbound frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    let err = ClassroomError::Transport(e.to_string());
                    debug!(participant = %connection.participant_id(), error = %err, "Socket write failed");
                    break;
                }
                keepalive.reset();
            }
            _ = keepalive.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    let err = ClassroomError::Transport(e.to_string());
                    debug!(participant = %connection.participant_id(), error = %err, "Ping failed");
                    break;
                }
            }
        }
    }

    connection.close();
}

/// Force-close the connection once no inbound activity is seen for `timeout`
async fn liveness_check(connection: Arc<Connection>, period: Duration, timeout: Duration) {
    let mut ticker = interval(period);
    ticker.reset();

    loop {
        tokio::select! {
            _ = connection.closed() => break,
            _ = ticker.tick() => {
                if connection.is_stale(timeout) {
                    warn!(
                        lecture_id = connection.lecture_id(),
                        participant = %connection.participant_id(),
                        idle_secs = connection.idle_for().as_secs(),
                        "Connection stale, closing"
                    );
                    connection.close();
                    break;
                }
            }
        }
    }
}
