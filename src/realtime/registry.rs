//! Process-wide index of live connections keyed by (lecture, participant)
//!
//! Each lecture owns one bucket behind its DashMap shard lock, so register,
//! unregister and broadcast iteration for a lecture are mutually exclusive
//! while unrelated lectures only contend on a shared shard. Sends never
//! block (see [`Connection::send`]), which keeps the bucket lock short.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use super::connection::Connection;
use crate::models::{LectureId, RegistryStats, Role};

type Bucket = HashMap<String, Arc<Connection>>;

#[derive(Default)]
pub struct SessionRegistry {
    lectures: DashMap<LectureId, Bucket>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a connection, closing any previous one for the same participant
    ///
    /// The old connection is closed before the new one becomes visible to
    /// broadcasts. Returns the evicted connection, if any.
    pub fn register(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let lecture_id = connection.lecture_id();
        let participant = connection.participant_id().to_string();

        let mut bucket = self.lectures.entry(lecture_id).or_default();
        let evicted = bucket.remove(&participant);
        if let Some(old) = &evicted {
            old.close();
            info!(
                lecture_id,
                participant = %participant,
                old_connection = old.id(),
                new_connection = connection.id(),
                "Replacing existing connection"
            );
        }
        bucket.insert(participant, connection);

        evicted
    }

    /// Remove whatever connection occupies the key
    pub fn unregister(&self, lecture_id: LectureId, participant: &str) -> Option<Arc<Connection>> {
        self.remove_if(lecture_id, participant, |_| true)
    }

    /// Remove the entry only if it still holds this exact connection
    ///
    /// A connection that lost its slot to a reconnect gets `None` and must
    /// not run any leave-side effects.
    pub fn unregister_connection(&self, connection: &Connection) -> Option<Arc<Connection>> {
        self.remove_if(
            connection.lecture_id(),
            connection.participant_id(),
            |current| current.id() == connection.id(),
        )
    }

    fn remove_if(
        &self,
        lecture_id: LectureId,
        participant: &str,
        predicate: impl FnOnce(&Connection) -> bool,
    ) -> Option<Arc<Connection>> {
        match self.lectures.entry(lecture_id) {
            Entry::Occupied(mut bucket) => {
                let hit = bucket
                    .get()
                    .get(participant)
                    .is_some_and(|current| predicate(current));
                let removed = if hit {
                    bucket.get_mut().remove(participant)
                } else {
                    None
                };
                if bucket.get().is_empty() {
                    bucket.remove();
                    debug!(lecture_id, "Pruned empty lecture bucket");
                }
                removed
            }
            Entry::Vacant(_) => None,
        }
    }

    pub fn get(&self, lecture_id: LectureId, participant: &str) -> Option<Arc<Connection>> {
        self.lectures
            .get(&lecture_id)
            .and_then(|bucket| bucket.get(participant).cloned())
    }

    /// Targeted send; no-op when the participant is absent or inactive
    pub fn send_to(&self, lecture_id: LectureId, participant: &str, frame: Bytes) -> bool {
        self.lectures
            .get(&lecture_id)
            .and_then(|bucket| bucket.get(participant).map(|conn| conn.send(frame)))
            .unwrap_or(false)
    }

    /// Send to every live connection in the lecture except `exclude`
    ///
    /// Returns the number of connections that accepted the frame.
    pub fn broadcast(&self, lecture_id: LectureId, exclude: Option<&str>, frame: &Bytes) -> usize {
        self.fan_out(lecture_id, frame, |conn| {
            exclude.map_or(true, |skip| conn.participant_id() != skip)
        })
    }

    pub fn broadcast_to_role(&self, lecture_id: LectureId, role: Role, frame: &Bytes) -> usize {
        self.fan_out(lecture_id, frame, |conn| conn.role() == role)
    }

    /// Deliver to exactly one live connection holding `role`
    pub fn send_to_first_with_role(&self, lecture_id: LectureId, role: Role, frame: Bytes) -> bool {
        let Some(bucket) = self.lectures.get(&lecture_id) else {
            return false;
        };

        bucket
            .values()
            .find(|conn| conn.role() == role && conn.is_active())
            .map(|conn| conn.send(frame))
            .unwrap_or(false)
    }

    fn fan_out(
        &self,
        lecture_id: LectureId,
        frame: &Bytes,
        include: impl Fn(&Connection) -> bool,
    ) -> usize {
        let Some(bucket) = self.lectures.get(&lecture_id) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in bucket.values() {
            if include(conn) && conn.send(frame.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn connection_count(&self, lecture_id: LectureId) -> usize {
        self.lectures
            .get(&lecture_id)
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for bucket in self.lectures.iter() {
            stats.total_connections += bucket.len();
            stats
                .lecture_stats
                .insert(bucket.key().to_string(), bucket.len());
        }
        stats.active_lectures = stats.lecture_stats.len();
        stats
    }

    /// Close every connection; used on shutdown
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for bucket in self.lectures.iter() {
            for conn in bucket.values() {
                if conn.close() {
                    closed += 1;
                }
            }
        }
        closed
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lectures: BTreeMap<LectureId, usize> = self
            .lectures
            .iter()
            .map(|bucket| (*bucket.key(), bucket.len()))
            .collect();
        f.debug_struct("SessionRegistry")
            .field("lectures", &lectures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserIdentity;
    use tokio::sync::mpsc;

    fn connect(
        registry: &SessionRegistry,
        identity: UserIdentity,
        lecture_id: LectureId,
    ) -> (Arc<Connection>, mpsc::Receiver<Bytes>) {
        let (conn, rx) = Connection::new(identity, lecture_id, 8);
        let conn = Arc::new(conn);
        registry.register(conn.clone());
        (conn, rx)
    }

    fn frame(text: &'static str) -> Bytes {
        Bytes::from_static(text.as_bytes())
    }

    #[test]
    fn test_register_replaces_and_closes_previous() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = connect(&registry, UserIdentity::student("s1"), 7);

        let (second, _) = Connection::new(UserIdentity::student("s1"), 7, 8);
        let second = Arc::new(second);
        let evicted = registry.register(second.clone()).unwrap();

        assert_eq!(evicted.id(), first.id());
        assert!(!first.is_active());
        assert!(second.is_active());
        assert_eq!(registry.connection_count(7), 1);
        assert_eq!(registry.get(7, "s1").unwrap().id(), second.id());
    }

    #[test]
    fn test_evicted_connection_cannot_unregister_replacement() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = connect(&registry, UserIdentity::student("s1"), 7);
        let (second, _rx2) = connect(&registry, UserIdentity::student("s1"), 7);

        assert!(registry.unregister_connection(&first).is_none());
        assert_eq!(registry.get(7, "s1").unwrap().id(), second.id());

        assert!(registry.unregister_connection(&second).is_some());
        assert_eq!(registry.connection_count(7), 0);
    }

    #[test]
    fn test_unregister_prunes_empty_bucket() {
        let registry = SessionRegistry::new();
        let _ = connect(&registry, UserIdentity::teacher("t1"), 5);

        assert!(registry.unregister(5, "t1").is_some());
        assert!(registry.unregister(5, "t1").is_none());
        assert_eq!(registry.stats().active_lectures, 0);
    }

    #[test]
    fn test_broadcast_with_exclusion() {
        let registry = SessionRegistry::new();
        let (_t, mut t_rx) = connect(&registry, UserIdentity::teacher("t1"), 3);
        let (_s1, mut s1_rx) = connect(&registry, UserIdentity::student("s1"), 3);
        let (_s2, mut s2_rx) = connect(&registry, UserIdentity::student("s2"), 3);
        let (_other, mut other_rx) = connect(&registry, UserIdentity::student("s3"), 4);

        assert_eq!(registry.broadcast(3, Some("t1"), &frame("hi")), 2);
        assert!(t_rx.try_recv().is_err());
        assert_eq!(s1_rx.try_recv().unwrap(), frame("hi"));
        assert_eq!(s2_rx.try_recv().unwrap(), frame("hi"));
        assert!(other_rx.try_recv().is_err());

        assert_eq!(registry.broadcast(3, None, &frame("all")), 3);
    }

    #[test]
    fn test_broadcast_to_role() {
        let registry = SessionRegistry::new();
        let (_t, mut t_rx) = connect(&registry, UserIdentity::teacher("t1"), 3);
        let (_s1, mut s1_rx) = connect(&registry, UserIdentity::student("s1"), 3);

        assert_eq!(registry.broadcast_to_role(3, Role::Student, &frame("x")), 1);
        assert!(t_rx.try_recv().is_err());
        assert_eq!(s1_rx.try_recv().unwrap(), frame("x"));
    }

    #[test]
    fn test_send_to_first_with_role_delivers_once() {
        let registry = SessionRegistry::new();
        let (_t1, mut t1_rx) = connect(&registry, UserIdentity::teacher("t1"), 3);
        let (_t2, mut t2_rx) = connect(&registry, UserIdentity::teacher("t2"), 3);

        assert!(registry.send_to_first_with_role(3, Role::Teacher, frame("doc")));
        let delivered = [t1_rx.try_recv().is_ok(), t2_rx.try_recv().is_ok()];
        assert_eq!(delivered.iter().filter(|d| **d).count(), 1);

        assert!(!registry.send_to_first_with_role(9, Role::Teacher, frame("doc")));
    }

    #[test]
    fn test_slow_peer_does_not_block_broadcast() {
        let registry = SessionRegistry::new();
        let (slow, _slow_rx) = Connection::new(UserIdentity::student("slow"), 3, 1);
        registry.register(Arc::new(slow));
        let (_fast, mut fast_rx) = connect(&registry, UserIdentity::student("fast"), 3);

        for _ in 0..5 {
            registry.broadcast(3, None, &frame("tick"));
        }

        let mut received = 0;
        while fast_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
    }

    #[test]
    fn test_send_to_absent_or_closed_is_noop() {
        let registry = SessionRegistry::new();
        assert!(!registry.send_to(1, "ghost", frame("x")));

        let (conn, _rx) = connect(&registry, UserIdentity::student("s1"), 1);
        conn.close();
        assert!(!registry.send_to(1, "s1", frame("x")));
    }

    #[test]
    fn test_stats_and_close_all() {
        let registry = SessionRegistry::new();
        let (a, _ra) = connect(&registry, UserIdentity::teacher("t1"), 1);
        let (b, _rb) = connect(&registry, UserIdentity::student("s1"), 1);
        let (c, _rc) = connect(&registry, UserIdentity::student("s1"), 2);

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.active_lectures, 2);
        assert_eq!(stats.lecture_stats.get("1"), Some(&2));
        assert_eq!(registry.get(1, "t1").unwrap().id(), a.id());
        assert_eq!(registry.get(1, "s1").unwrap().id(), b.id());

        assert_eq!(registry.close_all(), 3);
        assert!(!a.is_active() && !b.is_active() && !c.is_active());
    }
}
