use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::connection::Connection;
use crate::ids::{new_room_id, new_token};

/// Where a user sits relative to matchmaking (spec §3). `Connected` is the
/// status of a user inside an active room; `Disconnected` only ever appears
/// transiently on the `User` snapshot handed back by `remove`/`teardown`,
/// never on a user still indexed by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Waiting,
    Connected,
    Disconnected,
}

/// Negotiation state of a call, shared by the user and the room it belongs
/// to (spec §4.5's call-state table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Ringing,
    Answered,
    Ended,
    Failed,
}

/// One participant in a session (spec §3). Cheap to clone: the `Connection`
/// field is an `Arc`, everything else is small owned data.
#[derive(Clone)]
pub struct User {
    pub id: String,
    pub token: String,
    pub status: UserStatus,
    pub connected_at: DateTime<Utc>,
    pub conn: Arc<Connection>,
    pub partner_id: Option<String>,
    pub room_id: Option<String>,
    pub call_state: CallState,
}

impl User {
    fn new(conn: Arc<Connection>) -> Self {
        let id = conn.user_id().to_string();
        Self {
            id,
            token: new_token(),
            status: UserStatus::Waiting,
            connected_at: Utc::now(),
            conn,
            partner_id: None,
            room_id: None,
            call_state: CallState::Idle,
        }
    }
}

/// A paired session (spec §3). Stays in the `rooms` map after either
/// participant leaves (`active` goes false) rather than being deleted — see
/// SPEC_FULL.md's "Open question" on room retention.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub call_state: CallState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Room {
    fn other(&self, user_id: &str) -> &str {
        if self.user_a == user_id {
            &self.user_b
        } else {
            &self.user_a
        }
    }
}

/// Snapshot counts for the `GET /stats` adjunct (spec §4.2).
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub waiting_count: usize,
    pub active_count: usize,
    pub room_count: usize,
}

/// Combined result of the single teardown codepath (spec §4.5): the
/// removed user (if it still existed) and the partner that was recycled
/// back to waiting (if any), snapshotted under one lock acquisition so the
/// caller can perform the notification/close I/O outside the lock.
pub struct TeardownOutcome {
    pub removed: Option<User>,
    pub partner: Option<User>,
}

struct PoolState {
    waiting: IndexMap<String, User>,
    active: IndexMap<String, User>,
    rooms: IndexMap<String, Room>,
    user_rooms: IndexMap<String, String>,
}

impl PoolState {
    fn new() -> Self {
        Self {
            waiting: IndexMap::new(),
            active: IndexMap::new(),
            rooms: IndexMap::new(),
            user_rooms: IndexMap::new(),
        }
    }

    fn find_partner(&self, user_id: &str) -> Option<&User> {
        let room_id = self.user_rooms.get(user_id)?;
        let room = self.rooms.get(room_id)?;
        if !room.active {
            return None;
        }
        self.active.get(room.other(user_id))
    }

    /// Pulls `user_id` out of `active`, clears its room/partner pointers
    /// and the `user_rooms` index entry, marks any room it belonged to
    /// inactive, and reinserts it into `waiting`. Used both by
    /// `move_to_waiting` and, symmetrically, by `teardown` for the partner.
    fn recycle_to_waiting(&mut self, user_id: &str) -> bool {
        let Some(mut user) = self.active.shift_remove(user_id) else {
            return false;
        };
        if let Some(room_id) = self.user_rooms.shift_remove(user_id) {
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.active = false;
            }
        }
        user.status = UserStatus::Waiting;
        user.partner_id = None;
        user.room_id = None;
        user.call_state = CallState::Idle;
        self.waiting.insert(user_id.to_string(), user);
        true
    }

    fn remove(&mut self, user_id: &str) -> Option<User> {
        if let Some(room_id) = self.user_rooms.shift_remove(user_id) {
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.active = false;
                let partner_id = room.other(user_id).to_string();
                self.user_rooms.shift_remove(&partner_id);
            }
        }
        let removed = self
            .waiting
            .shift_remove(user_id)
            .or_else(|| self.active.shift_remove(user_id));
        removed.map(|mut u| {
            u.status = UserStatus::Disconnected;
            u.partner_id = None;
            u.room_id = None;
            u
        })
    }
}

/// The aggregate owning all shared matchmaking state (spec §4.2): the
/// `waiting` pool, the `active` table, the `rooms` table, and the
/// `user_rooms` index, all guarded by one reader-writer lock so the four
/// global invariants in §3 are never observable as violated (§5's locking
/// discipline).
pub struct UserPool {
    state: RwLock<PoolState>,
}

impl Default for UserPool {
    fn default() -> Self {
        Self::new()
    }
}

impl UserPool {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PoolState::new()),
        }
    }

    /// Creates a fresh `User` wrapping `conn` and inserts it into `waiting`.
    /// Precondition: `conn.user_id()` is not already present anywhere in
    /// the pool.
    pub fn add_waiting(&self, conn: Arc<Connection>) -> User {
        let user = User::new(conn);
        let mut state = self.state.write();
        state.waiting.insert(user.id.clone(), user.clone());
        user
    }

    /// Returns any waiting user other than `exclude_id`. No fairness
    /// guarantee (spec §4.2); callers must not assume a particular winner
    /// of a race.
    pub fn pick_waiting_partner(&self, exclude_id: &str) -> Option<User> {
        let state = self.state.read();
        state
            .waiting
            .iter()
            .find(|(id, _)| id.as_str() != exclude_id)
            .map(|(_, user)| user.clone())
    }

    /// Atomically pairs `a` and `b` into a new room, promoting both from
    /// `waiting` to `active`. Returns `None` without mutating anything if
    /// either precondition fails (spec §4.2's tie-break: the loser of a
    /// concurrent race gets no room).
    pub fn create_room(&self, a: &str, b: &str) -> Option<Room> {
        if a == b {
            return None;
        }
        let mut state = self.state.write();
        if !state.waiting.contains_key(a) || !state.waiting.contains_key(b) {
            return None;
        }

        let mut user_a = state.waiting.shift_remove(a)?;
        let mut user_b = state.waiting.shift_remove(b)?;

        let room = Room {
            id: new_room_id(),
            user_a: a.to_string(),
            user_b: b.to_string(),
            created_at: Utc::now(),
            active: true,
            call_state: CallState::Idle,
            started_at: None,
            ended_at: None,
        };

        user_a.status = UserStatus::Connected;
        user_a.partner_id = Some(b.to_string());
        user_a.room_id = Some(room.id.clone());
        user_b.status = UserStatus::Connected;
        user_b.partner_id = Some(a.to_string());
        user_b.room_id = Some(room.id.clone());

        state.active.insert(a.to_string(), user_a);
        state.active.insert(b.to_string(), user_b);
        state.user_rooms.insert(a.to_string(), room.id.clone());
        state.user_rooms.insert(b.to_string(), room.id.clone());
        state.rooms.insert(room.id.clone(), room.clone());

        Some(room)
    }

    /// Looks up the active partner of `user_id` via the room it belongs
    /// to. Returns `None` if `user_id` has no room, or the room is no
    /// longer active.
    pub fn find_partner(&self, user_id: &str) -> Option<User> {
        self.state.read().find_partner(user_id).cloned()
    }

    /// Transfers a user from `active` back to `waiting`, clearing its
    /// partner/room pointers. Used to recycle a user whose partner
    /// disappeared. No-op if `user_id` is not active.
    pub fn move_to_waiting(&self, user_id: &str) {
        self.state.write().recycle_to_waiting(user_id);
    }

    /// Marks any room `user_id` belongs to inactive, removes its
    /// `user_rooms` bindings (the partner's binding too), and deletes
    /// `user_id` from `waiting`/`active`. Idempotent — removing an absent
    /// user is a no-op that returns `None`.
    pub fn remove(&self, user_id: &str) -> Option<User> {
        self.state.write().remove(user_id)
    }

    /// The single teardown codepath (spec §4.5): atomically snapshots any
    /// partner, recycles the partner to `waiting`, and removes `user_id`,
    /// all under one write-lock acquisition so the room-active invariant
    /// never has an externally observable gap. The caller performs the
    /// partner notification and connection close outside the lock.
    pub fn teardown(&self, user_id: &str) -> TeardownOutcome {
        let mut state = self.state.write();
        let partner = state.find_partner(user_id).cloned();
        if let Some(ref partner) = partner {
            state.recycle_to_waiting(&partner.id);
        }
        let removed = state.remove(user_id);
        TeardownOutcome { removed, partner }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.read();
        PoolStats {
            waiting_count: state.waiting.len(),
            active_count: state.active.len(),
            room_count: state.rooms.values().filter(|r| r.active).count(),
        }
    }

    /// Updates a user's call-state in place, mirroring the change onto its
    /// room if one exists. Used by the dispatch table in spec §4.5.
    pub fn set_call_state(&self, user_id: &str, call_state: CallState) {
        let mut state = self.state.write();
        let room_id = if let Some(user) = state.active.get_mut(user_id) {
            user.call_state = call_state;
            user.room_id.clone()
        } else {
            None
        };
        if let Some(room_id) = room_id {
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.call_state = call_state;
            }
        }
    }

    pub fn mark_started(&self, user_id: &str) {
        let mut state = self.state.write();
        if let Some(room_id) = state.user_rooms.get(user_id).cloned() {
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.started_at = Some(Utc::now());
            }
        }
    }

    pub fn mark_ended(&self, user_id: &str) {
        let mut state = self.state.write();
        if let Some(room_id) = state.user_rooms.get(user_id).cloned() {
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.ended_at = Some(Utc::now());
            }
        }
    }

    /// Every user id currently tracked, waiting or active. Used to drive
    /// teardown of every session on process shutdown.
    pub fn all_user_ids(&self) -> Vec<String> {
        let state = self.state.read();
        state
            .waiting
            .keys()
            .chain(state.active.keys())
            .cloned()
            .collect()
    }

    /// Returns the ids of every waiting or active user whose connection's
    /// last-liveness timestamp is older than `cutoff`. Read-only: the
    /// reaper invokes `teardown` for each returned id outside this lock.
    pub fn idle_user_ids(&self, cutoff: Duration) -> Vec<String> {
        let threshold = Utc::now().timestamp() - cutoff.as_secs() as i64;
        let state = self.state.read();
        state
            .waiting
            .iter()
            .chain(state.active.iter())
            .filter(|(_, user)| user.conn.last_liveness() < threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FrameSink;
    use async_trait::async_trait;
    use duocall_proto::ServerFrame;

    struct NullSink;

    #[async_trait]
    impl FrameSink for NullSink {
        async fn send_frame(&mut self, _frame: &ServerFrame) -> crate::error::SignalResult<()> {
            Ok(())
        }
        async fn close(&mut self) {}
    }

    fn conn(id: &str) -> Arc<Connection> {
        Arc::new(Connection::new(id, Box::new(NullSink)))
    }

    #[test]
    fn add_and_pick_waiting() {
        let pool = UserPool::new();
        pool.add_waiting(conn("a"));
        pool.add_waiting(conn("b"));

        let partner = pool.pick_waiting_partner("a").unwrap();
        assert_eq!(partner.id, "b");
        assert!(pool.pick_waiting_partner("a").is_some());
        assert!(pool.pick_waiting_partner("z").is_some());
    }

    #[test]
    fn create_room_pairs_and_updates_invariants() {
        let pool = UserPool::new();
        pool.add_waiting(conn("a"));
        pool.add_waiting(conn("b"));

        let room = pool.create_room("a", "b").expect("room");
        assert_ne!(room.user_a, room.user_b);

        let stats = pool.stats();
        assert_eq!(stats.waiting_count, 0);
        assert_eq!(stats.active_count, 2);
        assert_eq!(stats.room_count, 1);

        let partner_of_a = pool.find_partner("a").unwrap();
        assert_eq!(partner_of_a.id, "b");
        let partner_of_b = pool.find_partner("b").unwrap();
        assert_eq!(partner_of_b.id, "a");
    }

    #[test]
    fn create_room_fails_if_user_already_paired() {
        let pool = UserPool::new();
        pool.add_waiting(conn("a"));
        pool.add_waiting(conn("b"));
        pool.add_waiting(conn("c"));

        assert!(pool.create_room("a", "b").is_some());
        // b is no longer waiting -- the loser of the race gets nothing and
        // the pool is unchanged.
        assert!(pool.create_room("b", "c").is_none());
        assert_eq!(pool.stats().waiting_count, 1);
        assert_eq!(pool.stats().active_count, 2);
    }

    #[test]
    fn create_room_rejects_self_pairing() {
        let pool = UserPool::new();
        pool.add_waiting(conn("a"));
        assert!(pool.create_room("a", "a").is_none());
    }

    #[test]
    fn teardown_recycles_partner_and_removes_self() {
        let pool = UserPool::new();
        pool.add_waiting(conn("a"));
        pool.add_waiting(conn("b"));
        pool.create_room("a", "b").unwrap();

        let outcome = pool.teardown("a");
        assert_eq!(outcome.removed.unwrap().id, "a");
        assert_eq!(outcome.partner.unwrap().id, "b");

        let stats = pool.stats();
        assert_eq!(stats.waiting_count, 1);
        assert_eq!(stats.active_count, 0);
        assert!(pool.find_partner("b").is_none());
    }

    #[test]
    fn teardown_is_idempotent() {
        let pool = UserPool::new();
        pool.add_waiting(conn("a"));
        pool.add_waiting(conn("b"));
        pool.create_room("a", "b").unwrap();

        let first = pool.teardown("a");
        assert!(first.removed.is_some());
        let second = pool.teardown("a");
        assert!(second.removed.is_none());
        assert!(second.partner.is_none());
    }

    #[test]
    fn remove_is_idempotent_and_leaves_room_inactive_but_retained() {
        let pool = UserPool::new();
        pool.add_waiting(conn("a"));
        pool.add_waiting(conn("b"));
        let room = pool.create_room("a", "b").unwrap();

        assert!(pool.remove("a").is_some());
        assert!(pool.remove("a").is_none());
        // stats() only counts active rooms (the reaper/stats gate), but the
        // room itself is still retained in the map, just marked inactive.
        assert_eq!(pool.stats().room_count, 0);
        assert_eq!(pool.state.read().rooms.len(), 1);
        let _ = room;
    }

    #[test]
    fn remove_clears_the_partners_user_rooms_binding_too() {
        // §4.2's contract for `remove` is stronger than just cleaning up the
        // departing user: it also deletes the partner's `user_rooms` entry,
        // independent of whatever `teardown`/`recycle_to_waiting` does with
        // the partner elsewhere.
        let pool = UserPool::new();
        pool.add_waiting(conn("a"));
        pool.add_waiting(conn("b"));
        pool.create_room("a", "b").unwrap();

        pool.remove("a");
        assert!(pool.state.read().user_rooms.get("b").is_none());
    }

    #[test]
    fn idle_user_ids_excludes_fresh_connections() {
        let pool = UserPool::new();
        let c = conn("a");
        pool.add_waiting(c.clone());
        c.touch();

        assert!(pool.idle_user_ids(Duration::from_secs(3600)).is_empty());
    }

    /// Spec §8's pairing-atomicity law: N waiting users, each thread racing
    /// to pick and pair a partner for its own user, must converge to
    /// exactly floor(N/2) rooms with every user in exactly one of
    /// waiting/active and no user double-booked into two rooms.
    #[test]
    fn concurrent_match_requests_pair_exactly_once_each() {
        const N: usize = 40;
        let pool = UserPool::new();
        for i in 0..N {
            pool.add_waiting(conn(&format!("u{i}")));
        }

        std::thread::scope(|scope| {
            for i in 0..N {
                let pool = &pool;
                let me = format!("u{i}");
                scope.spawn(move || {
                    // Retry a few times: the loser of a race against
                    // another thread for the same partner must re-enter
                    // waiting and try again, exactly as the engine's
                    // find_match dispatch does.
                    for _ in 0..N {
                        let Some(partner) = pool.pick_waiting_partner(&me) else {
                            break;
                        };
                        if pool.create_room(&me, &partner.id).is_some() {
                            break;
                        }
                    }
                });
            }
        });

        let stats = pool.stats();
        assert_eq!(stats.waiting_count + stats.active_count, N);
        assert_eq!(stats.active_count % 2, 0);
        assert_eq!(stats.room_count, stats.active_count / 2);

        // No user ended up paired with itself or double-booked: every
        // active user's partner is reciprocal and distinct from itself.
        for i in 0..N {
            let id = format!("u{i}");
            if let Some(partner) = pool.find_partner(&id) {
                assert_ne!(partner.id, id);
                let back = pool.find_partner(&partner.id).expect("partner is active");
                assert_eq!(back.id, id);
            }
        }
    }
}
