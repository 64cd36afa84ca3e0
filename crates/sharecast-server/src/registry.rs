//! Room registry: maps room ids to their ordered member sessions.
//!
//! The registry is the single owner of every `Room` and `UserSession`. It is
//! shared behind one `RwLock` so membership, share state and transport
//! bookkeeping always change together.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use sharecast_common::ConnectionId;
use tokio::sync::RwLock;

/// Registry handle shared by the coordinator, transport manager and HTTP API.
pub type SharedRegistry = Arc<RwLock<RoomRegistry>>;

pub fn shared() -> SharedRegistry {
    Arc::new(RwLock::new(RoomRegistry::new()))
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Who, if anyone, is sharing in a room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShareState {
    #[default]
    Idle,
    Sharing(String),
}

/// A media transport owned by one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHandle {
    pub id: String,
    pub connected: bool,
}

impl TransportHandle {
    pub fn new(id: String) -> Self {
        Self {
            id,
            connected: false,
        }
    }
}

/// Which of a session's two transports an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSide {
    Producer,
    Consumer,
}

impl TransportSide {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Producer => "producer transport",
            Self::Consumer => "consumer transport",
        }
    }
}

/// One user's membership in a room plus the media handles it owns.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_id: String,
    pub connection: ConnectionId,
    /// Unique for the life of the process; lets async callers detect that the
    /// session they started with was replaced.
    pub generation: u64,
    pub producer_transport: Option<TransportHandle>,
    pub consumer_transport: Option<TransportHandle>,
    pub producers: BTreeSet<String>,
    pub consumers: BTreeSet<String>,
}

impl UserSession {
    fn new(user_id: String, connection: ConnectionId, generation: u64) -> Self {
        Self {
            user_id,
            connection,
            generation,
            producer_transport: None,
            consumer_transport: None,
            producers: BTreeSet::new(),
            consumers: BTreeSet::new(),
        }
    }

    pub fn transport(&self, side: TransportSide) -> Option<&TransportHandle> {
        match side {
            TransportSide::Producer => self.producer_transport.as_ref(),
            TransportSide::Consumer => self.consumer_transport.as_ref(),
        }
    }

    pub fn transport_mut(&mut self, side: TransportSide) -> &mut Option<TransportHandle> {
        match side {
            TransportSide::Producer => &mut self.producer_transport,
            TransportSide::Consumer => &mut self.consumer_transport,
        }
    }
}

/// A room and its members in join order.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    users: Vec<UserSession>,
    state: ShareState,
}

impl Room {
    fn new(id: String) -> Self {
        Self {
            id,
            users: Vec::new(),
            state: ShareState::Idle,
        }
    }

    pub fn users(&self) -> &[UserSession] {
        &self.users
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.users.iter().map(|u| u.user_id.clone()).collect()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u.user_id == user_id)
    }

    pub fn user(&self, user_id: &str) -> Option<&UserSession> {
        self.users.iter().find(|u| u.user_id == user_id)
    }

    pub fn user_mut(&mut self, user_id: &str) -> Option<&mut UserSession> {
        self.users.iter_mut().find(|u| u.user_id == user_id)
    }

    pub fn state(&self) -> &ShareState {
        &self.state
    }

    pub fn is_sharing(&self) -> bool {
        matches!(self.state, ShareState::Sharing(_))
    }

    pub fn sharer_id(&self) -> Option<&str> {
        match &self.state {
            ShareState::Sharing(id) => Some(id),
            ShareState::Idle => None,
        }
    }

    /// `Idle -> Sharing(user_id)`. Returns false if someone is already
    /// sharing or `user_id` is not a member.
    pub fn start_sharing(&mut self, user_id: &str) -> bool {
        if self.is_sharing() || !self.contains(user_id) {
            return false;
        }
        self.state = ShareState::Sharing(user_id.to_string());
        true
    }

    /// Force `Idle`, returning the previous sharer if there was one.
    pub fn stop_sharing(&mut self) -> Option<String> {
        match std::mem::take(&mut self.state) {
            ShareState::Sharing(id) => Some(id),
            ShareState::Idle => None,
        }
    }

    /// Connections of every member except those owned by `exclude`.
    pub fn connections_except(&self, exclude: Option<&ConnectionId>) -> Vec<ConnectionId> {
        let mut out: Vec<ConnectionId> = Vec::with_capacity(self.users.len());
        for user in &self.users {
            if Some(&user.connection) == exclude || out.contains(&user.connection) {
                continue;
            }
            out.push(user.connection.clone());
        }
        out
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            users: self.member_ids(),
            is_being_shared: self.is_sharing(),
            sharer_id: self.sharer_id().map(str::to_string),
        }
    }
}

/// Read-only copy of a room for discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    pub id: String,
    pub users: Vec<String>,
    pub is_being_shared: bool,
    pub sharer_id: Option<String>,
}

/// Outcome of removing a member.
#[derive(Debug)]
pub struct Removal {
    pub session: UserSession,
    /// The removed user was the room's sharer; the room is now `Idle`.
    pub was_sharer: bool,
    /// The room became empty and was deleted.
    pub room_closed: bool,
    /// Connections of the members still in the room.
    pub remaining: Vec<ConnectionId>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: BTreeMap<String, Room>,
    next_generation: u64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the room, creating it if unknown. The flag is true only for the
    /// call that actually created it.
    pub fn get_or_create(&mut self, room_id: &str) -> (&mut Room, bool) {
        let created = !self.rooms.contains_key(room_id);
        let room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id.to_string()));
        (room, created)
    }

    /// Add a member. Re-adding an existing member is a no-op; returns whether
    /// the user was newly added. Unknown rooms are left alone.
    pub fn add_user(&mut self, room_id: &str, user_id: &str, connection: &ConnectionId) -> bool {
        let generation = self.next_generation;
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if room.contains(user_id) {
            return false;
        }
        room.users.push(UserSession::new(
            user_id.to_string(),
            connection.clone(),
            generation,
        ));
        self.next_generation += 1;
        true
    }

    /// Remove a member, clearing the sharer if it was them and deleting the
    /// room once it is empty.
    pub fn remove_user(&mut self, room_id: &str, user_id: &str) -> Option<Removal> {
        let room = self.rooms.get_mut(room_id)?;
        let index = room.users.iter().position(|u| u.user_id == user_id)?;
        let session = room.users.remove(index);

        let was_sharer = room.sharer_id() == Some(user_id);
        if was_sharer {
            room.stop_sharing();
        }

        let room_closed = room.users.is_empty();
        let remaining = room.connections_except(None);
        if room_closed {
            self.rooms.remove(room_id);
        }

        Some(Removal {
            session,
            was_sharer,
            room_closed,
            remaining,
        })
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub fn session(&self, room_id: &str, user_id: &str) -> Option<&UserSession> {
        self.rooms.get(room_id)?.user(user_id)
    }

    pub fn session_mut(&mut self, room_id: &str, user_id: &str) -> Option<&mut UserSession> {
        self.rooms.get_mut(room_id)?.user_mut(user_id)
    }

    /// `(room_id, user_id)` of every session owned by `connection`.
    pub fn sessions_for_connection(&self, connection: &ConnectionId) -> Vec<(String, String)> {
        self.rooms
            .values()
            .flat_map(|room| {
                room.users
                    .iter()
                    .filter(|u| &u.connection == connection)
                    .map(|u| (room.id.clone(), u.user_id.clone()))
            })
            .collect()
    }

    pub fn snapshot(&self) -> Vec<RoomSnapshot> {
        self.rooms.values().map(Room::snapshot).collect()
    }

    pub fn room_snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        self.rooms.get(room_id).map(Room::snapshot)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    fn join(reg: &mut RoomRegistry, room: &str, user: &str) -> bool {
        reg.get_or_create(room);
        reg.add_user(room, user, &conn(user))
    }

    #[test]
    fn get_or_create_reports_creation_once() {
        let mut reg = RoomRegistry::new();
        let (_, created) = reg.get_or_create("r1");
        assert!(created);
        let (_, created) = reg.get_or_create("r1");
        assert!(!created);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn add_user_is_idempotent_and_keeps_join_order() {
        let mut reg = RoomRegistry::new();
        assert!(join(&mut reg, "r1", "a"));
        assert!(join(&mut reg, "r1", "b"));
        assert!(!join(&mut reg, "r1", "a"));
        assert_eq!(reg.room("r1").unwrap().member_ids(), vec!["a", "b"]);
    }

    #[test]
    fn add_user_to_unknown_room_is_ignored() {
        let mut reg = RoomRegistry::new();
        assert!(!reg.add_user("nope", "a", &conn("a")));
        assert!(reg.is_empty());
    }

    #[test]
    fn removing_last_member_deletes_room() {
        let mut reg = RoomRegistry::new();
        join(&mut reg, "r1", "a");
        join(&mut reg, "r1", "b");

        let removal = reg.remove_user("r1", "a").unwrap();
        assert!(!removal.room_closed);
        assert_eq!(removal.remaining, vec![conn("b")]);
        assert!(reg.room("r1").is_some());

        let removal = reg.remove_user("r1", "b").unwrap();
        assert!(removal.room_closed);
        assert!(removal.remaining.is_empty());
        assert!(reg.room("r1").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_unknown_user_is_none() {
        let mut reg = RoomRegistry::new();
        join(&mut reg, "r1", "a");
        assert!(reg.remove_user("r1", "zz").is_none());
        assert!(reg.remove_user("r2", "a").is_none());
    }

    #[test]
    fn sharer_removal_clears_share_state() {
        let mut reg = RoomRegistry::new();
        join(&mut reg, "r1", "a");
        join(&mut reg, "r1", "b");
        assert!(reg.room_mut("r1").unwrap().start_sharing("a"));

        let removal = reg.remove_user("r1", "a").unwrap();
        assert!(removal.was_sharer);
        let room = reg.room("r1").unwrap();
        assert!(!room.is_sharing());
        assert_eq!(room.sharer_id(), None);
    }

    #[test]
    fn start_sharing_requires_idle_and_membership() {
        let mut reg = RoomRegistry::new();
        join(&mut reg, "r1", "a");
        join(&mut reg, "r1", "b");
        let room = reg.room_mut("r1").unwrap();

        assert!(!room.start_sharing("stranger"));
        assert!(room.start_sharing("a"));
        assert!(!room.start_sharing("b"));
        assert_eq!(room.sharer_id(), Some("a"));

        assert_eq!(room.stop_sharing(), Some("a".to_string()));
        assert_eq!(room.stop_sharing(), None);
        assert!(room.start_sharing("b"));
    }

    #[test]
    fn generations_are_unique_across_rejoins() {
        let mut reg = RoomRegistry::new();
        join(&mut reg, "r1", "a");
        let first = reg.session("r1", "a").unwrap().generation;
        reg.remove_user("r1", "a");
        join(&mut reg, "r1", "a");
        let second = reg.session("r1", "a").unwrap().generation;
        assert_ne!(first, second);
    }

    #[test]
    fn sessions_for_connection_spans_rooms() {
        let mut reg = RoomRegistry::new();
        join(&mut reg, "r1", "a");
        join(&mut reg, "r2", "a");
        join(&mut reg, "r2", "b");

        let mut owned = reg.sessions_for_connection(&conn("a"));
        owned.sort();
        assert_eq!(
            owned,
            vec![
                ("r1".to_string(), "a".to_string()),
                ("r2".to_string(), "a".to_string())
            ]
        );
    }

    #[test]
    fn snapshot_is_a_detached_copy() {
        let mut reg = RoomRegistry::new();
        join(&mut reg, "r1", "a");
        reg.room_mut("r1").unwrap().start_sharing("a");

        let snap = reg.snapshot();
        join(&mut reg, "r1", "b");

        assert_eq!(
            snap,
            vec![RoomSnapshot {
                id: "r1".into(),
                users: vec!["a".into()],
                is_being_shared: true,
                sharer_id: Some("a".into()),
            }]
        );
        assert_eq!(reg.room_snapshot("r1").unwrap().users, vec!["a", "b"]);
        assert!(reg.room_snapshot("missing").is_none());
    }

    #[test]
    fn random_join_leave_sequences_keep_invariants() {
        // Deterministic pseudo-random walk over a small id space.
        let users = ["a", "b", "c", "d"];
        let rooms = ["r1", "r2"];
        let mut reg = RoomRegistry::new();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;

        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let user = users[(seed % 4) as usize];
            let room = rooms[((seed >> 8) % 2) as usize];
            match (seed >> 16) % 4 {
                0 | 1 => {
                    join(&mut reg, room, user);
                }
                2 => {
                    reg.remove_user(room, user);
                }
                _ => {
                    if let Some(r) = reg.room_mut(room) {
                        if (seed >> 24) % 2 == 0 {
                            r.start_sharing(user);
                        } else {
                            r.stop_sharing();
                        }
                    }
                }
            }

            for snap in reg.snapshot() {
                assert!(!snap.users.is_empty(), "empty room {} kept", snap.id);
                let mut ids = snap.users.clone();
                ids.sort();
                ids.dedup();
                assert_eq!(ids.len(), snap.users.len(), "duplicate member");
                match &snap.sharer_id {
                    Some(sharer) => {
                        assert!(snap.is_being_shared);
                        assert!(snap.users.contains(sharer));
                    }
                    None => assert!(!snap.is_being_shared),
                }
            }
        }
    }
}
