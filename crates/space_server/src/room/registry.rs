//! The authoritative room registry.
//!
//! One registry is built at server start and shared by every connection. It
//! is the single source of truth for which users are in which room and where
//! they stand.
//!
//! Concurrency: the room map is a sharded `DashMap`, and each room's member
//! set sits behind its own lock. Every membership change and the broadcast it
//! triggers happen under that room's lock, which gives each room a single
//! order of events. No map shard is held across an `.await`.
//!
//! Eviction: a room leaves the map the moment its last member leaves. The
//! room is flagged as evicted under its lock first, so a joiner holding a
//! stale handle retries against a fresh room instead of joining a dead one.

use super::broadcast::{deliver, encode, fan_out};
use super::{Member, NewMember, Room, RoomId};
use crate::connection::ConnectionId;
use crate::messaging::{MemberView, ServerMessage};
use crate::movement::{Position, SpawnStrategy};
use crate::spaces::SpaceBounds;
use crate::stats::ServerStats;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("user {0} already holds a session in this room")]
    AlreadyPresent(String),
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub position: Position,
    pub bounds: SpaceBounds,
    pub member_count: usize,
}

pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    stats: Arc<ServerStats>,
}

impl RoomRegistry {
    pub fn new(stats: Arc<ServerStats>) -> Self {
        Self {
            rooms: DashMap::new(),
            stats,
        }
    }

    fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|entry| entry.value().clone())
    }

    fn room_or_create(&self, room_id: &str, bounds: SpaceBounds) -> Arc<Room> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!("🏠 Room {} opened ({}x{})", room_id, bounds.width, bounds.height);
                self.stats.room_opened();
                Arc::new(Room::new(room_id.to_string(), bounds))
            })
            .value()
            .clone()
    }

    /// Bounds of a live room, if it exists.
    pub fn bounds(&self, room_id: &str) -> Option<SpaceBounds> {
        self.room(room_id).map(|room| room.bounds())
    }

    /// Adds a session to a room, creating the room if needed.
    ///
    /// Under the room's lock this rejects a duplicate `user_id`, picks the
    /// spawn point, sends the newcomer its `space-joined` snapshot and
    /// announces `user-joined` to everyone already present. `bounds` is only
    /// used when the room has to be created.
    pub async fn register(
        &self,
        room_id: &str,
        bounds: SpaceBounds,
        candidate: NewMember,
        spawn: SpawnStrategy,
        tile_size: i64,
    ) -> Result<Registration, RegistryError> {
        loop {
            let room = self.room_or_create(room_id, bounds);
            let mut state = room.state.lock().await;
            if state.evicted {
                debug!("Room {} was evicted while joining, retrying", room.id());
                continue;
            }

            if state.members.contains_key(&candidate.user_id) {
                return Err(RegistryError::AlreadyPresent(candidate.user_id));
            }

            let occupied: HashSet<Position> = state.members.values().map(|m| m.position).collect();
            let position = spawn.place(room.bounds(), tile_size, &occupied);

            let member = Member {
                connection_id: candidate.client.connection_id,
                user_id: candidate.user_id,
                avatar_key: candidate.avatar_key,
                position,
                client: candidate.client,
            };
            let me = member.view();

            let snapshot = ServerMessage::SpaceJoined {
                me: me.clone(),
                users: state.members.values().map(Member::view).collect(),
            };
            deliver(&member.client, &snapshot, &self.stats);

            if let Some(frame) = encode(&ServerMessage::UserJoined(me)) {
                fan_out(state.members.values(), &frame, None, &self.stats);
            }

            state.members.insert(member.user_id.clone(), member);

            return Ok(Registration {
                position,
                bounds: room.bounds(),
                member_count: state.members.len(),
            });
        }
    }

    /// Removes a session from a room and announces `user-left`.
    ///
    /// Only the connection that registered the entry can remove it. Returns
    /// the number of members left, or `None` if nothing was removed, which
    /// makes repeated teardown a no-op.
    pub async fn deregister(
        &self,
        room_id: &str,
        user_id: &str,
        connection_id: ConnectionId,
    ) -> Option<usize> {
        let room = self.room(room_id)?;
        let mut state = room.state.lock().await;

        match state.members.get(user_id) {
            Some(member) if member.connection_id == connection_id => {}
            _ => return None,
        }
        state.members.remove(user_id);

        let departure = ServerMessage::UserLeft {
            id: user_id.to_string(),
            user_id: user_id.to_string(),
        };
        if let Some(frame) = encode(&departure) {
            fan_out(state.members.values(), &frame, None, &self.stats);
        }

        let remaining = state.members.len();
        if remaining == 0 {
            state.evicted = true;
            if self
                .rooms
                .remove_if(room_id, |_, current| Arc::ptr_eq(current, &room))
                .is_some()
            {
                self.stats.room_closed();
            }
            info!("🏚️ Room {} is empty and was evicted", room.id());
        }

        Some(remaining)
    }

    /// Records an accepted move and broadcasts `movement` to everyone else.
    ///
    /// Returns the number of recipients, or `None` if the session is no longer
    /// registered in the room.
    pub async fn move_member(
        &self,
        room_id: &str,
        user_id: &str,
        connection_id: ConnectionId,
        position: Position,
    ) -> Option<usize> {
        let room = self.room(room_id)?;
        let mut state = room.state.lock().await;

        let member = state.members.get_mut(user_id)?;
        if member.connection_id != connection_id {
            return None;
        }
        member.position = position;

        let movement = ServerMessage::Movement {
            id: user_id.to_string(),
            x: position.x,
            y: position.y,
        };
        let frame = encode(&movement)?;
        Some(fan_out(state.members.values(), &frame, Some(user_id), &self.stats))
    }

    /// Delivers `message` to every member of a room except `exclude`.
    ///
    /// Returns how many members accepted it. Failed recipients are torn down
    /// asynchronously and never reported to the caller.
    pub async fn broadcast(&self, room_id: &str, message: &ServerMessage, exclude: Option<&str>) -> usize {
        let Some(room) = self.room(room_id) else {
            return 0;
        };
        let Some(frame) = encode(message) else {
            return 0;
        };
        let state = room.state.lock().await;
        fan_out(state.members.values(), &frame, exclude, &self.stats)
    }

    /// Public views of everyone in a room.
    pub async fn members(&self, room_id: &str) -> Vec<MemberView> {
        let Some(room) = self.room(room_id) else {
            return Vec::new();
        };
        let state = room.state.lock().await;
        state.members.values().map(Member::view).collect()
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        match self.room(room_id) {
            Some(room) => room.state.lock().await.members.len(),
            None => 0,
        }
    }

    pub async fn position_of(&self, room_id: &str, user_id: &str) -> Option<Position> {
        let room = self.room(room_id)?;
        let state = room.state.lock().await;
        state.members.get(user_id).map(|m| m.position)
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientHandle;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    const BOUNDS: SpaceBounds = SpaceBounds::new(320, 320);

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(ServerStats::new()))
    }

    fn candidate(user: &str) -> (NewMember, mpsc::Receiver<Message>) {
        let (client, rx) = ClientHandle::channel("127.0.0.1:6000".parse().unwrap(), 16);
        (
            NewMember {
                user_id: user.to_string(),
                avatar_key: "default".to_string(),
                client,
            },
            rx,
        )
    }

    fn next(rx: &mut mpsc::Receiver<Message>) -> ServerMessage {
        let frame = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(frame.to_text().unwrap()).unwrap()
    }

    async fn join(registry: &RoomRegistry, room: &str, user: &str) -> (ConnectionId, mpsc::Receiver<Message>) {
        let (member, rx) = candidate(user);
        let connection_id = member.client.connection_id;
        registry
            .register(room, BOUNDS, member, SpawnStrategy::default(), 32)
            .await
            .unwrap();
        (connection_id, rx)
    }

    #[tokio::test]
    async fn test_register_creates_room_and_snapshots() {
        let registry = registry();
        let (_, mut rx_a) = join(&registry, "spaceA", "a").await;

        match next(&mut rx_a) {
            ServerMessage::SpaceJoined { me, users } => {
                assert_eq!(me.user_id, "a");
                assert_eq!((me.x, me.y), (0, 0));
                assert!(users.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        let (_, mut rx_b) = join(&registry, "spaceA", "b").await;
        match next(&mut rx_b) {
            ServerMessage::SpaceJoined { users, .. } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].user_id, "a");
            }
            other => panic!("unexpected {:?}", other),
        }
        match next(&mut rx_a) {
            ServerMessage::UserJoined(view) => assert_eq!(view.user_id, "b"),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.member_count("spaceA").await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected_and_first_untouched() {
        let registry = registry();
        let (first_conn, _rx) = join(&registry, "spaceA", "a").await;

        let (dup, _dup_rx) = candidate("a");
        let result = registry
            .register("spaceA", BOUNDS, dup, SpawnStrategy::default(), 32)
            .await;
        assert_eq!(result, Err(RegistryError::AlreadyPresent("a".to_string())));

        assert_eq!(registry.member_count("spaceA").await, 1);
        assert_eq!(registry.position_of("spaceA", "a").await, Some(Position::new(0, 0)));

        // The first connection still owns the entry
        assert_eq!(registry.deregister("spaceA", "a", first_conn).await, Some(0));
    }

    #[tokio::test]
    async fn test_same_user_may_be_in_different_rooms() {
        let registry = registry();
        join(&registry, "spaceA", "a").await;
        join(&registry, "spaceB", "a").await;
        assert_eq!(registry.room_count(), 2);
    }

    #[tokio::test]
    async fn test_deregister_announces_and_evicts() {
        let registry = registry();
        let (conn_a, _rx_a) = join(&registry, "spaceA", "a").await;
        let (conn_b, mut rx_b) = join(&registry, "spaceA", "b").await;
        let _ = next(&mut rx_b); // space-joined

        assert_eq!(registry.deregister("spaceA", "a", conn_a).await, Some(1));
        match next(&mut rx_b) {
            ServerMessage::UserLeft { id, user_id } => {
                assert_eq!(id, "a");
                assert_eq!(user_id, "a");
            }
            other => panic!("unexpected {:?}", other),
        }

        // Second teardown of the same session is a no-op
        assert_eq!(registry.deregister("spaceA", "a", conn_a).await, None);
        assert!(rx_b.try_recv().is_err());

        assert_eq!(registry.deregister("spaceA", "b", conn_b).await, Some(0));
        assert_eq!(registry.room_count(), 0);
        assert!(registry.bounds("spaceA").is_none());
    }

    #[tokio::test]
    async fn test_live_room_gauge_tracks_open_rooms() {
        let stats = Arc::new(ServerStats::new());
        let registry = RoomRegistry::new(stats.clone());

        let (conn_a, _rx_a) = join(&registry, "spaceA", "a").await;
        let (_conn_b, _rx_b) = join(&registry, "spaceA", "b").await;
        let (conn_c, _rx_c) = join(&registry, "spaceB", "c").await;
        assert_eq!(stats.snapshot().live_rooms, 2);

        registry.deregister("spaceA", "a", conn_a).await;
        assert_eq!(stats.snapshot().live_rooms, 2);

        registry.deregister("spaceB", "c", conn_c).await;
        assert_eq!(stats.snapshot().live_rooms, 1);
        assert_eq!(stats.snapshot().live_rooms, registry.room_count() as u64);
    }

    #[tokio::test]
    async fn test_deregister_ignores_foreign_connection() {
        let registry = registry();
        join(&registry, "spaceA", "a").await;

        let stranger = uuid::Uuid::new_v4();
        assert_eq!(registry.deregister("spaceA", "a", stranger).await, None);
        assert_eq!(registry.member_count("spaceA").await, 1);
    }

    #[tokio::test]
    async fn test_room_reopens_after_eviction() {
        let registry = registry();
        let (conn, _rx) = join(&registry, "spaceA", "a").await;
        registry.deregister("spaceA", "a", conn).await;

        let (_, mut rx) = join(&registry, "spaceA", "a").await;
        assert!(matches!(next(&mut rx), ServerMessage::SpaceJoined { .. }));
        assert_eq!(registry.member_count("spaceA").await, 1);
    }

    #[tokio::test]
    async fn test_move_member_broadcasts_to_others_only() {
        let registry = registry();
        let (conn_a, mut rx_a) = join(&registry, "spaceA", "a").await;
        let (_, mut rx_b) = join(&registry, "spaceA", "b").await;
        let (_, mut rx_c) = join(&registry, "spaceA", "c").await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}
        while rx_c.try_recv().is_ok() {}

        let delivered = registry
            .move_member("spaceA", "a", conn_a, Position::new(32, 0))
            .await;
        assert_eq!(delivered, Some(2));

        for rx in [&mut rx_b, &mut rx_c] {
            assert_eq!(
                next(rx),
                ServerMessage::Movement { id: "a".to_string(), x: 32, y: 0 }
            );
        }
        assert!(rx_a.try_recv().is_err());
        assert_eq!(registry.position_of("spaceA", "a").await, Some(Position::new(32, 0)));
    }

    #[tokio::test]
    async fn test_first_free_spawn_spreads_members() {
        let registry = registry();
        for user in ["a", "b", "c"] {
            let (member, _rx) = candidate(user);
            registry
                .register("spaceA", BOUNDS, member, SpawnStrategy::FirstFree, 32)
                .await
                .unwrap();
        }
        assert_eq!(registry.position_of("spaceA", "a").await, Some(Position::new(0, 0)));
        assert_eq!(registry.position_of("spaceA", "b").await, Some(Position::new(32, 0)));
        assert_eq!(registry.position_of("spaceA", "c").await, Some(Position::new(64, 0)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_churn_keeps_membership_consistent() {
        let registry = Arc::new(registry());
        let mut tasks = Vec::new();

        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let room = format!("room-{}", i % 4);
                let user = format!("user-{i}");
                let (member, _rx) = candidate(&user);
                let conn = member.client.connection_id;
                registry
                    .register(&room, BOUNDS, member, SpawnStrategy::default(), 32)
                    .await
                    .unwrap();
                if i % 2 == 0 {
                    registry.deregister(&room, &user, conn).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut total = 0;
        for r in 0..4 {
            let members = registry.members(&format!("room-{r}")).await;
            let unique: HashSet<_> = members.iter().map(|m| m.user_id.clone()).collect();
            assert_eq!(unique.len(), members.len());
            total += members.len();
        }
        assert_eq!(total, 16);
    }
}
