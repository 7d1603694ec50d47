//! Server activity counters.
//!
//! Plain atomics updated at each protocol transition. A [`StatsSnapshot`] is a
//! consistent-enough copy for health logging and for tests to assert against.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ServerStats {
    active_connections: AtomicU64,
    connections_total: AtomicU64,
    live_rooms: AtomicU64,
    joins_accepted: AtomicU64,
    joins_rejected: AtomicU64,
    moves_accepted: AtomicU64,
    moves_rejected: AtomicU64,
    chats_relayed: AtomicU64,
    disconnects: AtomicU64,
    deliveries_failed: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub active_connections: u64,
    pub connections_total: u64,
    pub live_rooms: u64,
    pub joins_accepted: u64,
    pub joins_rejected: u64,
    pub moves_accepted: u64,
    pub moves_rejected: u64,
    pub chats_relayed: u64,
    pub disconnects: u64,
    pub deliveries_failed: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new connection and returns how many are now open.
    pub fn connection_opened(&self) -> u64 {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn room_opened(&self) {
        self.live_rooms.fetch_add(1, Ordering::AcqRel);
    }

    pub fn room_closed(&self) {
        self.live_rooms.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn join_accepted(&self) {
        self.joins_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn join_rejected(&self) {
        self.joins_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn move_accepted(&self) {
        self.moves_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn move_rejected(&self) {
        self.moves_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chat_relayed(&self) {
        self.chats_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.active_connections.load(Ordering::Acquire),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            live_rooms: self.live_rooms.load(Ordering::Acquire),
            joins_accepted: self.joins_accepted.load(Ordering::Relaxed),
            joins_rejected: self.joins_rejected.load(Ordering::Relaxed),
            moves_accepted: self.moves_accepted.load(Ordering::Relaxed),
            moves_rejected: self.moves_rejected.load(Ordering::Relaxed),
            chats_relayed: self.chats_relayed.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counting() {
        let stats = ServerStats::new();
        assert_eq!(stats.connection_opened(), 1);
        assert_eq!(stats.connection_opened(), 2);
        stats.connection_closed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.connections_total, 2);
    }

    #[test]
    fn test_live_room_gauge() {
        let stats = ServerStats::new();
        stats.room_opened();
        stats.room_opened();
        stats.room_closed();
        assert_eq!(stats.snapshot().live_rooms, 1);
    }

    #[test]
    fn test_protocol_counters() {
        let stats = ServerStats::new();
        stats.join_accepted();
        stats.join_rejected();
        stats.move_accepted();
        stats.move_accepted();
        stats.move_rejected();
        stats.chat_relayed();
        stats.disconnected();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.joins_accepted, 1);
        assert_eq!(snapshot.joins_rejected, 1);
        assert_eq!(snapshot.moves_accepted, 2);
        assert_eq!(snapshot.moves_rejected, 1);
        assert_eq!(snapshot.chats_relayed, 1);
        assert_eq!(snapshot.disconnects, 1);
        assert_eq!(snapshot.deliveries_failed, 0);
    }
}
