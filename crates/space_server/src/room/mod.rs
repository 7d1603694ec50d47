//! Rooms and the registry that owns them.
//!
//! A room is one space's live membership. Each room carries its own lock, so
//! joins, moves and departures in one room never wait on another room.

pub mod broadcast;
pub mod registry;

pub use registry::{Registration, RegistryError, RoomRegistry};

use crate::connection::{ClientHandle, ConnectionId};
use crate::messaging::MemberView;
use crate::movement::Position;
use crate::spaces::SpaceBounds;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Identifier of a room; the space id it was joined under.
pub type RoomId = String;

/// Identifier of a user, taken from their identity token.
pub type UserId = String;

/// A joined session as the room sees it.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub avatar_key: String,
    pub position: Position,
    pub client: ClientHandle,
}

impl Member {
    pub fn view(&self) -> MemberView {
        MemberView {
            id: self.user_id.clone(),
            user_id: self.user_id.clone(),
            avatar_key: self.avatar_key.clone(),
            x: self.position.x,
            y: self.position.y,
        }
    }
}

/// Identity of a session that is about to be registered.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub user_id: UserId,
    pub avatar_key: String,
    pub client: ClientHandle,
}

#[derive(Debug, Default)]
pub(crate) struct RoomState {
    pub(crate) members: HashMap<UserId, Member>,
    /// Set once the room has emptied and left the registry; a stale handle
    /// must not accept new members.
    pub(crate) evicted: bool,
}

#[derive(Debug)]
pub struct Room {
    id: RoomId,
    bounds: SpaceBounds,
    pub(crate) state: Mutex<RoomState>,
}

impl Room {
    pub(crate) fn new(id: RoomId, bounds: SpaceBounds) -> Self {
        Self {
            id,
            bounds,
            state: Mutex::new(RoomState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bounds(&self) -> SpaceBounds {
        self.bounds
    }
}
