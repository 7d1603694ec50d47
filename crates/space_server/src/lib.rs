//! # Space Server - Room and Session Coordination
//!
//! A real-time presence and movement server for a 2D multiplayer space.
//! Clients connect over a websocket, join a space, move an avatar around a
//! bounded grid and chat with everyone else in the same space. The server is
//! authoritative for who is in which space and where they stand.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Session** - Protocol state machine for one connection
//! * **Room Registry** - Process-wide map of spaces to their members
//! * **Admission Controller** - Token, space and duplicate-session checks on `join`
//! * **Movement Validator** - One grid step on one axis, inside the space
//! * **Broadcast** - Non-blocking fan-out to room members
//!
//! ### Message Flow
//!
//! 1. Client sends a text frame with `{type, payload}` structure
//! 2. The router decodes it; undecodable frames are dropped silently
//! 3. The session applies it if its status expects that message type
//! 4. Resulting events are queued to the affected members' connections
//! 5. Each connection's writer task drains its own queue to the socket
//!
//! ```json
//! { "type": "join", "payload": { "spaceId": "spaceA", "token": "<jwt>" } }
//! { "type": "move", "payload": { "x": 32, "y": 0 } }
//! ```
//!
//! ## Collaborators
//!
//! Identity tokens and space metadata come from outside the server, behind
//! the [`TokenVerifier`] and [`SpaceDirectory`] traits. [`JwtTokenVerifier`]
//! and [`HttpSpaceDirectory`] talk to the real services;
//! [`StaticSpaceDirectory`] serves spaces declared in configuration.
//!
//! ## Thread Safety
//!
//! * The registry shards rooms in a `DashMap`; each room has its own lock
//! * Membership changes and the broadcasts they cause share that lock, so
//!   every member of a room observes events in the same order
//! * Delivery never waits on a peer: a full or closed queue gets that peer
//!   disconnected instead of stalling the sender

pub use admission::{Admission, AdmissionController, AdmissionError, AdmissionPolicy};
pub use auth::{AuthError, Claims, Identity, JwtTokenVerifier, TokenVerifier};
pub use config::{ServerConfig, SpawnStrategy};
pub use connection::{ClientHandle, ConnectionId, DeliveryError};
pub use context::ServerContext;
pub use error::ServerError;
pub use messaging::{ClientMessage, JoinRejectReason, MemberView, ServerMessage};
pub use movement::{validate_move, MoveRejection, Position};
pub use room::{RoomRegistry, RoomId, UserId};
pub use server::SpaceServer;
pub use session::{Flow, Session, SessionStatus};
pub use spaces::{
    parse_dimensions, DirectoryError, HttpSpaceDirectory, SpaceBounds, SpaceDirectory,
    StaticSpaceDirectory,
};
pub use stats::{ServerStats, StatsSnapshot};

pub mod admission;
pub mod auth;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod messaging;
pub mod movement;
pub mod room;
pub mod server;
pub mod session;
pub mod spaces;
pub mod stats;

mod connection;
