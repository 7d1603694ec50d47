//! Connection management for client connections.
//!
//! This module handles the lifecycle of client connections: the websocket
//! handshake, the per-connection read loop, the writer task draining the
//! outbound queue, and teardown.

pub mod client;
pub mod handler;
mod writer;

pub use client::{ClientHandle, DeliveryError};
pub use handler::handle_connection;

/// Type alias for connection identifiers.
///
/// Connection IDs are used to uniquely identify client connections
/// throughout their lifecycle on the server.
pub type ConnectionId = uuid::Uuid;
