//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize and customize the space server.

use crate::error::ServerError;
pub use crate::movement::SpawnStrategy;
use std::net::SocketAddr;

/// Configuration structure for the space server.
///
/// Contains network settings, connection limits and the world rules applied to
/// every room (grid step, spawn placement, chat limits, admission roles).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Seconds a fresh connection may wait before sending `join`
    pub connection_timeout: u64,

    /// Whether to use SO_REUSEPORT for multi-threaded accept loops
    pub use_reuse_port: bool,

    /// Grid step in pixels; every accepted move is exactly one tile
    pub tile_size: i64,

    /// Where newly admitted avatars appear
    pub spawn: SpawnStrategy,

    /// Outbound frames buffered per connection before it counts as stalled
    pub outbound_queue_capacity: usize,

    /// Longest chat message relayed, in characters
    pub max_chat_length: usize,

    /// Token roles allowed to join a space
    pub allowed_roles: Vec<String>,

    /// Avatar used when the identity token carries none
    pub default_avatar: String,

    /// Milliseconds to wait for queued notices to flush before closing
    pub close_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3001)),
            max_connections: 1000,
            connection_timeout: 60,
            use_reuse_port: false,
            tile_size: 32,
            spawn: SpawnStrategy::default(),
            outbound_queue_capacity: 256,
            max_chat_length: 500,
            allowed_roles: vec!["User".to_string(), "Admin".to_string()],
            default_avatar: "default".to_string(),
            close_grace_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.tile_size <= 0 {
            return Err(ServerError::Config("tile_size must be positive".to_string()));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ServerError::Config(
                "outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be at least 1".to_string()));
        }
        if self.connection_timeout == 0 {
            return Err(ServerError::Config("connection_timeout must be at least 1 second".to_string()));
        }
        if self.allowed_roles.is_empty() {
            return Err(ServerError::Config("allowed_roles cannot be empty".to_string()));
        }
        Ok(())
    }
}
