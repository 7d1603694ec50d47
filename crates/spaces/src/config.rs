//! Configuration management for the spaces server.
//!
//! Loads the TOML config file, applies validation, and turns it into the
//! library's [`ServerConfig`] plus the token verifier and space directory the
//! server is built with.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use space_server::{
    parse_dimensions, HttpSpaceDirectory, JwtTokenVerifier, ServerConfig, SpaceDirectory,
    SpawnStrategy, StaticSpaceDirectory, TokenVerifier,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable consulted when `[auth] jwt_secret` is empty.
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub world: WorldSettings,
    pub auth: AuthSettings,
    pub spaces: SpacesSettings,
    pub logging: LoggingSettings,
}

/// Network binding, connection limits and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:3001")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    pub max_connections: usize,
    /// Seconds a connection may stay open without joining a space
    pub connection_timeout: u64,
    /// Whether to use SO_REUSEPORT for multi-threaded accept loops
    pub use_reuse_port: bool,
    /// Outbound frames buffered per connection
    pub outbound_queue_capacity: usize,
    /// Milliseconds allowed for final notices to flush on close
    pub close_grace_ms: u64,
}

/// Rules applied inside every space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    pub tile_size: i64,
    pub max_chat_length: usize,
    pub default_avatar: String,
    pub spawn: SpawnStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 secret shared with the account service
    pub jwt_secret: String,
    /// Token roles allowed to join a space
    pub allowed_roles: Vec<String>,
}

/// Where space metadata comes from.
///
/// With `base_url` set, spaces are looked up in the metadata service;
/// otherwise `declared` lists the spaces as `id = "WIDTHxHEIGHT"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpacesSettings {
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
    pub declared: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind_address: defaults.bind_address.to_string(),
            max_connections: defaults.max_connections,
            connection_timeout: defaults.connection_timeout,
            use_reuse_port: defaults.use_reuse_port,
            outbound_queue_capacity: defaults.outbound_queue_capacity,
            close_grace_ms: defaults.close_grace_ms,
        }
    }
}

impl Default for WorldSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            tile_size: defaults.tile_size,
            max_chat_length: defaults.max_chat_length,
            default_avatar: defaults.default_avatar,
            spawn: defaults.spawn,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            allowed_roles: ServerConfig::default().allowed_roles,
        }
    }
}

impl Default for SpacesSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: 3000,
            declared: BTreeMap::from([("lobby".to_string(), "320x320".to_string())]),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration is written there and
    /// returned.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// The JWT secret from the file, or from `JWT_SECRET` when the file has none.
    pub fn jwt_secret(&self) -> Option<String> {
        choose_secret(&self.auth.jwt_secret, std::env::var(JWT_SECRET_ENV).ok())
    }

    /// Checks the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }
        if self.server.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.server.connection_timeout == 0 {
            return Err("connection_timeout must be at least 1 second".to_string());
        }
        if self.server.outbound_queue_capacity == 0 {
            return Err("outbound_queue_capacity must be at least 1".to_string());
        }

        if self.world.tile_size <= 0 {
            return Err(format!("tile_size must be positive, got {}", self.world.tile_size));
        }

        if self.jwt_secret().is_none() {
            return Err(format!(
                "No JWT secret configured: set [auth] jwt_secret or {JWT_SECRET_ENV}"
            ));
        }
        if self.auth.allowed_roles.is_empty() {
            return Err("allowed_roles cannot be empty".to_string());
        }

        match &self.spaces.base_url {
            Some(url) if url.trim().is_empty() => {
                return Err("spaces.base_url cannot be empty".to_string());
            }
            Some(_) => {}
            None if self.spaces.declared.is_empty() => {
                return Err("No spaces available: set spaces.base_url or declare spaces".to_string());
            }
            None => {}
        }
        for (id, dimensions) in &self.spaces.declared {
            if parse_dimensions(dimensions).is_none() {
                return Err(format!("Space {id} has invalid dimensions {dimensions:?}"));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Converts the application configuration to the server configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            bind_address: self
                .server
                .bind_address
                .parse()
                .with_context(|| format!("invalid bind address {}", self.server.bind_address))?,
            max_connections: self.server.max_connections,
            connection_timeout: self.server.connection_timeout,
            use_reuse_port: self.server.use_reuse_port,
            tile_size: self.world.tile_size,
            spawn: self.world.spawn,
            outbound_queue_capacity: self.server.outbound_queue_capacity,
            max_chat_length: self.world.max_chat_length,
            allowed_roles: self.auth.allowed_roles.clone(),
            default_avatar: self.world.default_avatar.clone(),
            close_grace_ms: self.server.close_grace_ms,
        })
    }

    pub fn build_verifier(&self) -> Result<Arc<dyn TokenVerifier>> {
        let secret = self
            .jwt_secret()
            .ok_or_else(|| anyhow!("no JWT secret configured"))?;
        Ok(Arc::new(JwtTokenVerifier::new(secret.as_bytes())))
    }

    pub fn build_directory(&self) -> Result<Arc<dyn SpaceDirectory>> {
        if let Some(base_url) = &self.spaces.base_url {
            if !self.spaces.declared.is_empty() {
                warn!("spaces.base_url is set; ignoring {} declared space(s)", self.spaces.declared.len());
            }
            let timeout = Duration::from_millis(self.spaces.request_timeout_ms);
            let directory = HttpSpaceDirectory::new(base_url, timeout)
                .with_context(|| format!("invalid space service URL {base_url}"))?;
            return Ok(Arc::new(directory));
        }

        let mut directory = StaticSpaceDirectory::new();
        for (id, dimensions) in &self.spaces.declared {
            let bounds = parse_dimensions(dimensions)
                .ok_or_else(|| anyhow!("space {id} has invalid dimensions {dimensions:?}"))?;
            directory.insert(id.clone(), bounds);
        }
        if directory.is_empty() {
            return Err(anyhow!("no spaces declared and no space service configured"));
        }
        info!("🗺️ {} space(s) declared", directory.len());
        Ok(Arc::new(directory))
    }
}

fn choose_secret(configured: &str, from_env: Option<String>) -> Option<String> {
    if !configured.trim().is_empty() {
        return Some(configured.to_string());
    }
    from_env.filter(|secret| !secret.trim().is_empty())
}
