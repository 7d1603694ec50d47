//! Shared server state handed to every connection.

use crate::admission::{AdmissionController, AdmissionPolicy};
use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::room::RoomRegistry;
use crate::spaces::SpaceDirectory;
use crate::stats::ServerStats;
use std::sync::Arc;

/// Everything a session needs besides its own connection.
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<RoomRegistry>,
    pub admission: AdmissionController,
    pub stats: Arc<ServerStats>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn TokenVerifier>,
        directory: Arc<dyn SpaceDirectory>,
    ) -> Self {
        let stats = Arc::new(ServerStats::new());
        let registry = Arc::new(RoomRegistry::new(stats.clone()));
        let policy = AdmissionPolicy {
            allowed_roles: config.allowed_roles.clone(),
            default_avatar: config.default_avatar.clone(),
            spawn: config.spawn,
            tile_size: config.tile_size,
        };
        let admission = AdmissionController::new(verifier, directory, registry.clone(), policy);

        Self {
            config: Arc::new(config),
            registry,
            admission,
            stats,
        }
    }
}
