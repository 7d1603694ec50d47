//! Admission control for `join` requests.
//!
//! A join is checked in a fixed order: identity token, then space existence,
//! then the duplicate-session rule. The first failure decides the
//! `join-rejected` reason. Nothing is retried here; a rejected client must
//! send a corrected `join`.

use crate::auth::{AuthError, TokenVerifier};
use crate::connection::ClientHandle;
use crate::messaging::{JoinRejectReason, JoinRequest};
use crate::movement::{Position, SpawnStrategy};
use crate::room::{NewMember, RegistryError, RoomRegistry};
use crate::spaces::{SpaceBounds, SpaceDirectory};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] AuthError),

    #[error("space {0} not found")]
    SpaceNotFound(String),

    #[error("user {0} is already in this space")]
    AlreadyInSpace(String),
}

impl AdmissionError {
    pub fn reason(&self) -> JoinRejectReason {
        match self {
            AdmissionError::InvalidToken(_) => JoinRejectReason::InvalidToken,
            AdmissionError::SpaceNotFound(_) => JoinRejectReason::SpaceNotFound,
            AdmissionError::AlreadyInSpace(_) => JoinRejectReason::AlreadyInSpace,
        }
    }
}

/// A session that has been admitted and registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub user_id: String,
    pub avatar_key: String,
    pub room_id: String,
    pub position: Position,
    pub bounds: SpaceBounds,
    /// Room size right after this session was added
    pub member_count: usize,
}

/// Rules applied to every join.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    pub allowed_roles: Vec<String>,
    pub default_avatar: String,
    pub spawn: SpawnStrategy,
    pub tile_size: i64,
}

pub struct AdmissionController {
    verifier: Arc<dyn TokenVerifier>,
    directory: Arc<dyn SpaceDirectory>,
    registry: Arc<RoomRegistry>,
    policy: AdmissionPolicy,
}

impl AdmissionController {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        directory: Arc<dyn SpaceDirectory>,
        registry: Arc<RoomRegistry>,
        policy: AdmissionPolicy,
    ) -> Self {
        Self {
            verifier,
            directory,
            registry,
            policy,
        }
    }

    /// Validates a join and, on success, registers `client` in the room.
    ///
    /// Registration sends the `space-joined` snapshot to the client and
    /// `user-joined` to the rest of the room before this returns.
    pub async fn admit(&self, client: &ClientHandle, request: &JoinRequest) -> Result<Admission, AdmissionError> {
        let token = request.token.as_deref().unwrap_or_default();
        let identity = self.verifier.verify(token).await?;
        if !self.policy.allowed_roles.iter().any(|role| *role == identity.role) {
            return Err(AuthError::RoleNotPermitted(identity.role).into());
        }

        let bounds = self.resolve_bounds(&request.space_id).await?;

        let avatar_key = identity
            .avatar_key
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| self.policy.default_avatar.clone());

        let registration = self
            .registry
            .register(
                &request.space_id,
                bounds,
                NewMember {
                    user_id: identity.user_id.clone(),
                    avatar_key: avatar_key.clone(),
                    client: client.clone(),
                },
                self.policy.spawn,
                self.policy.tile_size,
            )
            .await
            .map_err(|RegistryError::AlreadyPresent(user)| AdmissionError::AlreadyInSpace(user))?;

        Ok(Admission {
            user_id: identity.user_id,
            avatar_key,
            room_id: request.space_id.clone(),
            position: registration.position,
            bounds: registration.bounds,
            member_count: registration.member_count,
        })
    }

    /// Live rooms answer from memory; otherwise the metadata service is asked.
    async fn resolve_bounds(&self, space_id: &str) -> Result<SpaceBounds, AdmissionError> {
        if space_id.is_empty() {
            return Err(AdmissionError::SpaceNotFound(String::new()));
        }
        if let Some(bounds) = self.registry.bounds(space_id) {
            return Ok(bounds);
        }
        match self.directory.lookup(space_id).await {
            Ok(Some(bounds)) => Ok(bounds),
            Ok(None) => Err(AdmissionError::SpaceNotFound(space_id.to_string())),
            Err(e) => {
                warn!("Space lookup for {} failed: {}", space_id, e);
                Err(AdmissionError::SpaceNotFound(space_id.to_string()))
            }
        }
    }
}
