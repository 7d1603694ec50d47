//! Space metadata lookup.
//!
//! Room bounds come from the world-metadata service that owns spaces. The
//! server asks for them when a room is first populated and keeps them for the
//! lifetime of that room.

use crate::movement::Position;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Width and height of a room in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceBounds {
    pub width: i64,
    pub height: i64,
}

impl SpaceBounds {
    pub const fn new(width: i64, height: i64) -> Self {
        Self { width, height }
    }

    /// Whether `position` lies in `[0, width] x [0, height]`.
    pub fn contains(&self, position: Position) -> bool {
        (0..=self.width).contains(&position.x) && (0..=self.height).contains(&position.y)
    }

    /// Moves `position` to the nearest point inside the bounds.
    pub fn clamp(&self, position: Position) -> Position {
        Position::new(
            position.x.clamp(0, self.width.max(0)),
            position.y.clamp(0, self.height.max(0)),
        )
    }
}

/// Parses the `"WIDTHxHEIGHT"` form the metadata service uses for dimensions.
pub fn parse_dimensions(dimensions: &str) -> Option<SpaceBounds> {
    let (width, height) = dimensions.trim().split_once(['x', 'X'])?;
    let width: i64 = width.trim().parse().ok()?;
    let height: i64 = height.trim().parse().ok()?;
    if width < 0 || height < 0 {
        return None;
    }
    Some(SpaceBounds::new(width, height))
}

/// Failures talking to the metadata service.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("space lookup request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("space lookup returned HTTP {0}")]
    Status(u16),

    #[error("malformed space metadata: {0}")]
    Malformed(String),
}

/// Resolves a space identifier to its bounds.
///
/// `Ok(None)` means the space does not exist.
#[async_trait]
pub trait SpaceDirectory: Send + Sync {
    async fn lookup(&self, space_id: &str) -> Result<Option<SpaceBounds>, DirectoryError>;
}

/// A fixed set of spaces, usually declared in the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticSpaceDirectory {
    spaces: HashMap<String, SpaceBounds>,
}

impl StaticSpaceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_space(mut self, space_id: impl Into<String>, bounds: SpaceBounds) -> Self {
        self.insert(space_id, bounds);
        self
    }

    pub fn insert(&mut self, space_id: impl Into<String>, bounds: SpaceBounds) {
        self.spaces.insert(space_id.into(), bounds);
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

#[async_trait]
impl SpaceDirectory for StaticSpaceDirectory {
    async fn lookup(&self, space_id: &str) -> Result<Option<SpaceBounds>, DirectoryError> {
        Ok(self.spaces.get(space_id).copied())
    }
}

/// Body of `GET /api/v1/space/{spaceId}`.
///
/// The service reports `dimensions: "WxH"`; explicit `width`/`height` fields
/// are accepted too and take precedence.
#[derive(Debug, Deserialize)]
struct SpaceResponse {
    #[serde(default)]
    width: Option<i64>,
    #[serde(default)]
    height: Option<i64>,
    #[serde(default)]
    dimensions: Option<String>,
}

impl SpaceResponse {
    fn bounds(&self) -> Option<SpaceBounds> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width >= 0 && height >= 0 => {
                Some(SpaceBounds::new(width, height))
            }
            _ => self.dimensions.as_deref().and_then(parse_dimensions),
        }
    }
}

/// Looks spaces up over HTTP against the world-metadata service.
pub struct HttpSpaceDirectory {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpSpaceDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| DirectoryError::Malformed(format!("invalid base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::Malformed(format!(
                "base url {base_url} cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn space_url(&self, space_id: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "v1", "space", space_id]);
        }
        url
    }
}

#[async_trait]
impl SpaceDirectory for HttpSpaceDirectory {
    async fn lookup(&self, space_id: &str) -> Result<Option<SpaceBounds>, DirectoryError> {
        let url = self.space_url(space_id);
        debug!("🗺️ Looking up space {} at {}", space_id, url);

        let response = self.client.get(url).send().await?;
        let status = response.status();

        // The metadata service answers 400 for unknown spaces
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            return Ok(None);
        }
        if !status.is_success() {
            warn!("Space lookup for {} failed with HTTP {}", space_id, status);
            return Err(DirectoryError::Status(status.as_u16()));
        }

        let body: SpaceResponse = response.json().await?;
        body.bounds()
            .map(Some)
            .ok_or_else(|| DirectoryError::Malformed(format!("no usable dimensions for space {space_id}")))
    }
}
