//! Server-authoritative movement validation.
//!
//! Avatars live on a grid of `tile_size` pixels. A move is accepted only when
//! it is exactly one tile along exactly one axis and the destination stays
//! inside the room bounds, edges included. Tile occupancy and collision data
//! are deliberately not consulted here.

use crate::spaces::SpaceBounds;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// A position in room pixel-space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

impl Position {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Why a proposed move was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    /// The delta is zero, diagonal, or not exactly one tile long
    #[error("move ({dx}, {dy}) is not a single grid step")]
    NotAStep { dx: i64, dy: i64 },

    /// The destination lies outside the room
    #[error("position ({x}, {y}) is outside the room bounds")]
    OutOfBounds { x: i64, y: i64 },
}

/// Checks a proposed move from `current` to `proposed`.
///
/// Returns the accepted destination, or the reason the move was refused.
/// Pure: no state is read or written.
pub fn validate_move(
    current: Position,
    proposed: Position,
    tile_size: i64,
    bounds: SpaceBounds,
) -> Result<Position, MoveRejection> {
    let (dx, dy) = match (
        proposed.x.checked_sub(current.x),
        proposed.y.checked_sub(current.y),
    ) {
        (Some(dx), Some(dy)) => (dx, dy),
        // Deltas that overflow are certainly not a single step
        _ => return Err(MoveRejection::NotAStep { dx: i64::MAX, dy: i64::MAX }),
    };

    let single_step = matches!(
        (dx.checked_abs(), dy.checked_abs()),
        (Some(adx), Some(0)) | (Some(0), Some(adx)) if adx == tile_size && tile_size > 0
    );
    if !single_step {
        return Err(MoveRejection::NotAStep { dx, dy });
    }

    if !bounds.contains(proposed) {
        return Err(MoveRejection::OutOfBounds {
            x: proposed.x,
            y: proposed.y,
        });
    }

    Ok(proposed)
}

/// How a newly admitted avatar is placed in a room.
///
/// Both strategies are deterministic so that join outcomes are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SpawnStrategy {
    /// Always spawn at the same point, clamped into the room
    Fixed { x: i64, y: i64 },
    /// First grid cell in row-major order not held by another member
    FirstFree,
}

impl Default for SpawnStrategy {
    fn default() -> Self {
        SpawnStrategy::Fixed { x: 0, y: 0 }
    }
}

impl SpawnStrategy {
    /// Picks the spawn point for a room with the given current occupants.
    pub fn place(
        &self,
        bounds: SpaceBounds,
        tile_size: i64,
        occupied: &HashSet<Position>,
    ) -> Position {
        match *self {
            SpawnStrategy::Fixed { x, y } => bounds.clamp(Position::new(x, y)),
            SpawnStrategy::FirstFree => {
                let step = tile_size.max(1) as usize;
                for y in (0..=bounds.height.max(0)).step_by(step) {
                    for x in (0..=bounds.width.max(0)).step_by(step) {
                        let cell = Position::new(x, y);
                        if !occupied.contains(&cell) {
                            return cell;
                        }
                    }
                }
                Position::default()
            }
        }
    }
}
