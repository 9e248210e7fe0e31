use std::time::Duration;

use kurbo::Rect;
use serde::Serialize;

use crate::foundation::ids::{CompositorFrameNumber, LayerId, SourceFrameNumber, TileId};

/// Outcome of one draw attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawResult {
    Success,
    /// Reserved: animating content would checkerboard.
    AbortedCheckerboardAnimations,
    /// Newly activated content still lacks visible high-resolution tiles.
    AbortedMissingHighResContent,
    /// Not visible, no output surface, no root layer or an empty viewport.
    AbortedCantDraw,
}

impl DrawResult {
    pub fn is_success(self) -> bool {
        self == DrawResult::Success
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrawQuad {
    Tile {
        layer: LayerId,
        tile: TileId,
        rect: Rect,
    },
    /// Placeholder for a tile that has no raster yet.
    Checkerboard { layer: LayerId, rect: Rect },
}

/// Everything handed to the output surface for one swap.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompositorFrame {
    pub frame_number: CompositorFrameNumber,
    pub source_frame_number: SourceFrameNumber,
    pub frame_time: Duration,
    pub damage: Rect,
    pub quads: Vec<DrawQuad>,
}

impl CompositorFrame {
    pub fn checkerboard_count(&self) -> usize {
        self.quads
            .iter()
            .filter(|q| matches!(q, DrawQuad::Checkerboard { .. }))
            .count()
    }
}

/// Scratch state threaded through prepare-to-draw, draw and swap.
#[derive(Debug, Default)]
pub struct FrameData {
    pub quads: Vec<DrawQuad>,
    pub frame: Option<CompositorFrame>,
}
