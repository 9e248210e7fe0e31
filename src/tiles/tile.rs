use std::cell::Cell;

use kurbo::Rect;
use serde::{Deserialize, Serialize};

use crate::foundation::ids::{LayerId, TileId};
use crate::tiles::priority::{PriorityBin, TilePriority, TreePriority, WhichTree};

/// Edge length, in layer pixels, of one tile.
pub const DEFAULT_TILE_SIZE: f64 = 256.0;

/// A rectangular unit of layer content that needs rasterization.
///
/// Tiles are owned by the layer tiling that created them (behind an `Rc`, so a tile whose content
/// is identical on both trees can be reached from both). Queues only ever hold borrowed `&Tile`s.
#[derive(Debug)]
pub struct Tile {
    id: TileId,
    layer: LayerId,
    content_rect: Rect,
    priorities: Cell<[TilePriority; 2]>,
    shared: Cell<bool>,
    ready_to_draw: Cell<bool>,
}

impl Tile {
    pub fn new(id: TileId, layer: LayerId, content_rect: Rect) -> Self {
        Self {
            id,
            layer,
            content_rect,
            priorities: Cell::new([TilePriority::default(); 2]),
            shared: Cell::new(false),
            ready_to_draw: Cell::new(false),
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn content_rect(&self) -> Rect {
        self.content_rect
    }

    /// Priority of this tile as seen from `tree`.
    pub fn priority(&self, tree: WhichTree) -> TilePriority {
        self.priorities.get()[tree.index()]
    }

    pub fn set_priority(&self, tree: WhichTree, priority: TilePriority) {
        let mut all = self.priorities.get();
        all[tree.index()] = priority;
        self.priorities.set(all);
    }

    /// The priority record relevant to the global scheduling mode.
    pub fn priority_for_tree_priority(&self, tree_priority: TreePriority) -> TilePriority {
        match tree_priority {
            TreePriority::SmoothnessTakesPriority => self.priority(WhichTree::Active),
            TreePriority::NewContentTakesPriority => self.priority(WhichTree::Pending),
            TreePriority::SamePriorityForBothTrees => TilePriority::combine(
                &self.priority(WhichTree::Active),
                &self.priority(WhichTree::Pending),
            ),
        }
    }

    /// `true` when the same tile object is reachable from both trees.
    pub fn is_shared(&self) -> bool {
        self.shared.get()
    }

    pub fn set_shared(&self, shared: bool) {
        self.shared.set(shared);
    }

    pub fn is_ready_to_draw(&self) -> bool {
        self.ready_to_draw.get()
    }

    pub(crate) fn mark_ready_to_draw(&self) {
        self.ready_to_draw.set(true);
    }

    /// Activation blocks on pending-tree tiles that are visible now.
    pub fn required_for_activation(&self) -> bool {
        self.priority(WhichTree::Pending).priority_bin == PriorityBin::Now
    }

    /// Drawing the active tree at full quality needs its visible tiles.
    pub fn required_for_draw(&self) -> bool {
        self.priority(WhichTree::Active).priority_bin == PriorityBin::Now
    }
}

/// Main-side description of one tile of a layer: grid position plus the priority the embedder
/// computed for it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileSpec {
    pub col: i32,
    pub row: i32,
    pub priority: TilePriority,
}

impl TileSpec {
    pub fn new(col: i32, row: i32, priority: TilePriority) -> Self {
        Self { col, row, priority }
    }

    /// Layer-space rect covered by this grid cell.
    pub fn content_rect(&self, tile_size: f64) -> Rect {
        let x0 = f64::from(self.col) * tile_size;
        let y0 = f64::from(self.row) * tile_size;
        Rect::new(x0, y0, x0 + tile_size, y0 + tile_size)
    }
}
