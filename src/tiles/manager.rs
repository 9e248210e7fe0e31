use serde::Serialize;

use crate::foundation::ids::TileId;
use crate::scene::{LayerTreeImpl, layer_pairs};
use crate::tiles::priority::TreePriority;
use crate::tiles::priority_queue::RasterTilePriorityQueue;
use crate::tiles::tile::Tile;

/// The raster subsystem: receives tiles in global priority order.
pub trait RasterWorker {
    /// Rasterize `tile`. Returns `true` if its content is ready to draw once this returns.
    fn rasterize(&mut self, tile: &Tile) -> bool;
}

/// Rasterizes every tile immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineRasterWorker;

impl RasterWorker for InlineRasterWorker {
    fn rasterize(&mut self, _tile: &Tile) -> bool {
        true
    }
}

/// Result of one prepare-tiles pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PrepareTilesReport {
    /// Tiles handed to the worker, in the order they were scheduled.
    pub scheduled: Vec<TileId>,
    /// The pass stopped because it ran out of budget, not out of tiles.
    pub budget_exhausted: bool,
    pub ready_to_activate: bool,
    pub ready_to_draw: bool,
}

/// Owns the raster worker and feeds it from a [`RasterTilePriorityQueue`].
pub struct TileManager {
    worker: Box<dyn RasterWorker>,
    passes: u64,
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileManager")
            .field("passes", &self.passes)
            .finish_non_exhaustive()
    }
}

impl Default for TileManager {
    fn default() -> Self {
        Self::new(Box::new(InlineRasterWorker))
    }
}

impl TileManager {
    pub fn new(worker: Box<dyn RasterWorker>) -> Self {
        Self { worker, passes: 0 }
    }

    /// Number of prepare-tiles passes run so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Schedule up to `budget` tiles, highest priority first.
    #[tracing::instrument(skip(self, active, pending), fields(pass = self.passes))]
    pub fn prepare_tiles(
        &mut self,
        active: &LayerTreeImpl,
        pending: Option<&LayerTreeImpl>,
        tree_priority: TreePriority,
        budget: usize,
    ) -> PrepareTilesReport {
        self.passes += 1;
        let pairs = layer_pairs(active, pending);
        let mut queue = RasterTilePriorityQueue::new();
        queue.build(&pairs, tree_priority);

        let mut scheduled = Vec::new();
        while !queue.is_empty() && scheduled.len() < budget {
            let tile = queue.top();
            if self.worker.rasterize(tile) {
                tile.mark_ready_to_draw();
            }
            scheduled.push(tile.id());
            queue.pop();
        }
        let budget_exhausted = !queue.is_empty();
        queue.reset();

        let report = PrepareTilesReport {
            scheduled,
            budget_exhausted,
            ready_to_activate: pending.is_none_or(is_ready_to_activate),
            ready_to_draw: is_ready_to_draw(active),
        };
        tracing::debug!(
            scheduled = report.scheduled.len(),
            budget_exhausted = report.budget_exhausted,
            ready_to_draw = report.ready_to_draw,
            "prepare tiles"
        );
        report
    }

    /// Rasterize every remaining tile inline, forcing each one ready. Returns how many were
    /// rasterized.
    #[tracing::instrument(skip_all)]
    pub fn synchronously_initialize_all_tiles(
        &mut self,
        active: &LayerTreeImpl,
        pending: Option<&LayerTreeImpl>,
        tree_priority: TreePriority,
    ) -> usize {
        let pairs = layer_pairs(active, pending);
        let mut queue = RasterTilePriorityQueue::new();
        queue.build(&pairs, tree_priority);
        let mut count = 0;
        for tile in &mut queue {
            self.worker.rasterize(tile);
            tile.mark_ready_to_draw();
            count += 1;
        }
        count
    }
}

fn is_ready_to_activate(pending: &LayerTreeImpl) -> bool {
    pending
        .layers()
        .flat_map(|l| l.tiles())
        .all(|t| !t.required_for_activation() || t.is_ready_to_draw())
}

fn is_ready_to_draw(active: &LayerTreeImpl) -> bool {
    active
        .layers()
        .flat_map(|l| l.tiles())
        .all(|t| !t.required_for_draw() || t.is_ready_to_draw())
}
