use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::tiles::priority::{TilePriority, TileResolution, WhichTree};
use crate::tiles::tile::Tile;

/// Per-tree raster iterator: yields one layer's not-yet-rasterized tiles for one tree in that
/// tree's own local order.
///
/// `top` and `pop` on an empty queue are contract violations.
pub trait TilingSetRasterQueue<'a> {
    fn is_empty(&self) -> bool;
    fn top(&self) -> &'a Tile;
    fn pop(&mut self);
}

/// Anything that can hand out a [`TilingSetRasterQueue`] for its tiles, i.e. one layer on one
/// tree.
pub trait RasterSource {
    fn create_raster_queue<'a>(
        &'a self,
        prioritize_low_res: bool,
    ) -> Box<dyn TilingSetRasterQueue<'a> + 'a>;
}

/// How a [`SortedRasterQueue`] orders its tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterTraversal {
    /// Sort by the tree's own tile priorities.
    #[default]
    Priority,
    /// Keep the order the tiles were declared in (models spiral traversal, which makes no
    /// promise about emitting shared tiles before their twin does).
    Listed,
}

/// The in-crate per-tree iterator: a snapshot of a layer's pending raster work.
#[derive(Debug)]
pub struct SortedRasterQueue<'a> {
    // Reversed so the front is `last()`.
    tiles: Vec<&'a Tile>,
}

impl<'a> SortedRasterQueue<'a> {
    /// Snapshot `tiles` as seen from `tree`, skipping tiles that are already ready to draw.
    pub fn new(
        tiles: impl IntoIterator<Item = &'a Tile>,
        tree: WhichTree,
        prioritize_low_res: bool,
        traversal: RasterTraversal,
    ) -> Self {
        let mut tiles: Vec<&'a Tile> = tiles
            .into_iter()
            .filter(|t| !t.is_ready_to_draw())
            .collect();
        if traversal == RasterTraversal::Priority {
            tiles.sort_by(|a, b| {
                local_raster_order(&a.priority(tree), &b.priority(tree), prioritize_low_res)
            });
        }
        tiles.reverse();
        Self { tiles }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }
}

impl<'a> TilingSetRasterQueue<'a> for SortedRasterQueue<'a> {
    fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    fn top(&self) -> &'a Tile {
        match self.tiles.last() {
            Some(tile) => tile,
            None => panic!("top() called on an empty raster queue"),
        }
    }

    fn pop(&mut self) {
        assert!(
            self.tiles.pop().is_some(),
            "pop() called on an empty raster queue"
        );
    }
}

fn resolution_rank(resolution: TileResolution, prioritize_low_res: bool) -> u8 {
    match (resolution, prioritize_low_res) {
        (TileResolution::Low, true) | (TileResolution::High, false) => 0,
        (TileResolution::High, true) | (TileResolution::Low, false) => 1,
        (TileResolution::NonIdeal, _) => 2,
    }
}

/// Local order inside one tree: bin, then preferred resolution, then distance.
pub(crate) fn local_raster_order(
    a: &TilePriority,
    b: &TilePriority,
    prioritize_low_res: bool,
) -> Ordering {
    a.priority_bin
        .cmp(&b.priority_bin)
        .then_with(|| {
            resolution_rank(a.resolution, prioritize_low_res)
                .cmp(&resolution_rank(b.resolution, prioritize_low_res))
        })
        .then_with(|| a.distance_to_visible.total_cmp(&b.distance_to_visible))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::ids::{LayerId, TileId};
    use crate::tiles::priority::PriorityBin;
    use kurbo::Rect;

    fn tile(id: u64, bin: PriorityBin, res: TileResolution, d: f32) -> Tile {
        let t = Tile::new(TileId(id), LayerId(1), Rect::ZERO);
        t.set_priority(WhichTree::Active, TilePriority::new(bin, res, d));
        t
    }

    fn drain(mut q: SortedRasterQueue<'_>) -> Vec<u64> {
        let mut out = Vec::new();
        while !q.is_empty() {
            out.push(q.top().id().0);
            q.pop();
        }
        out
    }

    #[test]
    fn priority_traversal_orders_by_bin_resolution_then_distance() {
        let tiles = [
            tile(1, PriorityBin::Eventually, TileResolution::High, 0.0),
            tile(2, PriorityBin::Now, TileResolution::High, 5.0),
            tile(3, PriorityBin::Now, TileResolution::Low, 9.0),
            tile(4, PriorityBin::Now, TileResolution::NonIdeal, 0.0),
            tile(5, PriorityBin::Now, TileResolution::High, 1.0),
        ];
        let smooth = SortedRasterQueue::new(
            tiles.iter(),
            WhichTree::Active,
            true,
            RasterTraversal::Priority,
        );
        assert_eq!(drain(smooth), vec![3, 5, 2, 4, 1]);

        let normal = SortedRasterQueue::new(
            tiles.iter(),
            WhichTree::Active,
            false,
            RasterTraversal::Priority,
        );
        assert_eq!(drain(normal), vec![5, 2, 3, 4, 1]);
    }

    #[test]
    fn ready_tiles_are_skipped_and_listed_order_kept() {
        let tiles = [
            tile(1, PriorityBin::Eventually, TileResolution::High, 0.0),
            tile(2, PriorityBin::Now, TileResolution::High, 0.0),
            tile(3, PriorityBin::Soon, TileResolution::High, 0.0),
        ];
        tiles[1].mark_ready_to_draw();
        let q = SortedRasterQueue::new(
            tiles.iter(),
            WhichTree::Active,
            false,
            RasterTraversal::Listed,
        );
        assert_eq!(q.len(), 2);
        assert_eq!(drain(q), vec![1, 3]);
    }

    #[test]
    #[should_panic(expected = "empty raster queue")]
    fn top_on_empty_queue_panics() {
        let q = SortedRasterQueue::new(
            std::iter::empty(),
            WhichTree::Active,
            false,
            RasterTraversal::Priority,
        );
        let _ = q.top();
    }
}
