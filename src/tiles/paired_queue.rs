#[cfg(debug_assertions)]
use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

#[cfg(debug_assertions)]
use crate::foundation::ids::TileId;
use crate::tiles::priority::{PriorityBin, TreePriority, WhichTree};
use crate::tiles::raster_queue::{RasterSource, TilingSetRasterQueue};
use crate::tiles::tile::Tile;
use crate::tiles::tree_priority::{higher_priority_tree, higher_priority_tree_for_shared};

/// A layer as it exists on the active and/or pending tree.
#[derive(Clone, Copy, Default)]
pub struct LayerPair<'a> {
    pub active: Option<&'a dyn RasterSource>,
    pub pending: Option<&'a dyn RasterSource>,
}

impl fmt::Debug for LayerPair<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerPair")
            .field("active", &self.active.is_some())
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

type BoxedRasterQueue<'a> = Box<dyn TilingSetRasterQueue<'a> + 'a>;

/// Merged, de-duplicated raster stream for one layer pair.
///
/// A shared tile shows up in both per-tree iterators; it is emitted once, by the tree that
/// [`higher_priority_tree_for_shared`] picks for it, and silently dropped from the other.
pub struct PairedTilingSetQueue<'a> {
    active_queue: Option<BoxedRasterQueue<'a>>,
    pending_queue: Option<BoxedRasterQueue<'a>>,
    has_both_layers: bool,
    #[cfg(debug_assertions)]
    returned_tiles_for_debug: HashSet<TileId>,
}

impl<'a> PairedTilingSetQueue<'a> {
    pub fn new(layer_pair: LayerPair<'a>, tree_priority: TreePriority) -> Self {
        let prioritize_low_res = tree_priority.prioritizes_low_res();
        let mut queue = Self {
            active_queue: layer_pair
                .active
                .map(|layer| layer.create_raster_queue(prioritize_low_res)),
            pending_queue: layer_pair
                .pending
                .map(|layer| layer.create_raster_queue(prioritize_low_res)),
            has_both_layers: layer_pair.active.is_some() && layer_pair.pending.is_some(),
            #[cfg(debug_assertions)]
            returned_tiles_for_debug: HashSet::new(),
        };

        if queue.has_both_layers {
            queue.skip_tiles_returned_by_twin(tree_priority);
        }

        tracing::trace!(state = ?queue.state(), "paired tiling set queue built");
        queue
    }

    pub fn is_empty(&self) -> bool {
        self.active_queue.as_ref().is_none_or(|q| q.is_empty())
            && self.pending_queue.as_ref().is_none_or(|q| q.is_empty())
    }

    /// The front tile of the tree [`next_tile_iterator_tree`](Self::next_tile_iterator_tree)
    /// selects.
    pub fn top(&self, tree_priority: TreePriority) -> &'a Tile {
        assert!(!self.is_empty(), "top() called on an empty paired queue");

        let next_tree = self.next_tile_iterator_tree(tree_priority);
        let tile = self.non_empty_queue(next_tree).top();
        #[cfg(debug_assertions)]
        debug_assert!(
            !self.returned_tiles_for_debug.contains(&tile.id()),
            "tile {:?} was already returned by this paired queue",
            tile.id()
        );
        tile
    }

    pub fn pop(&mut self, tree_priority: TreePriority) {
        assert!(!self.is_empty(), "pop() called on an empty paired queue");

        let next_tree = self.next_tile_iterator_tree(tree_priority);
        let queue = self.non_empty_queue_mut(next_tree);
        #[cfg(debug_assertions)]
        let popped = queue.top().id();
        queue.pop();
        #[cfg(debug_assertions)]
        {
            let first_time = self.returned_tiles_for_debug.insert(popped);
            debug_assert!(first_time, "tile {popped:?} emitted twice by a paired queue");
        }

        if self.has_both_layers {
            self.skip_tiles_returned_by_twin(tree_priority);
        }

        #[cfg(debug_assertions)]
        if !self.is_empty() {
            let _ = self.top(tree_priority);
        }
    }

    /// Which tree's iterator the next tile comes from.
    pub fn next_tile_iterator_tree(&self, tree_priority: TreePriority) -> WhichTree {
        assert!(!self.is_empty(), "next tree requested from an empty paired queue");

        let active = self.active_queue.as_deref().filter(|q| !q.is_empty());
        let pending = self.pending_queue.as_deref().filter(|q| !q.is_empty());
        match (active, pending) {
            (None, _) => WhichTree::Pending,
            (Some(_), None) => WhichTree::Active,
            (Some(active), Some(pending)) => {
                higher_priority_tree(tree_priority, active.top(), pending.top())
            }
        }
    }

    /// Drop shared tiles from the iterator that does not own their emission.
    fn skip_tiles_returned_by_twin(&mut self, tree_priority: TreePriority) {
        while !self.is_empty() {
            let next_tree = self.next_tile_iterator_tree(tree_priority);
            let queue = self.non_empty_queue_mut(next_tree);

            let tile = queue.top();
            if !tile.is_shared() {
                break;
            }

            // The owning iterator usually, but due to spiral traversal not always, reaches the
            // shared tile first.
            if next_tree == higher_priority_tree_for_shared(tree_priority, tile) {
                break;
            }

            tracing::trace!(tile = ?tile.id(), tree = ?next_tree, "skipping tile owned by twin");
            queue.pop();
        }
    }

    fn non_empty_queue(&self, tree: WhichTree) -> &(dyn TilingSetRasterQueue<'a> + 'a) {
        let queue = match tree {
            WhichTree::Active => self.active_queue.as_deref(),
            WhichTree::Pending => self.pending_queue.as_deref(),
        };
        match queue {
            Some(q) if !q.is_empty() => q,
            _ => panic!("{tree:?} raster queue selected while empty"),
        }
    }

    fn non_empty_queue_mut(&mut self, tree: WhichTree) -> &mut (dyn TilingSetRasterQueue<'a> + 'a) {
        let queue = match tree {
            WhichTree::Active => self.active_queue.as_deref_mut(),
            WhichTree::Pending => self.pending_queue.as_deref_mut(),
        };
        match queue {
            Some(q) if !q.is_empty() => q,
            _ => panic!("{tree:?} raster queue selected while empty"),
        }
    }

    /// Snapshot of both iterators' fronts for tracing.
    pub fn state(&self) -> PairedQueueState {
        PairedQueueState {
            active_queue: QueueFrontState::of(self.active_queue.as_deref()),
            pending_queue: QueueFrontState::of(self.pending_queue.as_deref()),
        }
    }
}

impl fmt::Debug for PairedTilingSetQueue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairedTilingSetQueue")
            .field("has_both_layers", &self.has_both_layers)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PairedQueueState {
    pub active_queue: QueueFrontState,
    pub pending_queue: QueueFrontState,
}

/// Whether a per-tree iterator has a tile and the bins its front tile has on each tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QueueFrontState {
    pub has_tile: bool,
    pub active_priority_bin: PriorityBin,
    pub pending_priority_bin: PriorityBin,
}

impl QueueFrontState {
    fn of(queue: Option<&(dyn TilingSetRasterQueue<'_> + '_)>) -> Self {
        match queue.filter(|q| !q.is_empty()) {
            Some(q) => {
                let tile = q.top();
                Self {
                    has_tile: true,
                    active_priority_bin: tile.priority(WhichTree::Active).priority_bin,
                    pending_priority_bin: tile.priority(WhichTree::Pending).priority_bin,
                }
            }
            None => Self {
                has_tile: false,
                active_priority_bin: PriorityBin::Eventually,
                pending_priority_bin: PriorityBin::Eventually,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::ids::{LayerId, TileId};
    use crate::tiles::priority::{TilePriority, TileResolution};
    use crate::tiles::raster_queue::{RasterTraversal, SortedRasterQueue};
    use kurbo::Rect;
    use std::rc::Rc;

    struct ListedLayer {
        tree: WhichTree,
        tiles: Vec<Rc<Tile>>,
    }

    impl RasterSource for ListedLayer {
        fn create_raster_queue<'a>(
            &'a self,
            prioritize_low_res: bool,
        ) -> Box<dyn TilingSetRasterQueue<'a> + 'a> {
            Box::new(SortedRasterQueue::new(
                self.tiles.iter().map(|t| t.as_ref()),
                self.tree,
                prioritize_low_res,
                RasterTraversal::Listed,
            ))
        }
    }

    fn tile(id: u64, active: Option<PriorityBin>, pending: Option<PriorityBin>) -> Rc<Tile> {
        let t = Tile::new(TileId(id), LayerId(1), Rect::ZERO);
        if let Some(bin) = active {
            t.set_priority(
                WhichTree::Active,
                TilePriority::new(bin, TileResolution::High, 0.0),
            );
        }
        if let Some(bin) = pending {
            t.set_priority(
                WhichTree::Pending,
                TilePriority::new(bin, TileResolution::High, 0.0),
            );
        }
        t.set_shared(active.is_some() && pending.is_some());
        Rc::new(t)
    }

    fn drain(queue: &mut PairedTilingSetQueue<'_>, mode: TreePriority) -> Vec<u64> {
        let mut out = Vec::new();
        while !queue.is_empty() {
            out.push(queue.top(mode).id().0);
            queue.pop(mode);
        }
        out
    }

    #[test]
    fn single_tree_pairs_stream_their_own_tiles() {
        let layer = ListedLayer {
            tree: WhichTree::Pending,
            tiles: vec![
                tile(1, None, Some(PriorityBin::Now)),
                tile(2, None, Some(PriorityBin::Soon)),
            ],
        };
        let mut q = PairedTilingSetQueue::new(
            LayerPair {
                active: None,
                pending: Some(&layer),
            },
            TreePriority::SmoothnessTakesPriority,
        );
        assert_eq!(
            q.next_tile_iterator_tree(TreePriority::SmoothnessTakesPriority),
            WhichTree::Pending
        );
        assert_eq!(drain(&mut q, TreePriority::SmoothnessTakesPriority), vec![1, 2]);
    }

    #[test]
    fn empty_pair_is_empty() {
        let q = PairedTilingSetQueue::new(LayerPair::default(), TreePriority::default());
        assert!(q.is_empty());
    }

    #[test]
    fn shared_tile_emitted_once_regardless_of_traversal_order() {
        let shared = tile(10, Some(PriorityBin::Soon), Some(PriorityBin::Soon));
        let active_only = tile(1, Some(PriorityBin::Now), None);
        let pending_only = tile(2, None, Some(PriorityBin::Now));

        // Active reaches the shared tile first, pending reaches it last.
        let active = ListedLayer {
            tree: WhichTree::Active,
            tiles: vec![shared.clone(), active_only.clone()],
        };
        let pending = ListedLayer {
            tree: WhichTree::Pending,
            tiles: vec![pending_only.clone(), shared.clone()],
        };

        for mode in [
            TreePriority::SamePriorityForBothTrees,
            TreePriority::SmoothnessTakesPriority,
            TreePriority::NewContentTakesPriority,
        ] {
            let mut q = PairedTilingSetQueue::new(
                LayerPair {
                    active: Some(&active),
                    pending: Some(&pending),
                },
                mode,
            );
            let mut out = drain(&mut q, mode);
            assert_eq!(out.len(), 3, "mode {mode:?} emitted {out:?}");
            out.sort_unstable();
            assert_eq!(out, vec![1, 2, 10]);
        }
    }

    #[test]
    fn new_content_mode_drains_pending_first() {
        let active = ListedLayer {
            tree: WhichTree::Active,
            tiles: vec![tile(1, Some(PriorityBin::Now), None)],
        };
        let pending = ListedLayer {
            tree: WhichTree::Pending,
            tiles: vec![tile(2, None, Some(PriorityBin::Eventually))],
        };
        let mut q = PairedTilingSetQueue::new(
            LayerPair {
                active: Some(&active),
                pending: Some(&pending),
            },
            TreePriority::NewContentTakesPriority,
        );
        assert_eq!(drain(&mut q, TreePriority::NewContentTakesPriority), vec![2, 1]);
    }

    #[test]
    fn smoothness_lets_pending_now_preempt_active_eventually() {
        let active = ListedLayer {
            tree: WhichTree::Active,
            tiles: vec![tile(1, Some(PriorityBin::Eventually), None)],
        };
        let pending = ListedLayer {
            tree: WhichTree::Pending,
            tiles: vec![tile(2, None, Some(PriorityBin::Now))],
        };
        let mut q = PairedTilingSetQueue::new(
            LayerPair {
                active: Some(&active),
                pending: Some(&pending),
            },
            TreePriority::SmoothnessTakesPriority,
        );
        assert_eq!(drain(&mut q, TreePriority::SmoothnessTakesPriority), vec![2, 1]);
    }

    #[test]
    #[should_panic(expected = "empty paired queue")]
    fn top_on_empty_panics() {
        let q = PairedTilingSetQueue::new(LayerPair::default(), TreePriority::default());
        let _ = q.top(TreePriority::default());
    }

    #[test]
    fn state_reports_fronts() {
        let active = ListedLayer {
            tree: WhichTree::Active,
            tiles: vec![tile(1, Some(PriorityBin::Now), None)],
        };
        let q = PairedTilingSetQueue::new(
            LayerPair {
                active: Some(&active),
                pending: None,
            },
            TreePriority::default(),
        );
        let state = q.state();
        assert!(state.active_queue.has_tile);
        assert_eq!(state.active_queue.active_priority_bin, PriorityBin::Now);
        assert!(!state.pending_queue.has_tile);
    }
}
