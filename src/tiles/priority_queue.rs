use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::tiles::paired_queue::{LayerPair, PairedTilingSetQueue};
use crate::tiles::priority::{PriorityBin, TileResolution, TreePriority, WhichTree};
use crate::tiles::tile::Tile;

/// Ordering between two paired queues under one [`TreePriority`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct RasterOrderComparator {
    tree_priority: TreePriority,
}

impl RasterOrderComparator {
    pub(crate) fn new(tree_priority: TreePriority) -> Self {
        Self { tree_priority }
    }

    /// `true` iff `a` is strictly lower priority than `b`. Empty queues are lowest.
    pub(crate) fn is_lower(
        &self,
        a: &PairedTilingSetQueue<'_>,
        b: &PairedTilingSetQueue<'_>,
    ) -> bool {
        if a.is_empty() || b.is_empty() {
            return !b.is_empty() && a.is_empty();
        }
        self.is_lower_tile(a.top(self.tree_priority), b.top(self.tree_priority))
    }

    fn is_lower_tile(&self, a_tile: &Tile, b_tile: &Tile) -> bool {
        let a_priority = a_tile.priority_for_tree_priority(self.tree_priority);
        let b_priority = b_tile.priority_for_tree_priority(self.tree_priority);
        let prioritize_low_res = self.tree_priority.prioritizes_low_res();

        // Smoothness mode still has to surface pending NOW tiles ahead of active EVENTUALLY ones.
        if prioritize_low_res
            && a_priority.priority_bin == PriorityBin::Eventually
            && b_priority.priority_bin == PriorityBin::Eventually
        {
            let a_is_pending_now =
                a_tile.priority(WhichTree::Pending).priority_bin == PriorityBin::Now;
            let b_is_pending_now =
                b_tile.priority(WhichTree::Pending).priority_bin == PriorityBin::Now;
            if a_is_pending_now || b_is_pending_now {
                return !a_is_pending_now && b_is_pending_now;
            }
        }

        if a_priority.priority_bin == b_priority.priority_bin
            && a_priority.resolution != b_priority.resolution
        {
            if a_priority.resolution == TileResolution::NonIdeal {
                return true;
            }
            if b_priority.resolution == TileResolution::NonIdeal {
                return false;
            }
            if prioritize_low_res {
                return b_priority.resolution == TileResolution::Low;
            }
            return b_priority.resolution == TileResolution::High;
        }

        b_priority.is_higher_priority_than(&a_priority)
    }

    pub(crate) fn compare(
        &self,
        a: &PairedTilingSetQueue<'_>,
        b: &PairedTilingSetQueue<'_>,
    ) -> Ordering {
        if self.is_lower(a, b) {
            Ordering::Less
        } else if self.is_lower(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

struct HeapEntry<'a> {
    queue: PairedTilingSetQueue<'a>,
    order: RasterOrderComparator,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(&self.queue, &other.queue)
    }
}

/// Global raster order over every layer pair in a scene.
///
/// A max-heap of [`PairedTilingSetQueue`]s keyed on each queue's next tile. Popping a tile pops the
/// root queue, advances it by one tile and pushes it back, so each tile costs `O(log n)` in the
/// number of layer pairs.
///
/// The borrow on the scene (`'a`) lasts from [`build`](Self::build) until
/// [`reset`](Self::reset) or drop, which keeps the trees frozen while tiles are being scheduled.
pub struct RasterTilePriorityQueue<'a> {
    paired_queues: BinaryHeap<HeapEntry<'a>>,
    tree_priority: TreePriority,
}

impl Default for RasterTilePriorityQueue<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> RasterTilePriorityQueue<'a> {
    pub fn new() -> Self {
        Self {
            paired_queues: BinaryHeap::new(),
            tree_priority: TreePriority::default(),
        }
    }

    /// Build one paired queue per layer pair and heapify them.
    #[tracing::instrument(
        skip_all,
        fields(pairs = paired_layers.len(), tree_priority = ?tree_priority)
    )]
    pub fn build(&mut self, paired_layers: &[LayerPair<'a>], tree_priority: TreePriority) {
        self.tree_priority = tree_priority;
        let order = RasterOrderComparator::new(tree_priority);
        let mut entries = std::mem::take(&mut self.paired_queues).into_vec();
        entries.extend(paired_layers.iter().map(|pair| HeapEntry {
            queue: PairedTilingSetQueue::new(*pair, tree_priority),
            order,
        }));
        for entry in &mut entries {
            entry.order = order;
        }
        self.paired_queues = BinaryHeap::from(entries);
    }

    /// Drop every paired queue, releasing all tile borrows.
    pub fn reset(&mut self) {
        self.paired_queues.clear();
    }

    pub fn tree_priority(&self) -> TreePriority {
        self.tree_priority
    }

    pub fn is_empty(&self) -> bool {
        self.paired_queues
            .peek()
            .is_none_or(|entry| entry.queue.is_empty())
    }

    /// The tile that would be rasterized next.
    pub fn top(&self) -> &'a Tile {
        assert!(!self.is_empty(), "top() called on an empty raster tile queue");
        match self.paired_queues.peek() {
            Some(entry) => entry.queue.top(self.tree_priority),
            None => unreachable!("non-empty queue has a root"),
        }
    }

    pub fn pop(&mut self) {
        assert!(!self.is_empty(), "pop() called on an empty raster tile queue");
        if let Some(mut entry) = self.paired_queues.pop() {
            entry.queue.pop(self.tree_priority);
            self.paired_queues.push(entry);
        }
    }
}

impl<'a> Iterator for RasterTilePriorityQueue<'a> {
    type Item = &'a Tile;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_empty() {
            return None;
        }
        let tile = self.top();
        self.pop();
        Some(tile)
    }
}
