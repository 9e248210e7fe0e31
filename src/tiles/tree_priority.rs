//! Which tree's next tile wins when both trees have a candidate.

use crate::tiles::priority::{PriorityBin, TreePriority, WhichTree};
use crate::tiles::tile::Tile;

/// Decide which tree should be served next, given each tree's next candidate.
///
/// For a shared tile pass the same tile on both sides (see [`higher_priority_tree_for_shared`]).
pub fn higher_priority_tree(
    tree_priority: TreePriority,
    active_tile: &Tile,
    pending_tile: &Tile,
) -> WhichTree {
    match tree_priority {
        TreePriority::SmoothnessTakesPriority => {
            let active_priority = active_tile.priority(WhichTree::Active);
            let pending_priority = pending_tile.priority(WhichTree::Pending);

            // Down to eventually-bin work on the active tree: let the pending tree get the tiles
            // it needs for activation.
            if active_priority.priority_bin == PriorityBin::Eventually
                && pending_priority.priority_bin == PriorityBin::Now
            {
                return WhichTree::Pending;
            }
            WhichTree::Active
        }
        TreePriority::NewContentTakesPriority => WhichTree::Pending,
        TreePriority::SamePriorityForBothTrees => {
            let active_priority = active_tile.priority(WhichTree::Active);
            let pending_priority = pending_tile.priority(WhichTree::Pending);
            if active_priority.is_higher_priority_than(&pending_priority) {
                WhichTree::Active
            } else {
                WhichTree::Pending
            }
        }
    }
}

/// The tree that owns the emission of a tile reachable from both trees.
pub fn higher_priority_tree_for_shared(tree_priority: TreePriority, shared: &Tile) -> WhichTree {
    higher_priority_tree(tree_priority, shared, shared)
}
