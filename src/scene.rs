//! Layer trees as seen by the tile scheduler, plus the JSON scene format used by fixtures and the
//! CLI.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::rc::Rc;

use kurbo::Rect;
use serde::{Deserialize, Serialize};

use crate::foundation::error::{TesseraError, TesseraResult};
use crate::foundation::ids::{LayerId, SourceFrameNumber, TileId};
use crate::host::swap_promise::{DidNotSwapReason, SwapPromise};
use crate::tiles::paired_queue::LayerPair;
use crate::tiles::priority::{PriorityBin, TilePriority, TreePriority, WhichTree};
use crate::tiles::raster_queue::{
    RasterSource, RasterTraversal, SortedRasterQueue, TilingSetRasterQueue,
};
use crate::tiles::tile::Tile;

/// One picture layer on one tree: an ordered set of tiles.
#[derive(Debug)]
pub struct PictureLayerImpl {
    id: LayerId,
    tree: WhichTree,
    tiles: Vec<Rc<Tile>>,
    traversal: RasterTraversal,
    content_version: u64,
    animating: bool,
}

impl PictureLayerImpl {
    pub fn new(id: LayerId, tree: WhichTree) -> Self {
        Self {
            id,
            tree,
            tiles: Vec::new(),
            traversal: RasterTraversal::Priority,
            content_version: 0,
            animating: false,
        }
    }

    pub fn with_traversal(mut self, traversal: RasterTraversal) -> Self {
        self.traversal = traversal;
        self
    }

    pub fn with_content_version(mut self, content_version: u64) -> Self {
        self.content_version = content_version;
        self
    }

    pub fn with_animating(mut self, animating: bool) -> Self {
        self.animating = animating;
        self
    }

    pub fn push_tile(&mut self, tile: Rc<Tile>) {
        self.tiles.push(tile);
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn tree(&self) -> WhichTree {
        self.tree
    }

    pub fn tiles(&self) -> &[Rc<Tile>] {
        &self.tiles
    }

    pub fn content_version(&self) -> u64 {
        self.content_version
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    /// Visible tiles of this layer that are still missing raster.
    pub fn missing_now_tiles(&self) -> usize {
        self.tiles
            .iter()
            .filter(|t| {
                t.priority(self.tree).priority_bin == PriorityBin::Now
                    && !t.is_ready_to_draw()
            })
            .count()
    }
}

impl RasterSource for PictureLayerImpl {
    fn create_raster_queue<'a>(
        &'a self,
        prioritize_low_res: bool,
    ) -> Box<dyn TilingSetRasterQueue<'a> + 'a> {
        Box::new(SortedRasterQueue::new(
            self.tiles.iter().map(Rc::as_ref),
            self.tree,
            prioritize_low_res,
            self.traversal,
        ))
    }
}

/// One layer tree (active or pending) on the impl side.
pub struct LayerTreeImpl {
    tree: WhichTree,
    layers: BTreeMap<LayerId, PictureLayerImpl>,
    swap_promises: Vec<Box<dyn SwapPromise>>,
    source_frame_number: SourceFrameNumber,
    needs_update_draw_properties: bool,
}

impl std::fmt::Debug for LayerTreeImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerTreeImpl")
            .field("tree", &self.tree)
            .field("layers", &self.layers)
            .field("swap_promises", &self.swap_promises.len())
            .field("source_frame_number", &self.source_frame_number)
            .finish()
    }
}

impl LayerTreeImpl {
    pub fn new(tree: WhichTree) -> Self {
        Self {
            tree,
            layers: BTreeMap::new(),
            swap_promises: Vec::new(),
            source_frame_number: SourceFrameNumber::default(),
            needs_update_draw_properties: false,
        }
    }

    pub fn tree(&self) -> WhichTree {
        self.tree
    }

    pub fn insert_layer(&mut self, layer: PictureLayerImpl) {
        debug_assert_eq!(layer.tree, self.tree, "layer inserted into the wrong tree");
        self.layers.insert(layer.id, layer);
        self.needs_update_draw_properties = true;
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Option<PictureLayerImpl> {
        self.needs_update_draw_properties = true;
        self.layers.remove(&id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&PictureLayerImpl> {
        self.layers.get(&id)
    }

    pub fn layers(&self) -> impl Iterator<Item = &PictureLayerImpl> {
        self.layers.values()
    }

    pub fn has_root_layer(&self) -> bool {
        !self.layers.is_empty()
    }

    pub fn tile_count(&self) -> usize {
        self.layers.values().map(|l| l.tiles.len()).sum()
    }

    pub fn source_frame_number(&self) -> SourceFrameNumber {
        self.source_frame_number
    }

    pub(crate) fn set_source_frame_number(&mut self, frame: SourceFrameNumber) {
        self.source_frame_number = frame;
    }

    pub fn needs_update_draw_properties(&self) -> bool {
        self.needs_update_draw_properties
    }

    pub(crate) fn update_draw_properties(&mut self) {
        self.needs_update_draw_properties = false;
    }

    /// Visible tiles on this tree that still need raster.
    pub fn missing_now_tiles(&self) -> usize {
        self.layers.values().map(PictureLayerImpl::missing_now_tiles).sum()
    }

    pub(crate) fn queue_swap_promises(&mut self, promises: Vec<Box<dyn SwapPromise>>) {
        self.swap_promises.extend(promises);
    }

    pub fn swap_promise_count(&self) -> usize {
        self.swap_promises.len()
    }

    /// Resolve every outstanding promise as swapped.
    pub(crate) fn finish_swap_promises(&mut self) {
        for mut promise in self.swap_promises.drain(..) {
            promise.did_swap();
        }
    }

    /// Resolve every outstanding promise as not swapped.
    pub fn break_swap_promises(&mut self, reason: DidNotSwapReason) {
        for mut promise in self.swap_promises.drain(..) {
            promise.did_not_swap(reason);
        }
    }
}

/// Pair layers of the active and pending trees by id, in ascending id order.
pub fn layer_pairs<'a>(
    active: &'a LayerTreeImpl,
    pending: Option<&'a LayerTreeImpl>,
) -> Vec<LayerPair<'a>> {
    let mut ids: BTreeSet<LayerId> = active.layers.keys().copied().collect();
    if let Some(pending) = pending {
        ids.extend(pending.layers.keys().copied());
    }
    ids.into_iter()
        .map(|id| LayerPair {
            active: active.layer(id).map(|l| l as &dyn RasterSource),
            pending: pending
                .and_then(|p| p.layer(id))
                .map(|l| l as &dyn RasterSource),
        })
        .collect()
}

/// A complete two-tree scene.
#[derive(Debug)]
pub struct Scene {
    pub active: LayerTreeImpl,
    pub pending: Option<LayerTreeImpl>,
    /// Mode stored in the scene file, if any.
    pub tree_priority: Option<TreePriority>,
}

impl Scene {
    pub fn layer_pairs(&self) -> Vec<LayerPair<'_>> {
        layer_pairs(&self.active, self.pending.as_ref())
    }

    /// Every distinct tile across both trees.
    pub fn distinct_tile_count(&self) -> usize {
        let mut seen = HashSet::new();
        for tree in std::iter::once(&self.active).chain(self.pending.as_ref()) {
            for layer in tree.layers() {
                for tile in layer.tiles() {
                    seen.insert(tile.id());
                }
            }
        }
        seen.len()
    }

    pub fn from_json_str(s: &str) -> TesseraResult<Self> {
        let file: SceneFile = serde_json::from_str(s)?;
        file.into_scene()
    }

    pub fn from_path(path: impl AsRef<Path>) -> TesseraResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::scene(format!("read scene '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }
}

/// On-disk scene description.
///
/// A tile with an `active` priority lives on the active layer, one with a `pending` priority on
/// the pending layer; a tile with both is one shared tile object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub tree_priority: Option<TreePriority>,
    pub layers: Vec<SceneLayer>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SceneLayer {
    pub id: LayerId,
    #[serde(default)]
    pub traversal: RasterTraversal,
    pub tiles: Vec<SceneTile>,
    /// Pending-tree visit order, when it differs from the declaration order.
    #[serde(default)]
    pub pending_order: Option<Vec<TileId>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SceneTile {
    pub id: TileId,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub active: Option<TilePriority>,
    #[serde(default)]
    pub pending: Option<TilePriority>,
}

impl SceneFile {
    pub fn validate(&self) -> TesseraResult<()> {
        let mut tile_ids = HashSet::new();
        let mut layer_ids = HashSet::new();
        for layer in &self.layers {
            if !layer_ids.insert(layer.id) {
                return Err(TesseraError::scene(format!(
                    "duplicate layer id {}",
                    layer.id.0
                )));
            }
            for tile in &layer.tiles {
                if !tile_ids.insert(tile.id) {
                    return Err(TesseraError::scene(format!(
                        "duplicate tile id {}",
                        tile.id.0
                    )));
                }
                if tile.active.is_none() && tile.pending.is_none() {
                    return Err(TesseraError::scene(format!(
                        "tile {} is on neither tree",
                        tile.id.0
                    )));
                }
                for priority in tile.active.iter().chain(tile.pending.iter()) {
                    if priority.distance_to_visible.is_nan() || priority.distance_to_visible < 0.0
                    {
                        return Err(TesseraError::scene(format!(
                            "tile {} has an invalid distance_to_visible",
                            tile.id.0
                        )));
                    }
                }
            }
            if let Some(order) = &layer.pending_order {
                let pending: HashSet<TileId> = layer
                    .tiles
                    .iter()
                    .filter(|t| t.pending.is_some())
                    .map(|t| t.id)
                    .collect();
                let listed: HashSet<TileId> = order.iter().copied().collect();
                if listed != pending || order.len() != pending.len() {
                    return Err(TesseraError::scene(format!(
                        "layer {} pending_order must list each pending tile exactly once",
                        layer.id.0
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn into_scene(self) -> TesseraResult<Scene> {
        self.validate()?;

        let mut active = LayerTreeImpl::new(WhichTree::Active);
        let mut pending_tree = LayerTreeImpl::new(WhichTree::Pending);

        for layer in self.layers {
            let mut active_layer =
                PictureLayerImpl::new(layer.id, WhichTree::Active).with_traversal(layer.traversal);
            let mut pending_layer =
                PictureLayerImpl::new(layer.id, WhichTree::Pending).with_traversal(layer.traversal);
            let mut pending_by_id = BTreeMap::new();

            for desc in &layer.tiles {
                let tile = Rc::new(Tile::new(
                    desc.id,
                    layer.id,
                    desc.rect.unwrap_or(Rect::ZERO),
                ));
                if let Some(p) = desc.active {
                    tile.set_priority(WhichTree::Active, p);
                }
                if let Some(p) = desc.pending {
                    tile.set_priority(WhichTree::Pending, p);
                }
                tile.set_shared(desc.active.is_some() && desc.pending.is_some());

                if desc.active.is_some() {
                    active_layer.push_tile(Rc::clone(&tile));
                }
                if desc.pending.is_some() {
                    pending_by_id.insert(desc.id, Rc::clone(&tile));
                    if layer.pending_order.is_none() {
                        pending_layer.push_tile(tile);
                    }
                }
            }

            if let Some(order) = &layer.pending_order {
                for id in order {
                    if let Some(tile) = pending_by_id.remove(id) {
                        pending_layer.push_tile(tile);
                    }
                }
            }

            if !active_layer.tiles().is_empty() {
                active.insert_layer(active_layer);
            }
            if !pending_layer.tiles().is_empty() {
                pending_tree.insert_layer(pending_layer);
            }
        }

        let pending = pending_tree.has_root_layer().then_some(pending_tree);
        Ok(Scene {
            active,
            pending,
            tree_priority: self.tree_priority,
        })
    }
}
