//! Main-role side of the compositor: the layer tree the embedder mutates, plus everything that is
//! pushed to the impl side at commit.

pub mod resources;
pub mod swap_promise;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use kurbo::Size;
use serde::{Deserialize, Serialize};

use crate::foundation::ids::{LayerId, SourceFrameNumber};
use crate::host::resources::{PrioritizedResourceManager, ResourceUpdateQueue, ResourceUpload};
use crate::host::swap_promise::{DidNotSwapReason, SwapPromise};
use crate::host_impl::LayerTreeHostImpl;
use crate::host_impl::output_surface::OutputSurface;
use crate::scheduler::begin_frame::BeginFrameArgs;
use crate::settings::LayerTreeSettings;
use crate::tiles::manager::RasterWorker;
use crate::tiles::priority::PriorityBin;
use crate::tiles::raster_queue::RasterTraversal;
use crate::tiles::tile::TileSpec;

/// Lifecycle hooks of the main-side host, implemented by the embedder.
///
/// Every hook defaults to a no-op.
pub trait LayerTreeHostClient {
    fn will_begin_main_frame(&mut self) {}
    fn begin_main_frame(&mut self, _args: &BeginFrameArgs) {}
    fn animate(&mut self, _frame_time: Duration) {}
    fn layout(&mut self) {}
    fn did_begin_main_frame(&mut self) {}
    fn begin_main_frame_not_expected_soon(&mut self) {}
    fn will_commit(&mut self) {}
    fn did_commit(&mut self) {}
    fn did_commit_and_draw_frame(&mut self) {}
    fn did_complete_swap_buffers(&mut self) {}
    fn did_receive_animation_events(&mut self, _events: &[AnimationEvent]) {}

    /// Asked for a new output surface. Returning one binds it synchronously; returning `None`
    /// means the embedder will call `SingleThreadProxy::set_output_surface` later.
    fn request_new_output_surface(&mut self) -> Option<Box<dyn OutputSurface>> {
        None
    }
    fn did_initialize_output_surface(&mut self) {}
    fn did_fail_to_initialize_output_surface(&mut self) {}
}

/// Impl-side animation notification delivered back to the main side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AnimationEvent {
    pub layer: LayerId,
    pub monotonic_time: Duration,
}

/// A picture layer as the embedder describes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostLayer {
    pub id: LayerId,
    #[serde(default)]
    pub tiles: Vec<TileSpec>,
    #[serde(default)]
    pub traversal: RasterTraversal,
    #[serde(default)]
    pub animating: bool,
    /// Bumped by the host whenever the tile grid changes or the layer is invalidated.
    #[serde(skip)]
    content_version: u64,
}

impl HostLayer {
    pub fn new(id: LayerId, tiles: Vec<TileSpec>) -> Self {
        Self {
            id,
            tiles,
            traversal: RasterTraversal::default(),
            animating: false,
            content_version: 0,
        }
    }

    pub fn with_traversal(mut self, traversal: RasterTraversal) -> Self {
        self.traversal = traversal;
        self
    }

    pub fn with_animating(mut self, animating: bool) -> Self {
        self.animating = animating;
        self
    }

    pub fn content_version(&self) -> u64 {
        self.content_version
    }

    fn same_content_as(&self, other: &HostLayer) -> bool {
        self.traversal == other.traversal
            && self.tiles.len() == other.tiles.len()
            && self
                .tiles
                .iter()
                .zip(&other.tiles)
                .all(|(a, b)| (a.col, a.row) == (b.col, b.row))
    }

    /// Most urgent bin among this layer's tiles, as a texture priority value.
    fn texture_priority(&self) -> u32 {
        self.tiles
            .iter()
            .map(|t| t.priority.priority_bin)
            .min()
            .unwrap_or(PriorityBin::Eventually) as u32
    }
}

/// The main-side layer tree host.
pub struct LayerTreeHost {
    settings: LayerTreeSettings,
    client: Box<dyn LayerTreeHostClient>,
    layers: BTreeMap<LayerId, HostLayer>,
    dirty_layers: BTreeSet<LayerId>,
    last_content_version: u64,
    viewport_size: Size,
    visible: bool,
    output_surface_lost: bool,
    source_frame_number: SourceFrameNumber,
    swap_promises: Vec<Box<dyn SwapPromise>>,
    animation_events: Vec<AnimationEvent>,
    contents_texture_manager: Option<PrioritizedResourceManager>,
    ui_resource_recreations: u64,
}

impl std::fmt::Debug for LayerTreeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerTreeHost")
            .field("layers", &self.layers.len())
            .field("visible", &self.visible)
            .field("output_surface_lost", &self.output_surface_lost)
            .field("source_frame_number", &self.source_frame_number)
            .field("swap_promises", &self.swap_promises.len())
            .finish_non_exhaustive()
    }
}

impl LayerTreeHost {
    pub fn new(settings: LayerTreeSettings, client: Box<dyn LayerTreeHostClient>) -> Self {
        let contents_texture_manager = (!settings.impl_side_painting).then(|| {
            PrioritizedResourceManager::new(
                settings.bytes_per_tile,
                settings.max_memory_bytes,
                settings.priority_cutoff,
            )
        });
        Self {
            settings,
            client,
            layers: BTreeMap::new(),
            dirty_layers: BTreeSet::new(),
            last_content_version: 0,
            viewport_size: Size::ZERO,
            visible: false,
            output_surface_lost: true,
            source_frame_number: SourceFrameNumber::default(),
            swap_promises: Vec::new(),
            animation_events: Vec::new(),
            contents_texture_manager,
            ui_resource_recreations: 0,
        }
    }

    pub fn settings(&self) -> &LayerTreeSettings {
        &self.settings
    }

    /// Content versions are unique across the host, so a layer removed and re-added under the
    /// same id never matches what the impl side still holds.
    fn next_content_version(&mut self) -> u64 {
        self.last_content_version += 1;
        self.last_content_version
    }

    /// Insert or replace a layer. Changing the tile grid or traversal bumps its content version;
    /// priority-only changes keep it.
    pub fn set_layer(&mut self, mut layer: HostLayer) {
        layer.content_version = match self.layers.get(&layer.id) {
            Some(old) if old.same_content_as(&layer) => old.content_version,
            _ => self.next_content_version(),
        };
        if self
            .layers
            .get(&layer.id)
            .is_none_or(|old| old.content_version != layer.content_version)
        {
            self.dirty_layers.insert(layer.id);
        }
        self.layers.insert(layer.id, layer);
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Option<HostLayer> {
        self.dirty_layers.remove(&id);
        self.layers.remove(&id)
    }

    /// Mark a layer's content as repainted.
    pub fn invalidate_layer(&mut self, id: LayerId) {
        if !self.layers.contains_key(&id) {
            return;
        }
        let version = self.next_content_version();
        if let Some(layer) = self.layers.get_mut(&id) {
            layer.content_version = version;
            self.dirty_layers.insert(id);
        }
    }

    pub fn layer(&self, id: LayerId) -> Option<&HostLayer> {
        self.layers.get(&id)
    }

    pub fn layers(&self) -> impl Iterator<Item = &HostLayer> {
        self.layers.values()
    }

    pub fn set_viewport_size(&mut self, size: Size) {
        self.viewport_size = size;
    }

    pub fn viewport_size(&self) -> Size {
        self.viewport_size
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn output_surface_lost(&self) -> bool {
        self.output_surface_lost
    }

    pub fn source_frame_number(&self) -> SourceFrameNumber {
        self.source_frame_number
    }

    pub fn queue_swap_promise(&mut self, promise: Box<dyn SwapPromise>) {
        self.swap_promises.push(promise);
    }

    pub fn num_queued_swap_promises(&self) -> usize {
        self.swap_promises.len()
    }

    pub fn break_swap_promises(&mut self, reason: DidNotSwapReason) {
        for mut promise in self.swap_promises.drain(..) {
            promise.did_not_swap(reason);
        }
    }

    pub fn contents_texture_manager(&self) -> Option<&PrioritizedResourceManager> {
        self.contents_texture_manager.as_ref()
    }

    pub fn contents_texture_manager_mut(&mut self) -> Option<&mut PrioritizedResourceManager> {
        self.contents_texture_manager.as_mut()
    }

    pub fn animation_events(&self) -> &[AnimationEvent] {
        &self.animation_events
    }

    pub fn ui_resource_recreations(&self) -> u64 {
        self.ui_resource_recreations
    }

    pub fn create_layer_tree_host_impl(&self, worker: Box<dyn RasterWorker>) -> LayerTreeHostImpl {
        LayerTreeHostImpl::new(self.settings.clone(), worker)
    }

    pub(crate) fn will_begin_main_frame(&mut self) {
        self.client.will_begin_main_frame();
    }

    pub(crate) fn begin_main_frame(&mut self, args: &BeginFrameArgs) {
        self.client.begin_main_frame(args);
    }

    pub(crate) fn animate_layers(&mut self, frame_time: Duration) {
        self.client.animate(frame_time);
    }

    pub(crate) fn layout(&mut self) {
        self.client.layout();
    }

    /// Collect uploads for every layer whose content changed since the last update. Returns
    /// `true` if anything was queued.
    pub(crate) fn update_layers(&mut self, queue: &mut ResourceUpdateQueue) -> bool {
        if let Some(manager) = self.contents_texture_manager.as_mut() {
            manager.clear_requests();
            for layer in self.layers.values() {
                manager.request_textures(layer.id, layer.texture_priority(), layer.tiles.len());
            }
        }
        for id in std::mem::take(&mut self.dirty_layers) {
            if let Some(layer) = self.layers.get(&id) {
                queue.push(ResourceUpload {
                    layer: id,
                    tiles: layer.tiles.len(),
                });
            }
        }
        !queue.is_empty()
    }

    pub(crate) fn will_commit(&mut self) {
        self.client.will_commit();
    }

    pub(crate) fn begin_commit_on_impl_thread(&mut self, host_impl: &mut LayerTreeHostImpl) {
        if let Some(manager) = self.contents_texture_manager.as_mut() {
            manager.reduce_memory_on_impl_thread(
                host_impl.memory_allocation_limit_bytes(),
                host_impl.memory_allocation_priority_cutoff(),
            );
        }
    }

    pub(crate) fn finish_commit_on_impl_thread(&mut self, host_impl: &mut LayerTreeHostImpl) {
        host_impl.set_viewport_size(self.viewport_size);
        host_impl.commit_layers(self.layers.values(), self.source_frame_number);
        host_impl.queue_swap_promises(std::mem::take(&mut self.swap_promises));
    }

    pub(crate) fn commit_complete(&mut self) {
        self.source_frame_number = self.source_frame_number.next();
        self.client.did_commit();
    }

    pub(crate) fn did_begin_main_frame(&mut self) {
        self.client.did_begin_main_frame();
    }

    pub(crate) fn begin_main_frame_not_expected_soon(&mut self) {
        self.client.begin_main_frame_not_expected_soon();
    }

    pub(crate) fn did_commit_and_draw_frame(&mut self) {
        self.client.did_commit_and_draw_frame();
    }

    pub(crate) fn did_complete_swap_buffers(&mut self) {
        self.client.did_complete_swap_buffers();
    }

    pub(crate) fn request_new_output_surface(&mut self) -> Option<Box<dyn OutputSurface>> {
        self.client.request_new_output_surface()
    }

    pub(crate) fn did_initialize_output_surface(&mut self) {
        self.output_surface_lost = false;
        self.client.did_initialize_output_surface();
    }

    pub(crate) fn did_fail_to_initialize_output_surface(&mut self) {
        self.client.did_fail_to_initialize_output_surface();
    }

    /// Returns `false` if the surface was already lost.
    pub(crate) fn did_lose_output_surface(&mut self) -> bool {
        if self.output_surface_lost {
            return false;
        }
        self.output_surface_lost = true;
        true
    }

    pub(crate) fn delete_contents_textures_on_impl_thread(&mut self) {
        if let Some(manager) = self.contents_texture_manager.as_mut() {
            manager.delete_contents_textures();
        }
    }

    pub(crate) fn recreate_ui_resources(&mut self, host_impl: &mut LayerTreeHostImpl) {
        self.ui_resource_recreations += 1;
        host_impl.clear_evicted_ui_resources();
    }

    pub(crate) fn set_animation_events(&mut self, events: Vec<AnimationEvent>) {
        self.client.did_receive_animation_events(&events);
        self.animation_events.extend(events);
    }
}
