//! Impl-role side of the compositor: the tree that is drawn, its tiles and the output surface.

pub mod frame;
pub mod output_surface;

use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use kurbo::{Rect, Size};

use crate::foundation::error::TesseraResult;
use crate::foundation::ids::{CompositorFrameNumber, LayerId, SourceFrameNumber, TileIdAllocator};
use crate::host::swap_promise::SwapPromise;
use crate::host::{AnimationEvent, HostLayer};
use crate::host_impl::frame::{CompositorFrame, DrawQuad, DrawResult, FrameData};
use crate::host_impl::output_surface::OutputSurface;
use crate::scheduler::CommitEarlyOutReason;
use crate::scheduler::begin_frame::BeginFrameArgs;
use crate::scene::{LayerTreeImpl, PictureLayerImpl};
use crate::settings::LayerTreeSettings;
use crate::tiles::manager::{PrepareTilesReport, RasterWorker, TileManager};
use crate::tiles::priority::WhichTree;
use crate::tiles::tile::{DEFAULT_TILE_SIZE, Tile};

/// Requests the impl side raises for the proxy to act on after each call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImplNotification {
    CanDrawStateChanged(bool),
    SetNeedsRedraw,
    SetNeedsPrepareTiles,
    DidActivateSyncTree,
    DidPrepareTiles,
    DidSwapBuffers,
    AnimationEvents(Vec<AnimationEvent>),
}

pub struct LayerTreeHostImpl {
    settings: LayerTreeSettings,
    active_tree: LayerTreeImpl,
    tile_manager: TileManager,
    tile_ids: TileIdAllocator,
    output_surface: Option<Box<dyn OutputSurface>>,
    visible: bool,
    viewport_size: Size,
    viewport_damage: Option<Rect>,
    current_begin_frame_args: Option<BeginFrameArgs>,
    requires_high_res_to_draw: bool,
    last_can_draw: bool,
    evicted_ui_resources: bool,
    uploaded_resources: usize,
    memory_limit_bytes: u64,
    priority_cutoff: u32,
    frame_number: CompositorFrameNumber,
    last_animate_time: Option<Duration>,
    started_animations: BTreeSet<LayerId>,
    last_prepare_tiles: Option<PrepareTilesReport>,
    last_commit_early_out: Option<CommitEarlyOutReason>,
    notifications: Vec<ImplNotification>,
}

impl std::fmt::Debug for LayerTreeHostImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerTreeHostImpl")
            .field("active_tree", &self.active_tree)
            .field("has_output_surface", &self.output_surface.is_some())
            .field("visible", &self.visible)
            .field("frame_number", &self.frame_number)
            .finish_non_exhaustive()
    }
}

impl LayerTreeHostImpl {
    pub fn new(settings: LayerTreeSettings, worker: Box<dyn RasterWorker>) -> Self {
        Self {
            memory_limit_bytes: settings.max_memory_bytes,
            priority_cutoff: settings.priority_cutoff,
            settings,
            active_tree: LayerTreeImpl::new(WhichTree::Active),
            tile_manager: TileManager::new(worker),
            tile_ids: TileIdAllocator::starting_at(1),
            output_surface: None,
            visible: false,
            viewport_size: Size::ZERO,
            viewport_damage: None,
            current_begin_frame_args: None,
            requires_high_res_to_draw: false,
            last_can_draw: false,
            evicted_ui_resources: false,
            uploaded_resources: 0,
            frame_number: CompositorFrameNumber::default(),
            last_animate_time: None,
            started_animations: BTreeSet::new(),
            last_prepare_tiles: None,
            last_commit_early_out: None,
            notifications: Vec::new(),
        }
    }

    pub fn settings(&self) -> &LayerTreeSettings {
        &self.settings
    }

    pub fn active_tree(&self) -> &LayerTreeImpl {
        &self.active_tree
    }

    pub fn active_tree_mut(&mut self) -> &mut LayerTreeImpl {
        &mut self.active_tree
    }

    pub fn tile_manager(&self) -> &TileManager {
        &self.tile_manager
    }

    /// Drain the requests raised since the last call.
    pub fn take_notifications(&mut self) -> Vec<ImplNotification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        if visible {
            self.notifications.push(ImplNotification::SetNeedsRedraw);
        }
    }

    /// Bind a new output surface, replacing any previous one.
    pub fn initialize_renderer(
        &mut self,
        mut surface: Box<dyn OutputSurface>,
    ) -> TesseraResult<()> {
        self.output_surface = None;
        let bound = surface.bind_to_client();
        if bound.is_ok() {
            self.output_surface = Some(surface);
        }
        self.update_can_draw();
        bound
    }

    pub fn release_output_surface(&mut self) {
        self.output_surface = None;
        self.update_can_draw();
    }

    pub fn has_output_surface(&self) -> bool {
        self.output_surface.is_some()
    }

    pub fn can_draw(&self) -> bool {
        self.output_surface.is_some()
            && self.active_tree.has_root_layer()
            && self.viewport_size.width > 0.0
            && self.viewport_size.height > 0.0
    }

    fn update_can_draw(&mut self) {
        let can_draw = self.can_draw();
        if can_draw != self.last_can_draw {
            self.last_can_draw = can_draw;
            self.notifications
                .push(ImplNotification::CanDrawStateChanged(can_draw));
        }
    }

    pub fn set_viewport_size(&mut self, size: Size) {
        self.viewport_size = size;
        self.update_can_draw();
    }

    pub fn viewport_size(&self) -> Size {
        self.viewport_size
    }

    pub fn set_viewport_damage(&mut self, damage: Rect) {
        self.viewport_damage = Some(match self.viewport_damage {
            Some(existing) => existing.union(damage),
            None => damage,
        });
    }

    pub fn viewport_damage(&self) -> Option<Rect> {
        self.viewport_damage
    }

    pub fn will_begin_impl_frame(&mut self, args: BeginFrameArgs) {
        self.current_begin_frame_args = Some(args);
    }

    pub fn current_begin_frame_args(&self) -> BeginFrameArgs {
        self.current_begin_frame_args.unwrap_or_else(|| {
            BeginFrameArgs::new(self.last_animate_time.unwrap_or_default())
        })
    }

    pub fn reset_current_begin_frame_args_for_next_frame(&mut self) {
        self.current_begin_frame_args = None;
    }

    pub fn begin_main_frame_aborted(&mut self, reason: CommitEarlyOutReason) {
        tracing::debug!(?reason, "impl side saw main frame abort");
        self.last_commit_early_out = Some(reason);
    }

    pub fn last_commit_early_out(&self) -> Option<CommitEarlyOutReason> {
        self.last_commit_early_out
    }

    pub fn begin_commit(&mut self) {
        tracing::trace!(
            source_frame = self.active_tree.source_frame_number().0,
            "begin commit"
        );
    }

    /// Replace the active tree's layers with `layers`. Layers whose content version did not
    /// change keep their tile objects (and raster), with priorities refreshed.
    pub fn commit_layers<'h>(
        &mut self,
        layers: impl IntoIterator<Item = &'h HostLayer>,
        source_frame_number: SourceFrameNumber,
    ) {
        let mut committed = BTreeSet::new();
        for host_layer in layers {
            committed.insert(host_layer.id);
            let reusable = self
                .active_tree
                .layer(host_layer.id)
                .filter(|l| {
                    l.content_version() == host_layer.content_version()
                        && l.tiles().len() == host_layer.tiles.len()
                })
                .map(|l| l.tiles().to_vec());

            let mut layer = PictureLayerImpl::new(host_layer.id, WhichTree::Active)
                .with_traversal(host_layer.traversal)
                .with_content_version(host_layer.content_version())
                .with_animating(host_layer.animating);
            match reusable {
                Some(tiles) => {
                    for (tile, spec) in tiles.into_iter().zip(&host_layer.tiles) {
                        tile.set_priority(WhichTree::Active, spec.priority);
                        layer.push_tile(tile);
                    }
                }
                None => {
                    for spec in &host_layer.tiles {
                        let tile = Tile::new(
                            self.tile_ids.allocate(),
                            host_layer.id,
                            spec.content_rect(DEFAULT_TILE_SIZE),
                        );
                        tile.set_priority(WhichTree::Active, spec.priority);
                        layer.push_tile(Rc::new(tile));
                    }
                }
            }
            self.active_tree.insert_layer(layer);
        }

        let stale: Vec<LayerId> = self
            .active_tree
            .layers()
            .map(PictureLayerImpl::id)
            .filter(|id| !committed.contains(id))
            .collect();
        for id in stale {
            self.active_tree.remove_layer(id);
        }
        self.active_tree.set_source_frame_number(source_frame_number);
        self.update_can_draw();
    }

    pub(crate) fn queue_swap_promises(&mut self, promises: Vec<Box<dyn SwapPromise>>) {
        self.active_tree.queue_swap_promises(promises);
    }

    pub fn commit_complete(&mut self) {
        self.active_tree.update_draw_properties();
        if self.settings.impl_side_painting {
            self.notifications.push(ImplNotification::SetNeedsPrepareTiles);
        }
        self.notifications.push(ImplNotification::SetNeedsRedraw);
    }

    /// Commits land on the active tree directly, so activation only settles its draw
    /// properties before reporting back.
    pub fn activate_sync_tree(&mut self) {
        self.active_tree.update_draw_properties();
        self.notifications.push(ImplNotification::DidActivateSyncTree);
    }

    pub fn prepare_tiles(&mut self) -> PrepareTilesReport {
        let report = self.tile_manager.prepare_tiles(
            &self.active_tree,
            None,
            self.settings.tree_priority,
            self.settings.max_tiles_for_prepare,
        );
        self.notifications.push(ImplNotification::DidPrepareTiles);
        if report.budget_exhausted {
            self.notifications.push(ImplNotification::SetNeedsPrepareTiles);
        }
        if report.ready_to_draw && !report.scheduled.is_empty() {
            self.notifications.push(ImplNotification::SetNeedsRedraw);
        }
        self.last_prepare_tiles = Some(report.clone());
        report
    }

    pub fn last_prepare_tiles(&self) -> Option<&PrepareTilesReport> {
        self.last_prepare_tiles.as_ref()
    }

    pub fn synchronously_initialize_all_tiles(&mut self) -> usize {
        self.tile_manager.synchronously_initialize_all_tiles(
            &self.active_tree,
            None,
            self.settings.tree_priority,
        )
    }

    pub fn set_requires_high_res_to_draw(&mut self) {
        self.requires_high_res_to_draw = true;
    }

    pub fn requires_high_res_to_draw(&self) -> bool {
        self.requires_high_res_to_draw
    }

    pub fn animate(&mut self, frame_time: Duration) {
        self.last_animate_time = Some(frame_time);
    }

    pub fn last_animate_time(&self) -> Option<Duration> {
        self.last_animate_time
    }

    pub fn animations_are_visible(&self) -> bool {
        self.visible && self.active_tree.has_root_layer()
    }

    /// Start animations that became ready. Started layers are reported back to the main side.
    pub fn update_animation_state(&mut self, start_ready_animations: bool) {
        let animating: BTreeSet<LayerId> = self
            .active_tree
            .layers()
            .filter(|l| l.is_animating())
            .map(PictureLayerImpl::id)
            .collect();
        self.started_animations.retain(|id| animating.contains(id));
        if !start_ready_animations {
            return;
        }

        let time = self.last_animate_time.unwrap_or_default();
        let events: Vec<AnimationEvent> = animating
            .difference(&self.started_animations)
            .map(|&layer| AnimationEvent {
                layer,
                monotonic_time: time,
            })
            .collect();
        if events.is_empty() {
            return;
        }
        self.started_animations
            .extend(events.iter().map(|e| e.layer));
        self.notifications
            .push(ImplNotification::AnimationEvents(events));
    }

    #[tracing::instrument(skip_all, fields(frame = self.frame_number.0))]
    pub fn prepare_to_draw(&mut self, frame: &mut FrameData) -> DrawResult {
        if !self.can_draw() {
            return DrawResult::AbortedCantDraw;
        }
        if self.active_tree.needs_update_draw_properties() {
            self.active_tree.update_draw_properties();
        }

        let missing = self.active_tree.missing_now_tiles();
        if self.settings.impl_side_painting && self.requires_high_res_to_draw && missing > 0 {
            tracing::debug!(missing, "draw waits for high-res tiles");
            return DrawResult::AbortedMissingHighResContent;
        }

        frame.quads.clear();
        for layer in self.active_tree.layers() {
            for tile in layer.tiles() {
                let quad = if tile.is_ready_to_draw() {
                    DrawQuad::Tile {
                        layer: layer.id(),
                        tile: tile.id(),
                        rect: tile.content_rect(),
                    }
                } else {
                    DrawQuad::Checkerboard {
                        layer: layer.id(),
                        rect: tile.content_rect(),
                    }
                };
                frame.quads.push(quad);
            }
        }
        DrawResult::Success
    }

    pub fn draw_layers(&mut self, frame: &mut FrameData, frame_time: Duration) {
        self.frame_number = self.frame_number.next();
        let damage = self
            .viewport_damage
            .take()
            .unwrap_or_else(|| self.viewport_size.to_rect());
        frame.frame = Some(CompositorFrame {
            frame_number: self.frame_number,
            source_frame_number: self.active_tree.source_frame_number(),
            frame_time,
            damage,
            quads: std::mem::take(&mut frame.quads),
        });
        self.requires_high_res_to_draw = false;
    }

    pub fn did_draw_all_layers(&mut self, frame: &FrameData) {
        tracing::trace!(drew = frame.frame.is_some(), "did draw all layers");
    }

    /// Hand the drawn frame to the output surface and fulfil the active tree's swap promises.
    pub fn swap_buffers(&mut self, frame: &mut FrameData) -> bool {
        let Some(compositor_frame) = frame.frame.take() else {
            return false;
        };
        let Some(surface) = self.output_surface.as_mut() else {
            return false;
        };
        surface.swap_buffers(compositor_frame);
        self.active_tree.finish_swap_promises();
        self.notifications.push(ImplNotification::DidSwapBuffers);
        true
    }

    pub fn frame_number(&self) -> CompositorFrameNumber {
        self.frame_number
    }

    pub fn finish_all_rendering(&mut self) {
        if let Some(surface) = self.output_surface.as_mut() {
            surface.finish();
        }
    }

    pub fn set_memory_policy(&mut self, limit_bytes: u64, priority_cutoff: u32) {
        self.memory_limit_bytes = limit_bytes;
        self.priority_cutoff = priority_cutoff;
    }

    pub fn memory_allocation_limit_bytes(&self) -> u64 {
        self.memory_limit_bytes
    }

    pub fn memory_allocation_priority_cutoff(&self) -> u32 {
        self.priority_cutoff
    }

    pub(crate) fn record_uploaded_resources(&mut self, count: usize) {
        self.uploaded_resources += count;
    }

    pub fn uploaded_resource_count(&self) -> usize {
        self.uploaded_resources
    }

    pub fn evict_ui_resources(&mut self) {
        self.evicted_ui_resources = true;
    }

    pub fn evicted_ui_resources_exist(&self) -> bool {
        self.evicted_ui_resources
    }

    pub(crate) fn clear_evicted_ui_resources(&mut self) {
        self.evicted_ui_resources = false;
    }
}
