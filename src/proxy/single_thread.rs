use std::rc::Rc;
use std::time::Duration;

use kurbo::Rect;
use serde::Serialize;

use crate::foundation::error::TesseraResult;
use crate::host::resources::{ResourceUpdateController, ResourceUpdateQueue};
use crate::host::swap_promise::DidNotSwapReason;
use crate::host::{AnimationEvent, LayerTreeHost};
use crate::host_impl::frame::{DrawResult, FrameData};
use crate::host_impl::output_surface::OutputSurface;
use crate::host_impl::{ImplNotification, LayerTreeHostImpl};
use crate::proxy::roles::RoleTracker;
use crate::proxy::tasks::{MainTaskQueue, ProxyTask, TaskId};
use crate::proxy::timing::TimingHistory;
use crate::scheduler::begin_frame::BeginFrameArgs;
use crate::scheduler::{CommitEarlyOutReason, FrameScheduler, ScheduledAction, Scheduler};
use crate::tiles::manager::{InlineRasterWorker, RasterWorker};

/// Requests the proxy makes of the embedder. All default to no-ops.
pub trait SingleThreadClient {
    /// A composite is wanted; without a scheduler the embedder answers with
    /// [`SingleThreadProxy::composite_immediately`].
    fn schedule_composite(&mut self) {}
    fn schedule_animation(&mut self) {}
    fn did_post_swap_buffers(&mut self) {}
    fn did_abort_swap_buffers(&mut self) {}
}

/// Client that ignores every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSingleThreadClient;

impl SingleThreadClient for NullSingleThreadClient {}

#[derive(Clone, Debug)]
pub struct ProxyOptions {
    /// Post begin-main-frame and output-surface requests to the main task queue. When off, both
    /// run inline.
    pub post_tasks: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self { post_tasks: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeginMainFrameOutcome {
    Started,
    Aborted(CommitEarlyOutReason),
}

/// Snapshot of the logical frame states. More than one can hold at once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProxyState {
    pub commit_requested: bool,
    pub main_frame_in_flight: bool,
    pub commit_in_flight: bool,
    pub activation_pending: bool,
    pub draw_in_flight: bool,
}

impl ProxyState {
    pub fn is_idle(&self) -> bool {
        *self == ProxyState::default()
    }
}

/// Runs a [`LayerTreeHost`] and its [`LayerTreeHostImpl`] on one thread.
///
/// Main-role and impl-role work interleave under [`RoleTracker`] scopes. An optional
/// [`Scheduler`] decides when each step runs; without one the embedder drives frames through
/// [`composite_immediately`](Self::composite_immediately).
pub struct SingleThreadProxy {
    host: LayerTreeHost,
    host_impl: Option<LayerTreeHostImpl>,
    client: Box<dyn SingleThreadClient>,
    scheduler: Option<Box<dyn Scheduler>>,
    injected_scheduler: Option<Box<dyn Scheduler>>,
    raster_worker: Option<Box<dyn RasterWorker>>,
    task_queue: Option<MainTaskQueue>,
    output_surface_creation_task: Option<TaskId>,
    roles: Rc<RoleTracker>,
    timing_history: TimingHistory,
    queue_for_commit: Option<ResourceUpdateQueue>,
    next_frame_is_newly_committed_frame: bool,
    inside_draw: bool,
    defer_commits: bool,
    commit_requested: bool,
    main_frame_in_flight: bool,
    commit_in_flight: bool,
    activation_pending: bool,
    inside_synchronous_composite: bool,
    output_surface_creation_requested: bool,
    stopped: bool,
}

impl std::fmt::Debug for SingleThreadProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadProxy")
            .field("host", &self.host)
            .field("started", &self.host_impl.is_some())
            .field("has_scheduler", &self.scheduler.is_some())
            .field("state", &self.state())
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl SingleThreadProxy {
    pub fn new(host: LayerTreeHost, client: Box<dyn SingleThreadClient>) -> Self {
        Self::with_options(host, client, ProxyOptions::default())
    }

    pub fn with_options(
        host: LayerTreeHost,
        client: Box<dyn SingleThreadClient>,
        opts: ProxyOptions,
    ) -> Self {
        Self {
            host,
            host_impl: None,
            client,
            scheduler: None,
            injected_scheduler: None,
            raster_worker: None,
            task_queue: opts.post_tasks.then(MainTaskQueue::new),
            output_surface_creation_task: None,
            roles: RoleTracker::new(),
            timing_history: TimingHistory::default(),
            queue_for_commit: None,
            next_frame_is_newly_committed_frame: false,
            inside_draw: false,
            defer_commits: false,
            commit_requested: false,
            main_frame_in_flight: false,
            commit_in_flight: false,
            activation_pending: false,
            inside_synchronous_composite: false,
            output_surface_creation_requested: false,
            stopped: false,
        }
    }

    /// Use `scheduler` instead of the built-in one. Installed by
    /// [`set_layer_tree_host_client_ready`](Self::set_layer_tree_host_client_ready).
    pub fn with_scheduler(mut self, scheduler: Box<dyn Scheduler>) -> Self {
        self.injected_scheduler = Some(scheduler);
        self
    }

    pub fn with_raster_worker(mut self, worker: Box<dyn RasterWorker>) -> Self {
        self.raster_worker = Some(worker);
        self
    }

    fn started_impl(slot: &mut Option<LayerTreeHostImpl>) -> &mut LayerTreeHostImpl {
        match slot {
            Some(host_impl) => host_impl,
            None => panic!("SingleThreadProxy used before start or after stop"),
        }
    }

    fn impl_mut(&mut self) -> &mut LayerTreeHostImpl {
        Self::started_impl(&mut self.host_impl)
    }

    fn impl_ref(&self) -> &LayerTreeHostImpl {
        match &self.host_impl {
            Some(host_impl) => host_impl,
            None => panic!("SingleThreadProxy used before start or after stop"),
        }
    }

    #[track_caller]
    fn check_alive(&self) {
        assert!(!self.stopped, "SingleThreadProxy used after stop");
    }

    fn impl_side_painting(&self) -> bool {
        self.host.settings().impl_side_painting
    }

    pub fn host(&self) -> &LayerTreeHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut LayerTreeHost {
        self.roles.assert_main();
        &mut self.host
    }

    pub fn host_impl(&self) -> Option<&LayerTreeHostImpl> {
        self.host_impl.as_ref()
    }

    pub fn roles(&self) -> &Rc<RoleTracker> {
        &self.roles
    }

    pub fn has_scheduler(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn pending_task_count(&self) -> usize {
        self.task_queue.as_ref().map_or(0, MainTaskQueue::len)
    }

    pub fn state(&self) -> ProxyState {
        ProxyState {
            commit_requested: self.commit_requested,
            main_frame_in_flight: self.main_frame_in_flight,
            commit_in_flight: self.commit_in_flight,
            activation_pending: self.activation_pending,
            draw_in_flight: self.inside_draw,
        }
    }

    pub fn start(&mut self) {
        self.check_alive();
        assert!(self.host_impl.is_none(), "SingleThreadProxy started twice");
        let _impl = self.roles.enter_impl();
        let worker = self
            .raster_worker
            .take()
            .unwrap_or_else(|| Box::new(InlineRasterWorker));
        self.host_impl = Some(self.host.create_layer_tree_host_impl(worker));
    }

    pub fn is_started(&self) -> bool {
        self.host_impl.is_some()
    }

    pub fn finish_all_rendering(&mut self) {
        self.roles.assert_main();
        let _impl = self.roles.enter_impl();
        self.impl_mut().finish_all_rendering();
    }

    pub fn commit_to_active_tree(&self) -> bool {
        true
    }

    pub fn supports_impl_scrolling(&self) -> bool {
        false
    }

    pub fn main_frame_will_happen_for_testing(&self) -> bool {
        false
    }

    pub fn max_partial_texture_updates(&self) -> usize {
        usize::MAX
    }

    pub fn set_layer_tree_host_client_ready(&mut self) {
        self.roles.assert_main();
        self.check_alive();
        if self.scheduler.is_some() {
            return;
        }
        let _impl = self.roles.enter_impl();
        let scheduler = match self.injected_scheduler.take() {
            Some(scheduler) => Some(scheduler),
            None if self.host.settings().single_thread_proxy_scheduler => {
                Some(Box::new(FrameScheduler::new(self.host.settings())) as Box<dyn Scheduler>)
            }
            None => None,
        };
        if let Some(mut scheduler) = scheduler {
            let host_impl = self.impl_ref();
            scheduler.set_can_start();
            scheduler.set_visible(host_impl.visible());
            scheduler.set_can_draw(host_impl.can_draw());
            self.scheduler = Some(scheduler);
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.roles.assert_main();
        self.check_alive();
        self.host.set_visible(visible);
        let _impl = self.roles.enter_impl();
        let host_impl = self.impl_mut();
        host_impl.set_visible(visible);
        let visible = host_impl.visible();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_visible(visible);
        }
        self.process_impl_notifications();
    }

    pub fn set_throttle_frame_production(&mut self, throttle: bool) {
        self.roles.assert_main();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_throttle_frame_production(throttle);
        }
    }

    /// Ask the embedder for an output surface. A no-op while a request is outstanding; cancels
    /// a posted request that has not run yet.
    pub fn request_new_output_surface(&mut self) {
        self.roles.assert_main();
        self.check_alive();
        debug_assert!(self.host.output_surface_lost());
        if let Some(id) = self.output_surface_creation_task.take()
            && let Some(queue) = self.task_queue.as_mut()
        {
            queue.cancel(id);
        }
        if self.output_surface_creation_requested {
            return;
        }
        self.output_surface_creation_requested = true;
        tracing::debug!("requesting new output surface");
        if let Some(surface) = self.host.request_new_output_surface()
            && let Err(err) = self.set_output_surface(surface)
        {
            tracing::warn!(%err, "output surface failed to initialize");
        }
    }

    /// Bind `surface` in answer to a request. On failure the request stays outstanding and the
    /// host client hears `did_fail_to_initialize_output_surface`.
    pub fn set_output_surface(&mut self, surface: Box<dyn OutputSurface>) -> TesseraResult<()> {
        self.roles.assert_main();
        self.check_alive();
        debug_assert!(self.host.output_surface_lost());
        debug_assert!(self.output_surface_creation_requested);

        let result = {
            let _blocked = self.roles.block_main();
            let _impl = self.roles.enter_impl();
            self.host.delete_contents_textures_on_impl_thread();
            let result = self.impl_mut().initialize_renderer(surface);
            self.process_impl_notifications();
            result
        };

        match result {
            Ok(()) => {
                self.host.did_initialize_output_surface();
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.did_create_and_initialize_output_surface();
                } else if !self.inside_synchronous_composite {
                    self.set_needs_commit();
                }
                self.output_surface_creation_requested = false;
                Ok(())
            }
            Err(err) => {
                self.host.did_fail_to_initialize_output_surface();
                Err(err)
            }
        }
    }

    pub fn set_needs_animate(&mut self) {
        self.roles.assert_main();
        self.client.schedule_animation();
        self.set_needs_commit();
    }

    pub fn set_needs_update_layers(&mut self) {
        self.roles.assert_main();
        self.set_needs_commit();
    }

    pub fn set_needs_commit(&mut self) {
        self.roles.assert_main();
        self.check_alive();
        let _impl = self.roles.enter_impl();
        self.client.schedule_composite();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_needs_commit();
        }
        self.commit_requested = true;
    }

    pub fn set_needs_redraw(&mut self, damage: Rect) {
        self.roles.assert_main();
        self.check_alive();
        let _impl = self.roles.enter_impl();
        self.set_needs_redraw_rect_on_impl_thread(damage);
    }

    /// Commits always land on the active tree, so there is never a pending tree to wait for.
    pub fn set_next_commit_waits_for_activation(&mut self) {
        self.roles.assert_main();
    }

    /// Only meaningful with a scheduler. Repeating the current value does nothing.
    pub fn set_defer_commits(&mut self, defer_commits: bool) {
        self.roles.assert_main();
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        if self.defer_commits == defer_commits {
            return;
        }
        tracing::debug!(defer_commits, "set defer commits");
        self.defer_commits = defer_commits;
        scheduler.set_defer_commits(defer_commits);
    }

    pub fn defer_commits(&self) -> bool {
        self.defer_commits
    }

    pub fn commit_requested(&self) -> bool {
        self.roles.assert_main();
        self.commit_requested
    }

    pub fn begin_main_frame_requested(&self) -> bool {
        self.roles.assert_main();
        self.scheduler.is_some() && self.commit_requested
    }

    pub fn stop(&mut self) {
        self.roles.assert_main();
        self.check_alive();
        {
            let _blocked = self.roles.block_main();
            let _impl = self.roles.enter_impl();
            self.host.delete_contents_textures_on_impl_thread();
            self.scheduler = None;
            self.host_impl = None;
        }
        if let Some(queue) = self.task_queue.as_mut() {
            queue.clear();
        }
        self.output_surface_creation_task = None;
        self.stopped = true;
        tracing::debug!("proxy stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn on_can_draw_state_changed(&mut self, can_draw: bool) {
        self.roles.assert_impl();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_can_draw(can_draw);
        }
    }

    pub fn notify_ready_to_activate(&mut self) {
        let _impl = self.roles.enter_impl();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.notify_ready_to_activate();
        }
    }

    pub fn notify_ready_to_draw(&mut self) {}

    pub fn set_needs_redraw_on_impl_thread(&mut self) {
        self.client.schedule_composite();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_needs_redraw();
        }
    }

    pub fn set_needs_animate_on_impl_thread(&mut self) {
        self.client.schedule_composite();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_needs_animate();
        }
    }

    pub fn set_needs_prepare_tiles_on_impl_thread(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_needs_prepare_tiles();
        }
    }

    pub fn set_needs_redraw_rect_on_impl_thread(&mut self, damage: Rect) {
        self.impl_mut().set_viewport_damage(damage);
        self.set_needs_redraw_on_impl_thread();
    }

    pub fn set_needs_commit_on_impl_thread(&mut self) {
        self.client.schedule_composite();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_needs_commit();
        }
    }

    pub fn post_animation_events_to_main_thread_on_impl_thread(
        &mut self,
        events: Vec<AnimationEvent>,
    ) {
        self.roles.assert_impl();
        let _main = self.roles.enter_main();
        self.host.set_animation_events(events);
    }

    /// Shrink the contents texture budget. Returns `false` when there is no contents texture
    /// manager (impl-side painting) or nothing was evicted.
    pub fn reduce_contents_texture_memory_on_impl_thread(
        &mut self,
        limit_bytes: u64,
        priority_cutoff: u32,
    ) -> bool {
        let _impl = self.roles.enter_impl();
        self.host
            .contents_texture_manager_mut()
            .is_some_and(|manager| {
                manager.reduce_memory_on_impl_thread(limit_bytes, priority_cutoff)
            })
    }

    pub fn is_inside_draw(&self) -> bool {
        self.inside_draw
    }

    pub fn did_activate_sync_tree(&mut self) {
        self.roles.assert_impl();
        if self.impl_side_painting() {
            // The activated tree may still be checkerboarded; hold draws until NOW tiles land.
            self.impl_mut().set_requires_high_res_to_draw();
            if self.commit_in_flight {
                self.commit_complete();
            }
        }
        self.activation_pending = false;
        self.timing_history.did_activate_sync_tree();
    }

    pub fn did_prepare_tiles(&mut self) {
        debug_assert!(self.impl_side_painting());
        self.roles.assert_impl();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.did_prepare_tiles();
        }
    }

    pub fn did_lose_output_surface_on_impl_thread(&mut self) {
        self.check_alive();
        let _impl = self.roles.enter_impl();
        tracing::debug!("output surface lost");
        self.impl_mut().release_output_surface();
        {
            let _main = self.roles.enter_main();
            if self.host.did_lose_output_surface() {
                self.set_needs_commit();
            }
        }
        self.client.did_abort_swap_buffers();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.did_lose_output_surface();
        }
        self.process_impl_notifications();
    }

    pub fn commit_vsync_parameters(&mut self, timebase: Duration, interval: Duration) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.commit_vsync_parameters(timebase, interval);
        }
    }

    pub fn set_estimated_parent_draw_time(&mut self, draw_time: Duration) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_estimated_parent_draw_time(draw_time);
        }
    }

    pub fn set_max_swaps_pending_on_impl_thread(&mut self, max: usize) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_max_swaps_pending(max);
        }
    }

    pub fn did_swap_buffers_on_impl_thread(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.did_swap_buffers();
        }
        self.client.did_post_swap_buffers();
    }

    pub fn did_swap_buffers_complete_on_impl_thread(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.did_swap_buffers_complete();
        }
        let _main = self.roles.enter_main();
        self.host.did_complete_swap_buffers();
    }

    /// Run a full frame inline: main frame, commit, activation with every tile rasterized,
    /// animate and draw. Swap promises that did not swap are broken with
    /// [`DidNotSwapReason::SwapFails`] before returning.
    #[tracing::instrument(skip(self))]
    pub fn composite_immediately(&mut self, frame_begin_time: Duration) {
        self.roles.assert_main();
        self.check_alive();
        assert!(
            !self.inside_synchronous_composite,
            "composite_immediately is not reentrant"
        );
        self.inside_synchronous_composite = true;
        self.composite_immediately_inner(frame_begin_time);
        self.inside_synchronous_composite = false;
    }

    fn composite_immediately_inner(&mut self, frame_begin_time: Duration) {
        if self.host.output_surface_lost() {
            self.request_new_output_surface();
            // The embedder may answer later; nothing can be drawn until then.
            if self.host.output_surface_lost() {
                tracing::debug!("no output surface for immediate composite");
                return;
            }
        }

        let args = BeginFrameArgs::new(frame_begin_time);
        self.do_begin_main_frame(&args);
        self.do_commit();
        debug_assert_eq!(
            self.host.num_queued_swap_promises(),
            0,
            "commit should transfer every swap promise"
        );

        let _impl = self.roles.enter_impl();
        if self.impl_side_painting() {
            self.impl_mut().activate_sync_tree();
            self.process_impl_notifications();
            debug_assert!(!self.impl_ref().active_tree().needs_update_draw_properties());
            self.impl_mut().prepare_tiles();
            self.impl_mut().synchronously_initialize_all_tiles();
            self.process_impl_notifications();
        }

        self.do_animate();

        let mut frame = FrameData::default();
        self.do_composite(frame_begin_time, &mut frame);

        // No asynchronous draw will follow to fulfil what is left.
        self.impl_mut()
            .active_tree_mut()
            .break_swap_promises(DidNotSwapReason::SwapFails);
    }

    /// Run the main-side half of a frame, unless it has to be aborted.
    #[tracing::instrument(skip(self))]
    pub fn begin_main_frame(&mut self) -> BeginMainFrameOutcome {
        self.roles.assert_main();
        self.check_alive();
        self.main_frame_in_flight = true;

        let reason = if self.defer_commits {
            Some(CommitEarlyOutReason::AbortedDeferredCommit)
        } else if !self.host.visible() {
            Some(CommitEarlyOutReason::AbortedNotVisible)
        } else if self.host.output_surface_lost() {
            Some(CommitEarlyOutReason::AbortedOutputSurfaceLost)
        } else {
            None
        };

        if let Some(reason) = reason {
            tracing::debug!(reason = reason.as_str(), "begin main frame aborted");
            // Deferred frames keep their promises for the commit that follows.
            if reason != CommitEarlyOutReason::AbortedDeferredCommit {
                self.host.break_swap_promises(DidNotSwapReason::CommitFails);
            }
            self.begin_main_frame_aborted_on_impl_thread(reason);
            self.main_frame_in_flight = false;
            return BeginMainFrameOutcome::Aborted(reason);
        }

        let args = self.impl_ref().current_begin_frame_args();
        self.do_begin_main_frame(&args);
        BeginMainFrameOutcome::Started
    }

    fn begin_main_frame_aborted_on_impl_thread(&mut self, reason: CommitEarlyOutReason) {
        let _impl = self.roles.enter_impl();
        self.impl_mut().begin_main_frame_aborted(reason);
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.begin_main_frame_aborted(reason);
        }
    }

    fn do_begin_main_frame(&mut self, args: &BeginFrameArgs) {
        self.main_frame_in_flight = true;
        self.host.will_begin_main_frame();
        self.host.begin_main_frame(args);
        self.host.animate_layers(args.frame_time);
        self.host.layout();

        let host_impl = self.impl_ref();
        let limit = host_impl.memory_allocation_limit_bytes();
        let cutoff = host_impl.memory_allocation_priority_cutoff();
        if let Some(manager) = self.host.contents_texture_manager_mut() {
            manager.unlink_and_clear_evicted_backings();
            manager.set_max_memory_limit_bytes(limit);
            manager.set_external_priority_cutoff(cutoff);
        }

        debug_assert!(
            self.queue_for_commit.is_none(),
            "main frame started with an uncommitted update queue"
        );
        let mut queue = ResourceUpdateQueue::new();
        let updated = self.host.update_layers(&mut queue);
        tracing::trace!(updated, uploads = queue.len(), "updated layers");
        self.queue_for_commit = Some(queue);

        self.timing_history.did_begin_main_frame();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.notify_begin_main_frame_started();
            scheduler.notify_ready_to_commit();
        }
    }

    #[tracing::instrument(skip(self))]
    fn do_commit(&mut self) {
        self.roles.assert_main();
        self.commit_requested = false;
        self.host.will_commit();
        {
            let _blocked = self.roles.block_main();
            let _impl = self.roles.enter_impl();

            let host_impl = Self::started_impl(&mut self.host_impl);
            host_impl.begin_commit();
            if let Some(manager) = self.host.contents_texture_manager_mut() {
                manager.push_texture_priorities_to_backings();
            }
            self.host.begin_commit_on_impl_thread(host_impl);

            let queue = self.queue_for_commit.take().unwrap_or_default();
            ResourceUpdateController::new(queue).finalize(host_impl);

            if host_impl.evicted_ui_resources_exist() {
                self.host.recreate_ui_resources(host_impl);
            }
            self.host.finish_commit_on_impl_thread(host_impl);

            self.main_frame_in_flight = false;
            self.commit_in_flight = true;
            self.process_impl_notifications();

            if self.impl_side_painting() {
                // Commits go straight to the active tree; activation still has to run before
                // the commit completes.
                self.activation_pending = true;
                self.notify_ready_to_activate();
            } else {
                self.commit_complete();
                self.process_impl_notifications();
            }
        }
    }

    fn commit_complete(&mut self) {
        debug_assert!(self.commit_in_flight);
        self.impl_mut().commit_complete();
        {
            let _main = self.roles.enter_main();
            self.host.commit_complete();
            self.host.did_begin_main_frame();
        }
        self.timing_history.did_commit();
        self.next_frame_is_newly_committed_frame = true;
        self.commit_in_flight = false;
    }

    fn do_animate(&mut self) {
        let _impl = self.roles.enter_impl();
        let host_impl = self.impl_mut();
        if !host_impl.active_tree().has_root_layer() {
            return;
        }
        let frame_time = host_impl.current_begin_frame_args().frame_time;
        host_impl.animate(frame_time);
        if !host_impl.animations_are_visible() {
            host_impl.update_animation_state(true);
        }
        self.process_impl_notifications();
    }

    fn should_composite(&self) -> bool {
        self.roles.assert_impl();
        let host_impl = self.impl_ref();
        host_impl.visible() && host_impl.can_draw()
    }

    #[tracing::instrument(skip(self, frame))]
    fn do_composite(&mut self, frame_time: Duration, frame: &mut FrameData) -> DrawResult {
        debug_assert!(!self.host.output_surface_lost());
        let _impl = self.roles.enter_impl();

        self.inside_draw = true;
        if !self.should_composite() {
            self.inside_draw = false;
            return DrawResult::AbortedCantDraw;
        }

        self.timing_history.did_start_drawing();
        let host_impl = self.impl_mut();
        let result = host_impl.prepare_to_draw(frame);
        let draw_frame = result.is_success();
        if draw_frame {
            host_impl.draw_layers(frame, frame_time);
        }
        host_impl.did_draw_all_layers(frame);
        host_impl.update_animation_state(draw_frame);
        host_impl.reset_current_begin_frame_args_for_next_frame();
        self.timing_history.did_finish_drawing();
        self.inside_draw = false;

        if draw_frame {
            let _blocked = self.roles.block_main();
            self.impl_mut().swap_buffers(frame);
        }
        self.process_impl_notifications();
        self.did_commit_and_draw_frame();
        tracing::debug!(?result, "composite");
        result
    }

    fn did_commit_and_draw_frame(&mut self) {
        if self.next_frame_is_newly_committed_frame {
            let _main = self.roles.enter_main();
            self.next_frame_is_newly_committed_frame = false;
            self.host.did_commit_and_draw_frame();
        }
    }

    pub fn will_begin_impl_frame(&mut self, args: BeginFrameArgs) {
        let _impl = self.roles.enter_impl();
        self.impl_mut().will_begin_impl_frame(args);
    }

    pub fn did_begin_impl_frame_deadline(&mut self) {
        let _impl = self.roles.enter_impl();
        self.impl_mut().reset_current_begin_frame_args_for_next_frame();
    }

    pub fn send_begin_main_frame_not_expected_soon(&mut self) {
        let _main = self.roles.enter_main();
        self.host.begin_main_frame_not_expected_soon();
    }

    pub fn draw_duration_estimate(&self) -> Duration {
        self.timing_history.draw_duration_estimate()
    }

    pub fn begin_main_frame_to_commit_duration_estimate(&self) -> Duration {
        self.timing_history
            .begin_main_frame_to_commit_duration_estimate()
    }

    pub fn commit_to_activate_duration_estimate(&self) -> Duration {
        self.timing_history.commit_to_activate_duration_estimate()
    }

    pub fn timing_history(&self) -> &TimingHistory {
        &self.timing_history
    }

    /// Posted rather than run inline, so property changes made between two `set_needs_commit`
    /// calls land in one frame.
    pub fn scheduled_action_send_begin_main_frame(&mut self) {
        match self.task_queue.as_mut() {
            Some(queue) => {
                queue.post(ProxyTask::BeginMainFrame);
            }
            None => {
                self.begin_main_frame();
            }
        }
    }

    pub fn scheduled_action_draw_and_swap_if_possible(&mut self) -> DrawResult {
        self.check_alive();
        let _impl = self.roles.enter_impl();
        let frame_time = self.impl_ref().current_begin_frame_args().frame_time;
        let mut frame = FrameData::default();
        self.do_composite(frame_time, &mut frame)
    }

    pub fn scheduled_action_draw_and_swap_forced(&mut self) -> DrawResult {
        panic!("forced draws are never scheduled for the single-threaded proxy")
    }

    pub fn scheduled_action_commit(&mut self) {
        self.check_alive();
        let _main = self.roles.enter_main();
        self.do_commit();
    }

    pub fn scheduled_action_animate(&mut self) {
        self.check_alive();
        self.do_animate();
    }

    pub fn scheduled_action_activate_sync_tree(&mut self) {
        self.check_alive();
        let _impl = self.roles.enter_impl();
        self.impl_mut().activate_sync_tree();
        self.process_impl_notifications();
    }

    pub fn scheduled_action_begin_output_surface_creation(&mut self) {
        self.check_alive();
        debug_assert!(self.scheduler.is_some());
        let _main = self.roles.enter_main();
        if self.task_queue.is_some() {
            self.schedule_request_new_output_surface();
        } else {
            self.request_new_output_surface();
        }
    }

    pub fn scheduled_action_prepare_tiles(&mut self) {
        self.check_alive();
        debug_assert!(self.impl_side_painting());
        let _impl = self.roles.enter_impl();
        self.impl_mut().prepare_tiles();
        self.process_impl_notifications();
    }

    pub fn scheduled_action_invalidate_output_surface(&mut self) {
        panic!("output surface invalidation is never scheduled for the single-threaded proxy")
    }

    /// Post an output surface request unless one is already posted or outstanding.
    pub fn schedule_request_new_output_surface(&mut self) {
        let Some(queue) = self.task_queue.as_mut() else {
            self.request_new_output_surface();
            return;
        };
        if self.output_surface_creation_task.is_none() && !self.output_surface_creation_requested {
            let id = queue.post(ProxyTask::RequestNewOutputSurface);
            self.output_surface_creation_task = Some(id);
        }
    }

    /// Pull actions from the scheduler and run them until it has nothing left. Returns the
    /// number of actions run.
    pub fn process_scheduled_actions(&mut self) -> usize {
        self.roles.assert_main();
        let mut count = 0;
        while let Some(action) = self.scheduler.as_mut().and_then(|s| s.next_action()) {
            count += 1;
            tracing::debug!(?action, "scheduled action");
            match action {
                ScheduledAction::SendBeginMainFrame => {
                    self.scheduled_action_send_begin_main_frame()
                }
                ScheduledAction::Commit => self.scheduled_action_commit(),
                ScheduledAction::ActivateSyncTree => self.scheduled_action_activate_sync_tree(),
                ScheduledAction::Animate => self.scheduled_action_animate(),
                ScheduledAction::PrepareTiles => self.scheduled_action_prepare_tiles(),
                ScheduledAction::DrawAndSwapIfPossible => {
                    let result = self.scheduled_action_draw_and_swap_if_possible();
                    if let Some(scheduler) = self.scheduler.as_mut() {
                        scheduler.did_draw(result);
                    }
                }
                ScheduledAction::DrawAndSwapForced => {
                    self.scheduled_action_draw_and_swap_forced();
                }
                ScheduledAction::BeginOutputSurfaceCreation => {
                    self.scheduled_action_begin_output_surface_creation()
                }
                ScheduledAction::InvalidateOutputSurface => {
                    self.scheduled_action_invalidate_output_surface()
                }
            }
        }
        count
    }

    /// Run every posted task, including ones posted while draining. Returns the number run.
    pub fn run_pending_tasks(&mut self) -> usize {
        self.roles.assert_main();
        let mut ran = 0;
        while let Some((id, task)) = self.task_queue.as_mut().and_then(MainTaskQueue::pop) {
            ran += 1;
            match task {
                ProxyTask::BeginMainFrame => {
                    self.begin_main_frame();
                }
                ProxyTask::RequestNewOutputSurface => {
                    if self.output_surface_creation_task == Some(id) {
                        self.output_surface_creation_task = None;
                    }
                    self.request_new_output_surface();
                }
            }
        }
        ran
    }

    /// Alternate scheduled actions and posted tasks until both are exhausted.
    pub fn run_until_idle(&mut self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.process_scheduled_actions() + self.run_pending_tasks();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    fn process_impl_notifications(&mut self) {
        let _impl = self.roles.enter_impl();
        loop {
            let notifications = match self.host_impl.as_mut() {
                Some(host_impl) => host_impl.take_notifications(),
                None => return,
            };
            if notifications.is_empty() {
                return;
            }
            for notification in notifications {
                match notification {
                    ImplNotification::CanDrawStateChanged(can_draw) => {
                        self.on_can_draw_state_changed(can_draw)
                    }
                    ImplNotification::SetNeedsRedraw => self.set_needs_redraw_on_impl_thread(),
                    ImplNotification::SetNeedsPrepareTiles => {
                        self.set_needs_prepare_tiles_on_impl_thread()
                    }
                    ImplNotification::DidActivateSyncTree => self.did_activate_sync_tree(),
                    ImplNotification::DidPrepareTiles => self.did_prepare_tiles(),
                    ImplNotification::DidSwapBuffers => self.did_swap_buffers_on_impl_thread(),
                    ImplNotification::AnimationEvents(events) => {
                        self.post_animation_events_to_main_thread_on_impl_thread(events)
                    }
                }
            }
        }
    }
}
