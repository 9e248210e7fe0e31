use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use kurbo::{Rect, Size};
use tessera::{
    AnimationEvent, BeginMainFrameOutcome, CommitEarlyOutReason, DidNotSwapReason,
    HeadlessOutputSurface, HostLayer, LayerId, LayerTreeHost, LayerTreeHostClient,
    LayerTreeSettings, OutputSurface, PriorityBin, RasterWorker, SingleThreadClient,
    SingleThreadProxy, SwapPromise, Tile, TileId, TilePriority, TileResolution, TileSpec,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SurfaceMode {
    Sync,
    Async,
    Failing,
}

#[derive(Debug, Default)]
struct HostLog {
    begin_main_frames: usize,
    commits: usize,
    commit_and_draws: usize,
    surface_requests: usize,
    surface_inits: usize,
    surface_failures: usize,
    swap_completes: usize,
    animation_events: Vec<AnimationEvent>,
}

struct RecordingHostClient {
    log: Rc<RefCell<HostLog>>,
    mode: SurfaceMode,
}

impl LayerTreeHostClient for RecordingHostClient {
    fn will_begin_main_frame(&mut self) {
        self.log.borrow_mut().begin_main_frames += 1;
    }

    fn did_commit(&mut self) {
        self.log.borrow_mut().commits += 1;
    }

    fn did_commit_and_draw_frame(&mut self) {
        self.log.borrow_mut().commit_and_draws += 1;
    }

    fn did_complete_swap_buffers(&mut self) {
        self.log.borrow_mut().swap_completes += 1;
    }

    fn did_receive_animation_events(&mut self, events: &[AnimationEvent]) {
        self.log.borrow_mut().animation_events.extend_from_slice(events);
    }

    fn request_new_output_surface(&mut self) -> Option<Box<dyn OutputSurface>> {
        self.log.borrow_mut().surface_requests += 1;
        match self.mode {
            SurfaceMode::Sync => Some(Box::new(HeadlessOutputSurface::new())),
            SurfaceMode::Failing => Some(Box::new(HeadlessOutputSurface::failing())),
            SurfaceMode::Async => None,
        }
    }

    fn did_initialize_output_surface(&mut self) {
        self.log.borrow_mut().surface_inits += 1;
    }

    fn did_fail_to_initialize_output_surface(&mut self) {
        self.log.borrow_mut().surface_failures += 1;
    }
}

#[derive(Debug, Default)]
struct ProxyLog {
    schedule_composites: usize,
    swaps: usize,
    aborted_swaps: usize,
}

struct RecordingProxyClient {
    log: Rc<RefCell<ProxyLog>>,
}

impl SingleThreadClient for RecordingProxyClient {
    fn schedule_composite(&mut self) {
        self.log.borrow_mut().schedule_composites += 1;
    }

    fn did_post_swap_buffers(&mut self) {
        self.log.borrow_mut().swaps += 1;
    }

    fn did_abort_swap_buffers(&mut self) {
        self.log.borrow_mut().aborted_swaps += 1;
    }
}

struct RecordingPromise {
    results: Rc<RefCell<Vec<Result<(), DidNotSwapReason>>>>,
}

impl SwapPromise for RecordingPromise {
    fn did_swap(&mut self) {
        self.results.borrow_mut().push(Ok(()));
    }

    fn did_not_swap(&mut self, reason: DidNotSwapReason) {
        self.results.borrow_mut().push(Err(reason));
    }
}

struct Harness {
    proxy: SingleThreadProxy,
    host_log: Rc<RefCell<HostLog>>,
    proxy_log: Rc<RefCell<ProxyLog>>,
    promises: Rc<RefCell<Vec<Result<(), DidNotSwapReason>>>>,
}

impl Harness {
    fn new(settings: LayerTreeSettings, mode: SurfaceMode) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let host_log = Rc::new(RefCell::new(HostLog::default()));
        let proxy_log = Rc::new(RefCell::new(ProxyLog::default()));
        let mut host = LayerTreeHost::new(
            settings,
            Box::new(RecordingHostClient {
                log: Rc::clone(&host_log),
                mode,
            }),
        );
        host.set_viewport_size(Size::new(512.0, 512.0));
        host.set_layer(layer(1, 2));

        let mut proxy = SingleThreadProxy::new(
            host,
            Box::new(RecordingProxyClient {
                log: Rc::clone(&proxy_log),
            }),
        );
        proxy.start();
        proxy.set_layer_tree_host_client_ready();
        proxy.set_visible(true);
        Self {
            proxy,
            host_log,
            proxy_log,
            promises: Rc::default(),
        }
    }

    fn queue_promise(&mut self) {
        let promise = RecordingPromise {
            results: Rc::clone(&self.promises),
        };
        self.proxy.host_mut().queue_swap_promise(Box::new(promise));
    }

    fn active_tile_count(&self) -> usize {
        self.proxy.host_impl().unwrap().active_tree().tile_count()
    }
}

fn manual() -> LayerTreeSettings {
    LayerTreeSettings {
        single_thread_proxy_scheduler: false,
        ..LayerTreeSettings::default()
    }
}

fn layer(id: u32, tiles: i32) -> HostLayer {
    let specs = (0..tiles)
        .map(|col| {
            TileSpec::new(
                col,
                0,
                TilePriority::new(PriorityBin::Now, TileResolution::High, 0.0),
            )
        })
        .collect();
    HostLayer::new(LayerId(id), specs)
}

#[test]
fn composite_immediately_runs_one_full_frame() {
    let mut h = Harness::new(manual(), SurfaceMode::Sync);
    h.queue_promise();

    h.proxy.composite_immediately(Duration::from_millis(16));

    let host_log = h.host_log.borrow();
    assert_eq!(host_log.surface_requests, 1);
    assert_eq!(host_log.begin_main_frames, 1);
    assert_eq!(host_log.commits, 1);
    assert_eq!(host_log.commit_and_draws, 1);
    assert_eq!(h.proxy_log.borrow().swaps, 1);
    assert_eq!(*h.promises.borrow(), vec![Ok(())]);

    // One commit-to-activation sample means exactly one activation.
    let (_, activations, draws) = h.proxy.timing_history().samples();
    assert_eq!(activations, 1);
    assert_eq!(draws, 1);

    let host_impl = h.proxy.host_impl().unwrap();
    assert_eq!(host_impl.frame_number().0, 1);
    assert_eq!(host_impl.active_tree().missing_now_tiles(), 0);
    assert_eq!(h.proxy.host().source_frame_number().0, 1);
    assert!(h.proxy.state().is_idle());
}

#[test]
fn re_added_layer_is_committed_with_its_new_tiles() {
    let mut h = Harness::new(manual(), SurfaceMode::Sync);
    h.proxy.composite_immediately(Duration::ZERO);
    assert_eq!(h.active_tile_count(), 2);

    h.proxy.host_mut().remove_layer(LayerId(1));
    h.proxy.host_mut().set_layer(layer(1, 5));
    h.proxy.composite_immediately(Duration::from_millis(16));

    assert_eq!(h.active_tile_count(), 5);
    let host_impl = h.proxy.host_impl().unwrap();
    assert_eq!(host_impl.active_tree().missing_now_tiles(), 0);
}

#[test]
fn composite_immediately_breaks_promises_it_could_not_swap() {
    let mut h = Harness::new(manual(), SurfaceMode::Sync);
    h.proxy.host_mut().set_viewport_size(Size::ZERO);
    h.queue_promise();

    h.proxy.composite_immediately(Duration::from_millis(16));

    assert_eq!(h.host_log.borrow().commits, 1);
    assert_eq!(h.proxy_log.borrow().swaps, 0);
    assert_eq!(*h.promises.borrow(), vec![Err(DidNotSwapReason::SwapFails)]);
    assert_eq!(
        h.proxy
            .host_impl()
            .unwrap()
            .active_tree()
            .swap_promise_count(),
        0
    );
}

#[test]
fn composite_immediately_waits_for_an_async_surface() {
    let mut h = Harness::new(manual(), SurfaceMode::Async);
    h.queue_promise();

    h.proxy.composite_immediately(Duration::ZERO);
    h.proxy.composite_immediately(Duration::from_millis(16));

    let host_log = h.host_log.borrow();
    assert_eq!(host_log.surface_requests, 1);
    assert_eq!(host_log.commits, 0);
    assert!(h.proxy.host().output_surface_lost());
    assert_eq!(h.proxy.host().num_queued_swap_promises(), 1);
    assert!(h.promises.borrow().is_empty());
}

#[test]
fn repeated_surface_requests_reach_the_embedder_once() {
    let mut h = Harness::new(manual(), SurfaceMode::Async);
    h.proxy.request_new_output_surface();
    h.proxy.request_new_output_surface();
    assert_eq!(h.host_log.borrow().surface_requests, 1);

    h.proxy
        .set_output_surface(Box::new(HeadlessOutputSurface::new()))
        .unwrap();
    assert!(!h.proxy.host().output_surface_lost());
    assert_eq!(h.host_log.borrow().surface_inits, 1);
    // Without a scheduler the new surface asks the embedder for a composite.
    assert!(h.proxy.commit_requested());
}

#[test]
fn posted_surface_request_is_not_duplicated() {
    let mut h = Harness::new(LayerTreeSettings::default(), SurfaceMode::Async);
    assert_eq!(h.proxy.process_scheduled_actions(), 1);
    assert_eq!(h.proxy.pending_task_count(), 1);

    h.proxy.schedule_request_new_output_surface();
    assert_eq!(h.proxy.pending_task_count(), 1);

    h.proxy.run_pending_tasks();
    h.proxy.request_new_output_surface();
    assert_eq!(h.host_log.borrow().surface_requests, 1);
}

#[test]
fn failed_surface_keeps_the_request_outstanding() {
    let mut h = Harness::new(manual(), SurfaceMode::Failing);
    h.proxy.request_new_output_surface();
    assert_eq!(h.host_log.borrow().surface_failures, 1);
    assert!(h.proxy.host().output_surface_lost());

    h.proxy.request_new_output_surface();
    assert_eq!(h.host_log.borrow().surface_requests, 1);

    let err = h
        .proxy
        .set_output_surface(Box::new(HeadlessOutputSurface::failing()))
        .unwrap_err();
    assert!(err.to_string().starts_with("output surface error:"));

    h.proxy
        .set_output_surface(Box::new(HeadlessOutputSurface::new()))
        .unwrap();
    assert!(!h.proxy.host().output_surface_lost());
}

#[test]
fn scheduler_drives_the_pipeline_to_idle() {
    let mut h = Harness::new(LayerTreeSettings::default(), SurfaceMode::Sync);
    h.queue_promise();

    h.proxy.run_until_idle();

    {
        let host_log = h.host_log.borrow();
        assert_eq!(host_log.surface_requests, 1);
        assert_eq!(host_log.commits, 1);
        assert_eq!(host_log.commit_and_draws, 1);
    }
    assert_eq!(h.proxy_log.borrow().swaps, 1);
    assert_eq!(*h.promises.borrow(), vec![Ok(())]);
    assert!(h.proxy.state().is_idle());
    assert_eq!(h.active_tile_count(), 2);

    h.proxy.did_swap_buffers_complete_on_impl_thread();
    assert_eq!(h.host_log.borrow().swap_completes, 1);

    h.proxy.host_mut().set_layer(layer(2, 3));
    h.proxy.set_needs_commit();
    h.proxy.run_until_idle();
    assert_eq!(h.host_log.borrow().commits, 2);
    assert_eq!(h.proxy_log.borrow().swaps, 2);
    assert_eq!(h.active_tile_count(), 5);
}

/// Finishes a tile only the second time it is asked to.
#[derive(Default)]
struct SecondPassWorker {
    requests: HashMap<TileId, u32>,
}

impl RasterWorker for SecondPassWorker {
    fn rasterize(&mut self, tile: &Tile) -> bool {
        let count = self.requests.entry(tile.id()).or_default();
        *count += 1;
        *count >= 2
    }
}

#[test]
fn draw_missing_content_is_retried_once_tiles_land() {
    let host_log = Rc::new(RefCell::new(HostLog::default()));
    let proxy_log = Rc::new(RefCell::new(ProxyLog::default()));
    let mut host = LayerTreeHost::new(
        LayerTreeSettings::default(),
        Box::new(RecordingHostClient {
            log: Rc::clone(&host_log),
            mode: SurfaceMode::Sync,
        }),
    );
    host.set_viewport_size(Size::new(512.0, 512.0));
    host.set_layer(layer(1, 2));
    let mut proxy = SingleThreadProxy::new(
        host,
        Box::new(RecordingProxyClient {
            log: Rc::clone(&proxy_log),
        }),
    )
    .with_raster_worker(Box::new(SecondPassWorker::default()));
    proxy.start();
    proxy.set_layer_tree_host_client_ready();
    proxy.set_visible(true);

    proxy.run_until_idle();

    assert_eq!(host_log.borrow().commits, 1);
    assert_eq!(proxy_log.borrow().swaps, 1);
    let host_impl = proxy.host_impl().unwrap();
    assert_eq!(host_impl.active_tree().missing_now_tiles(), 0);
    assert!(host_impl.tile_manager().passes() >= 2);
}

#[test]
fn deferred_main_frame_leaves_impl_tree_untouched() {
    let mut h = Harness::new(LayerTreeSettings::default(), SurfaceMode::Sync);
    h.proxy.run_until_idle();
    let commits = h.host_log.borrow().commits;
    let source_frame = h
        .proxy
        .host_impl()
        .unwrap()
        .active_tree()
        .source_frame_number();

    h.proxy.host_mut().set_layer(layer(2, 3));
    h.queue_promise();
    h.proxy.set_needs_commit();
    h.proxy.process_scheduled_actions();
    assert_eq!(h.proxy.pending_task_count(), 1);

    h.proxy.set_defer_commits(true);
    assert!(h.proxy.defer_commits());
    assert_eq!(h.proxy.run_pending_tasks(), 1);

    let host_impl = h.proxy.host_impl().unwrap();
    assert_eq!(
        host_impl.last_commit_early_out(),
        Some(CommitEarlyOutReason::AbortedDeferredCommit)
    );
    assert_eq!(host_impl.active_tree().source_frame_number(), source_frame);
    assert_eq!(h.active_tile_count(), 2);
    assert_eq!(h.host_log.borrow().commits, commits);
    // Deferral keeps promises for the commit that follows.
    assert_eq!(h.proxy.host().num_queued_swap_promises(), 1);

    h.proxy.set_defer_commits(false);
    h.proxy.run_until_idle();
    assert_eq!(h.host_log.borrow().commits, commits + 1);
    assert_eq!(h.active_tile_count(), 5);
    assert_eq!(*h.promises.borrow(), vec![Ok(())]);
}

#[test]
fn begin_main_frame_while_deferred_reports_the_abort() {
    let mut h = Harness::new(LayerTreeSettings::default(), SurfaceMode::Sync);
    h.proxy.run_until_idle();
    let commits = h.host_log.borrow().commits;
    let begins = h.host_log.borrow().begin_main_frames;

    h.proxy.set_defer_commits(true);
    assert_eq!(
        h.proxy.begin_main_frame(),
        BeginMainFrameOutcome::Aborted(CommitEarlyOutReason::AbortedDeferredCommit)
    );
    assert_eq!(h.host_log.borrow().begin_main_frames, begins);
    assert!(h.proxy.state().is_idle());

    // The scheduler keeps the commit request until deferral ends.
    assert_eq!(h.proxy.run_until_idle(), 0);
    h.proxy.set_defer_commits(false);
    h.proxy.run_until_idle();
    assert_eq!(h.host_log.borrow().commits, commits + 1);
}

#[test]
fn hidden_main_frame_breaks_queued_promises() {
    let mut h = Harness::new(manual(), SurfaceMode::Sync);
    h.proxy.composite_immediately(Duration::ZERO);
    h.proxy.set_visible(false);
    h.queue_promise();

    assert_eq!(
        h.proxy.begin_main_frame(),
        BeginMainFrameOutcome::Aborted(CommitEarlyOutReason::AbortedNotVisible)
    );
    assert_eq!(*h.promises.borrow(), vec![Err(DidNotSwapReason::CommitFails)]);
    assert_eq!(h.proxy.host().num_queued_swap_promises(), 0);
}

#[test]
fn lost_surface_is_recreated_by_the_scheduler() {
    let mut h = Harness::new(LayerTreeSettings::default(), SurfaceMode::Sync);
    h.proxy.run_until_idle();

    h.proxy.did_lose_output_surface_on_impl_thread();
    assert!(h.proxy.host().output_surface_lost());
    assert!(!h.proxy.host_impl().unwrap().can_draw());
    assert_eq!(h.proxy_log.borrow().aborted_swaps, 1);

    h.proxy.run_until_idle();
    assert_eq!(h.host_log.borrow().surface_requests, 2);
    assert_eq!(h.host_log.borrow().commits, 2);
    assert!(h.proxy.host_impl().unwrap().can_draw());
}

#[test]
fn started_animations_reach_the_main_side_once() {
    let mut h = Harness::new(manual(), SurfaceMode::Sync);
    h.proxy
        .host_mut()
        .set_layer(layer(3, 1).with_animating(true));

    h.proxy.composite_immediately(Duration::from_millis(16));
    h.proxy.composite_immediately(Duration::from_millis(32));

    let events = &h.host_log.borrow().animation_events;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].layer, LayerId(3));
    assert_eq!(h.proxy.host().animation_events().len(), 1);
}

#[test]
fn redraw_damage_accumulates_until_drawn() {
    let mut h = Harness::new(manual(), SurfaceMode::Sync);
    h.proxy.composite_immediately(Duration::ZERO);

    let before = h.proxy_log.borrow().schedule_composites;
    h.proxy.set_needs_redraw(Rect::new(0.0, 0.0, 10.0, 10.0));
    h.proxy.set_needs_redraw(Rect::new(20.0, 20.0, 30.0, 30.0));
    assert_eq!(h.proxy_log.borrow().schedule_composites, before + 2);
    assert_eq!(
        h.proxy.host_impl().unwrap().viewport_damage(),
        Some(Rect::new(0.0, 0.0, 30.0, 30.0))
    );
}

#[test]
fn contents_textures_without_impl_side_painting() {
    let settings = LayerTreeSettings {
        impl_side_painting: false,
        ..manual()
    };
    let mut h = Harness::new(settings, SurfaceMode::Sync);
    h.proxy.composite_immediately(Duration::ZERO);

    assert_eq!(h.host_log.borrow().commits, 1);
    assert_eq!(h.proxy_log.borrow().swaps, 1);
    assert!(h.proxy.host().contents_texture_manager().is_some());
    assert!(h.proxy.host_impl().unwrap().uploaded_resource_count() > 0);
    assert_eq!(h.proxy.max_partial_texture_updates(), usize::MAX);
}

#[test]
fn defer_commits_needs_a_scheduler() {
    let mut h = Harness::new(manual(), SurfaceMode::Sync);
    h.proxy.set_defer_commits(true);
    assert!(!h.proxy.defer_commits());
    assert!(!h.proxy.begin_main_frame_requested());
}

#[test]
#[should_panic(expected = "used after stop")]
fn proxy_is_unusable_after_stop() {
    let mut h = Harness::new(manual(), SurfaceMode::Sync);
    h.proxy.stop();
    assert!(h.proxy.is_stopped());
    assert!(h.proxy.host_impl().is_none());
    h.proxy.set_needs_commit();
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "impl-role operation reached from the main role")]
fn impl_role_operation_rejects_main_role_callers() {
    let mut h = Harness::new(manual(), SurfaceMode::Sync);
    h.proxy.did_prepare_tiles();
}
