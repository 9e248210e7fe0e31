use std::time::Duration;

use serde::Serialize;

use crate::host_impl::frame::DrawResult;
use crate::scheduler::{CommitEarlyOutReason, ScheduledAction, Scheduler};
use crate::settings::LayerTreeSettings;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSurfaceState {
    #[default]
    None,
    Creating,
    Active,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MainFrameState {
    #[default]
    Idle,
    Sent,
    Started,
    ReadyToCommit,
}

/// Consecutive draws retried after missing content before waiting for the next request.
const MAX_MISSING_CONTENT_RETRIES: u32 = 4;

/// Deterministic flag machine used when the embedder does not bring its own scheduler.
///
/// Priority of actions, highest first: output surface creation, activation, commit, animate,
/// prepare tiles, draw, begin main frame. There are no deadlines; every pull returns the next
/// action that is possible right now.
///
/// A draw refused for missing high-resolution content re-arms prepare-tiles and the redraw, up
/// to [`MAX_MISSING_CONTENT_RETRIES`] times in a row. Turning frame production throttling off
/// ignores the swap limit. Vsync parameters and the parent draw time are only recorded.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameScheduler {
    impl_side_painting: bool,
    can_start: bool,
    visible: bool,
    can_draw: bool,
    defer_commits: bool,
    throttle_frame_production: bool,
    output_surface: OutputSurfaceState,
    main_frame: MainFrameState,
    needs_commit: bool,
    needs_redraw: bool,
    needs_animate: bool,
    needs_prepare_tiles: bool,
    ready_to_activate: bool,
    awaiting_activation: bool,
    pending_swaps: usize,
    max_swaps_pending: Option<usize>,
    vsync_timebase: Duration,
    vsync_interval: Duration,
    estimated_parent_draw_time: Duration,
    last_draw_result: Option<DrawResult>,
    missing_content_retries: u32,
}

impl FrameScheduler {
    pub fn new(settings: &LayerTreeSettings) -> Self {
        Self {
            impl_side_painting: settings.impl_side_painting,
            throttle_frame_production: true,
            ..Self::default()
        }
    }

    pub fn output_surface_state(&self) -> OutputSurfaceState {
        self.output_surface
    }

    pub fn main_frame_state(&self) -> MainFrameState {
        self.main_frame
    }

    pub fn needs_commit(&self) -> bool {
        self.needs_commit
    }

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    pub fn pending_swaps(&self) -> usize {
        self.pending_swaps
    }

    pub fn last_draw_result(&self) -> Option<DrawResult> {
        self.last_draw_result
    }

    pub fn vsync_parameters(&self) -> (Duration, Duration) {
        (self.vsync_timebase, self.vsync_interval)
    }

    pub fn estimated_parent_draw_time(&self) -> Duration {
        self.estimated_parent_draw_time
    }

    fn swaps_available(&self) -> bool {
        !self.throttle_frame_production
            || self
                .max_swaps_pending
                .is_none_or(|max| self.pending_swaps < max)
    }

    fn choose_action(&mut self) -> Option<ScheduledAction> {
        if !self.can_start {
            return None;
        }
        match self.output_surface {
            OutputSurfaceState::None => {
                self.output_surface = OutputSurfaceState::Creating;
                return Some(ScheduledAction::BeginOutputSurfaceCreation);
            }
            OutputSurfaceState::Creating => return None,
            OutputSurfaceState::Active => {}
        }

        if self.ready_to_activate {
            self.ready_to_activate = false;
            self.awaiting_activation = false;
            return Some(ScheduledAction::ActivateSyncTree);
        }
        if self.main_frame == MainFrameState::ReadyToCommit && !self.awaiting_activation {
            self.main_frame = MainFrameState::Idle;
            self.awaiting_activation = self.impl_side_painting;
            self.missing_content_retries = 0;
            return Some(ScheduledAction::Commit);
        }
        if self.needs_animate && self.visible {
            self.needs_animate = false;
            return Some(ScheduledAction::Animate);
        }
        if self.needs_prepare_tiles && self.impl_side_painting {
            self.needs_prepare_tiles = false;
            return Some(ScheduledAction::PrepareTiles);
        }
        if self.needs_redraw
            && self.visible
            && self.can_draw
            && !self.awaiting_activation
            && self.swaps_available()
        {
            self.needs_redraw = false;
            return Some(ScheduledAction::DrawAndSwapIfPossible);
        }
        if self.needs_commit
            && self.main_frame == MainFrameState::Idle
            && self.visible
            && !self.defer_commits
            && !self.awaiting_activation
        {
            self.needs_commit = false;
            self.main_frame = MainFrameState::Sent;
            return Some(ScheduledAction::SendBeginMainFrame);
        }
        None
    }
}

impl Scheduler for FrameScheduler {
    fn set_can_start(&mut self) {
        self.can_start = true;
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn set_can_draw(&mut self, can_draw: bool) {
        self.can_draw = can_draw;
    }

    fn set_needs_commit(&mut self) {
        self.needs_commit = true;
    }

    fn set_needs_redraw(&mut self) {
        self.needs_redraw = true;
    }

    fn set_needs_animate(&mut self) {
        self.needs_animate = true;
    }

    fn set_needs_prepare_tiles(&mut self) {
        self.needs_prepare_tiles = true;
    }

    fn set_defer_commits(&mut self, defer_commits: bool) {
        self.defer_commits = defer_commits;
    }

    fn set_throttle_frame_production(&mut self, throttle: bool) {
        self.throttle_frame_production = throttle;
    }

    fn notify_begin_main_frame_started(&mut self) {
        if self.main_frame == MainFrameState::Sent {
            self.main_frame = MainFrameState::Started;
        }
    }

    fn notify_ready_to_commit(&mut self) {
        self.main_frame = MainFrameState::ReadyToCommit;
    }

    fn notify_ready_to_activate(&mut self) {
        self.ready_to_activate = true;
    }

    fn begin_main_frame_aborted(&mut self, reason: CommitEarlyOutReason) {
        self.main_frame = MainFrameState::Idle;
        match reason {
            CommitEarlyOutReason::AbortedOutputSurfaceLost
            | CommitEarlyOutReason::AbortedNotVisible
            | CommitEarlyOutReason::AbortedDeferredCommit => self.needs_commit = true,
            CommitEarlyOutReason::FinishedNoUpdates => {}
        }
    }

    fn commit_pending(&self) -> bool {
        self.main_frame != MainFrameState::Idle
    }

    fn did_create_and_initialize_output_surface(&mut self) {
        self.output_surface = OutputSurfaceState::Active;
        self.needs_commit = true;
        self.needs_redraw = true;
    }

    fn did_lose_output_surface(&mut self) {
        self.output_surface = OutputSurfaceState::None;
        self.pending_swaps = 0;
    }

    fn did_prepare_tiles(&mut self) {}

    fn did_draw(&mut self, result: DrawResult) {
        self.last_draw_result = Some(result);
        match result {
            DrawResult::Success => self.missing_content_retries = 0,
            DrawResult::AbortedMissingHighResContent
            | DrawResult::AbortedCheckerboardAnimations => {
                if self.missing_content_retries >= MAX_MISSING_CONTENT_RETRIES {
                    tracing::debug!(?result, "draw still missing content; waiting for a request");
                    return;
                }
                self.missing_content_retries += 1;
                self.needs_redraw = true;
                self.needs_prepare_tiles = self.impl_side_painting;
            }
            DrawResult::AbortedCantDraw => {}
        }
    }

    fn did_swap_buffers(&mut self) {
        self.pending_swaps += 1;
    }

    fn did_swap_buffers_complete(&mut self) {
        self.pending_swaps = self.pending_swaps.saturating_sub(1);
    }

    fn commit_vsync_parameters(&mut self, timebase: Duration, interval: Duration) {
        self.vsync_timebase = timebase;
        self.vsync_interval = interval;
    }

    fn set_estimated_parent_draw_time(&mut self, draw_time: Duration) {
        self.estimated_parent_draw_time = draw_time;
    }

    fn set_max_swaps_pending(&mut self, max: usize) {
        self.max_swaps_pending = Some(max);
    }

    fn next_action(&mut self) -> Option<ScheduledAction> {
        let action = self.choose_action();
        tracing::trace!(?action, main_frame = ?self.main_frame, "scheduler action");
        action
    }
}
