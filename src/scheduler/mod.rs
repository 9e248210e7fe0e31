//! Frame scheduling: the collaborator that decides when each pipeline step runs.

pub mod begin_frame;
pub mod frame_scheduler;

use std::time::Duration;

use serde::Serialize;

use crate::host_impl::frame::DrawResult;

pub use frame_scheduler::FrameScheduler;

/// A pipeline step the scheduler wants the proxy to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledAction {
    SendBeginMainFrame,
    Commit,
    ActivateSyncTree,
    Animate,
    PrepareTiles,
    DrawAndSwapIfPossible,
    /// Not used by the single-threaded proxy.
    DrawAndSwapForced,
    BeginOutputSurfaceCreation,
    /// Not used by the single-threaded proxy.
    InvalidateOutputSurface,
}

/// Why a main frame ended without a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitEarlyOutReason {
    AbortedOutputSurfaceLost,
    AbortedNotVisible,
    AbortedDeferredCommit,
    FinishedNoUpdates,
}

impl CommitEarlyOutReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitEarlyOutReason::AbortedOutputSurfaceLost => "aborted_output_surface_lost",
            CommitEarlyOutReason::AbortedNotVisible => "aborted_not_visible",
            CommitEarlyOutReason::AbortedDeferredCommit => "aborted_deferred_commit",
            CommitEarlyOutReason::FinishedNoUpdates => "finished_no_updates",
        }
    }
}

/// Receives frame-production notifications and hands back [`ScheduledAction`]s.
///
/// The proxy pulls actions with [`next_action`](Scheduler::next_action) until it returns `None`;
/// notifications raised while an action runs are visible to the next pull.
pub trait Scheduler {
    fn set_can_start(&mut self);
    fn set_visible(&mut self, visible: bool);
    fn set_can_draw(&mut self, can_draw: bool);
    fn set_needs_commit(&mut self);
    fn set_needs_redraw(&mut self);
    fn set_needs_animate(&mut self);
    fn set_needs_prepare_tiles(&mut self);
    fn set_defer_commits(&mut self, defer_commits: bool);
    fn set_throttle_frame_production(&mut self, throttle: bool);

    fn notify_begin_main_frame_started(&mut self);
    fn notify_ready_to_commit(&mut self);
    fn notify_ready_to_activate(&mut self);
    fn begin_main_frame_aborted(&mut self, reason: CommitEarlyOutReason);
    /// A main frame is in flight between send and commit.
    fn commit_pending(&self) -> bool;

    fn did_create_and_initialize_output_surface(&mut self);
    fn did_lose_output_surface(&mut self);
    fn did_prepare_tiles(&mut self);
    fn did_draw(&mut self, result: DrawResult);
    fn did_swap_buffers(&mut self);
    fn did_swap_buffers_complete(&mut self);

    fn commit_vsync_parameters(&mut self, _timebase: Duration, _interval: Duration) {}
    fn set_estimated_parent_draw_time(&mut self, _draw_time: Duration) {}
    fn set_max_swaps_pending(&mut self, _max: usize) {}

    fn next_action(&mut self) -> Option<ScheduledAction>;
}
