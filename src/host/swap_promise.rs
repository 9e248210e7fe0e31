use serde::Serialize;

/// Why a queued swap promise was resolved without a swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DidNotSwapReason {
    /// A frame was committed but never swapped.
    SwapFails,
    /// The main frame carrying the promise was aborted before commit.
    CommitFails,
    /// The commit produced nothing to draw.
    CommitNoUpdate,
}

/// Work attached to "the next frame that reaches the screen".
///
/// Queued on the main side, moved to the active tree at commit, and resolved exactly once: by
/// [`did_swap`](SwapPromise::did_swap) when a frame carrying it is handed to the output surface,
/// or by [`did_not_swap`](SwapPromise::did_not_swap) when that can no longer happen.
pub trait SwapPromise {
    fn did_swap(&mut self);
    fn did_not_swap(&mut self, reason: DidNotSwapReason);
}
