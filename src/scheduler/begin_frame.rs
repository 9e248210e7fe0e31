use std::time::Duration;

use serde::Serialize;

/// Default frame interval (60 Hz).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_666);

/// Timing of one frame, relative to an arbitrary monotonic origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BeginFrameArgs {
    pub frame_time: Duration,
    pub deadline: Duration,
    pub interval: Duration,
}

impl BeginFrameArgs {
    pub fn new(frame_time: Duration) -> Self {
        Self::with_interval(frame_time, DEFAULT_FRAME_INTERVAL)
    }

    pub fn with_interval(frame_time: Duration, interval: Duration) -> Self {
        Self {
            frame_time,
            deadline: frame_time + interval,
            interval,
        }
    }
}

impl Default for BeginFrameArgs {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}
