use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DURATION_HISTORY_SIZE: usize = 60;
const COMMIT_AND_ACTIVATION_DURATION_PERCENTILE: f64 = 50.0;
const DRAW_DURATION_PERCENTILE: f64 = 100.0;

/// Fixed-size window of recent durations.
#[derive(Clone, Debug)]
pub struct RollingDurationHistory {
    capacity: usize,
    samples: VecDeque<Duration>,
}

impl RollingDurationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentile; zero when empty.
    pub fn percentile(&self, percent: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (percent.clamp(0.0, 100.0) / 100.0 * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }
}

/// Durations of the main-frame, activation and draw phases, for scheduler estimates.
#[derive(Clone, Debug)]
pub struct TimingHistory {
    begin_main_frame_to_commit: RollingDurationHistory,
    commit_to_activate: RollingDurationHistory,
    draw: RollingDurationHistory,
    begin_main_frame_sent_at: Option<Instant>,
    commit_complete_at: Option<Instant>,
    draw_started_at: Option<Instant>,
}

impl Default for TimingHistory {
    fn default() -> Self {
        Self {
            begin_main_frame_to_commit: RollingDurationHistory::new(DURATION_HISTORY_SIZE),
            commit_to_activate: RollingDurationHistory::new(DURATION_HISTORY_SIZE),
            draw: RollingDurationHistory::new(DURATION_HISTORY_SIZE),
            begin_main_frame_sent_at: None,
            commit_complete_at: None,
            draw_started_at: None,
        }
    }
}

impl TimingHistory {
    pub fn did_begin_main_frame(&mut self) {
        self.begin_main_frame_sent_at = Some(Instant::now());
    }

    pub fn did_commit(&mut self) {
        let now = Instant::now();
        if let Some(sent) = self.begin_main_frame_sent_at.take() {
            self.begin_main_frame_to_commit.insert(now - sent);
        }
        self.commit_complete_at = Some(now);
    }

    pub fn did_activate_sync_tree(&mut self) {
        if let Some(committed) = self.commit_complete_at.take() {
            self.commit_to_activate.insert(committed.elapsed());
        }
    }

    pub fn did_start_drawing(&mut self) {
        self.draw_started_at = Some(Instant::now());
    }

    pub fn did_finish_drawing(&mut self) {
        if let Some(started) = self.draw_started_at.take() {
            self.draw.insert(started.elapsed());
        }
    }

    pub fn draw_duration_estimate(&self) -> Duration {
        self.draw.percentile(DRAW_DURATION_PERCENTILE)
    }

    pub fn begin_main_frame_to_commit_duration_estimate(&self) -> Duration {
        self.begin_main_frame_to_commit
            .percentile(COMMIT_AND_ACTIVATION_DURATION_PERCENTILE)
    }

    pub fn commit_to_activate_duration_estimate(&self) -> Duration {
        self.commit_to_activate
            .percentile(COMMIT_AND_ACTIVATION_DURATION_PERCENTILE)
    }

    pub fn samples(&self) -> (usize, usize, usize) {
        (
            self.begin_main_frame_to_commit.len(),
            self.commit_to_activate.len(),
            self.draw.len(),
        )
    }
}
