//! PollingScheduler
//!
//! Decides, once per fixed external tick, whether that tick performs a real
//! state refresh. Its counters live in [`ScanState`] and are only mutated
//! here, through [`PollingScheduler::tick`] and [`PollingScheduler::observe`].

use std::sync::Arc;

use crate::guard::ReentrancyGuard;
use crate::model::PlaybackSnapshot;

/// Scheduler counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanState {
    pub baseline_countdown: u32,
    pub post_command_countdown: u32,
    /// Seconds left in the playing item; `None` when paused or unknown
    pub last_known_remaining_secs: Option<u64>,
    pub playing: bool,
}

pub struct PollingScheduler {
    state: ScanState,
    baseline_period: u32,
    near_end_threshold_secs: u64,
    guard: Arc<ReentrancyGuard>,
}

impl PollingScheduler {
    pub fn new(baseline_period: u32, near_end_threshold_secs: u64, guard: Arc<ReentrancyGuard>) -> Self {
        let baseline_period = baseline_period.max(1);
        Self {
            state: ScanState {
                baseline_countdown: baseline_period,
                post_command_countdown: 0,
                last_known_remaining_secs: None,
                playing: false,
            },
            baseline_period,
            near_end_threshold_secs,
            guard,
        }
    }

    /// Advance one tick. Returns whether this tick should refresh.
    ///
    /// Disabled ticks pause the clock: counters are left untouched. Ticks
    /// during a command return false without consuming anything.
    pub fn tick(&mut self, enabled: bool) -> bool {
        if !enabled || self.guard.in_command() {
            return false;
        }

        if let Some(burst) = self.guard.take_armed_burst() {
            self.state.post_command_countdown = burst;
        }

        let state = &mut self.state;
        state.baseline_countdown = state.baseline_countdown.saturating_sub(1);
        let mut due = state.baseline_countdown == 0;

        if state.post_command_countdown > 0 {
            state.post_command_countdown -= 1;
            due = true;
        }

        if state.playing
            && matches!(state.last_known_remaining_secs, Some(r) if r < self.near_end_threshold_secs)
        {
            due = true;
        }

        if due {
            state.baseline_countdown = self.baseline_period;
        }
        self.shorten_to_remaining();
        due
    }

    /// Feed the latest snapshot back so the near-end window tracks the item.
    pub fn observe(&mut self, snapshot: &PlaybackSnapshot) {
        self.state.playing = snapshot.is_playing;
        self.state.last_known_remaining_secs = if snapshot.is_playing {
            snapshot.remaining_secs()
        } else {
            None
        };
        self.shorten_to_remaining();
    }

    fn shorten_to_remaining(&mut self) {
        if let Some(remaining) = self.state.last_known_remaining_secs {
            if remaining > 0 && remaining < u64::from(self.state.baseline_countdown) {
                self.state.baseline_countdown = remaining as u32;
            }
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn baseline_period(&self) -> u32 {
        self.baseline_period
    }
}
