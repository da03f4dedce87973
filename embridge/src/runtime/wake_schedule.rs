use std::time::{Duration, Instant};

use super::config::RunLoopConfig;
use crate::host::NO_PENDING_TASK;

/// Converts the engine's "nanoseconds until next task" report.
pub fn engine_wait_from_nanos(nanos: u64) -> Option<Duration> {
    if nanos == NO_PENDING_TASK {
        None
    } else {
        Some(Duration::from_nanos(nanos))
    }
}

/// Merges the engine's next-task deadline with a frame-rate deadline into
/// one wake time. The scheduled wake time never moves backwards.
#[derive(Clone, Debug)]
pub struct WakeSchedule {
    config: RunLoopConfig,
    next_engine_wake: Option<Instant>,
    next_frame_deadline: Instant,
    last_scheduled_wake: Instant,
}

impl WakeSchedule {
    pub fn new(config: RunLoopConfig, now: Instant) -> Self {
        Self {
            config,
            next_engine_wake: None,
            next_frame_deadline: now,
            last_scheduled_wake: now,
        }
    }

    /// `None` while the engine reports nothing pending.
    pub fn next_engine_wake(&self) -> Option<Instant> {
        self.next_engine_wake
    }

    pub fn next_frame_deadline(&self) -> Instant {
        self.next_frame_deadline
    }

    pub fn last_scheduled_wake(&self) -> Instant {
        self.last_scheduled_wake
    }

    pub fn wait_duration(&self, now: Instant) -> Duration {
        self.last_scheduled_wake.saturating_duration_since(now)
    }

    pub fn frame_interval(&self, frame_rate: f32) -> Duration {
        let frame_rate = self.config.clamp_frame_rate(frame_rate);
        let micros = (1_000_000.0 / f64::from(frame_rate)).trunc();
        Duration::from_micros(micros as u64)
    }

    pub fn schedule(
        &mut self,
        now: Instant,
        engine_wait: Option<Duration>,
        frame_rate: f32,
    ) -> Instant {
        // Waits too large to represent are as good as no pending task.
        self.next_engine_wake =
            engine_wait.and_then(|wait| now.checked_add(wait));
        self.next_frame_deadline = now + self.frame_interval(frame_rate);

        let next = match self.next_engine_wake {
            Some(engine_wake) => engine_wake.min(self.next_frame_deadline),
            None => self.next_frame_deadline,
        };

        self.last_scheduled_wake = self.last_scheduled_wake.max(next);
        self.last_scheduled_wake
    }
}
