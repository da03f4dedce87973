use std::time::Duration;

use log::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::config::RunLoopConfig;
use super::wake_schedule::{WakeSchedule, engine_wait_from_nanos};
use crate::host::{HostEngine, HostView, NativeMainLoop};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunLoopStats {
    pub iterations: u64,
    pub total_wait: Duration,
}

/// Drives a view and its engine from a single thread, interleaving engine
/// work with one step of the platform's native loop per iteration.
#[derive(Debug)]
pub struct RunLoop<C: Clock = SystemClock> {
    config: RunLoopConfig,
    clock: C,
}

impl RunLoop<SystemClock> {
    pub fn new(config: RunLoopConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for RunLoop<SystemClock> {
    fn default() -> Self {
        Self::new(RunLoopConfig::default())
    }
}

impl<C: Clock> RunLoop<C> {
    pub fn with_clock(config: RunLoopConfig, clock: C) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &RunLoopConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Blocks until `view` reports shutdown. Each iteration:
    ///
    /// 1. dispatch pending platform input (stop if the view is done)
    /// 2. sleep until the previously scheduled wake time
    /// 3. let the engine run due tasks
    /// 4. schedule the next wake from the engine and frame deadlines
    /// 5. step the native main loop
    pub fn run<E, V, N>(
        &self,
        engine: &mut E,
        view: &mut V,
        native: &mut N,
    ) -> RunLoopStats
    where
        E: HostEngine + ?Sized,
        V: HostView + ?Sized,
        N: NativeMainLoop + ?Sized,
    {
        let mut schedule =
            WakeSchedule::new(self.config.clone(), self.clock.now());
        let mut stats = RunLoopStats::default();

        debug!("run loop started for {:?}", view.as_raw());

        while view.dispatch_event() {
            let wait = schedule.wait_duration(self.clock.now());
            self.clock.sleep(wait);
            stats.total_wait += wait;

            let engine_wait = engine_wait_from_nanos(engine.process_messages());
            let next_wake = schedule.schedule(
                self.clock.now(),
                engine_wait,
                view.frame_rate(),
            );

            trace!(
                "engine wait {:?}, next wake in {:?}",
                engine_wait,
                next_wake.saturating_duration_since(self.clock.now())
            );

            native.step();
            stats.iterations += 1;
        }

        info!(
            "run loop stopped after {} iterations ({:?} asleep)",
            stats.iterations, stats.total_wait
        );

        stats
    }
}

/// Runs the default-configured loop on the system clock.
pub fn run_loop<E, V, N>(
    engine: &mut E,
    view: &mut V,
    native: &mut N,
) -> RunLoopStats
where
    E: HostEngine + ?Sized,
    V: HostView + ?Sized,
    N: NativeMainLoop + ?Sized,
{
    RunLoop::default().run(engine, view, native)
}
