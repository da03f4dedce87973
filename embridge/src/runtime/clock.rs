use std::thread;
use std::time::{Duration, Instant};

/// Time source for the run loop. [`SystemClock`] in production; tests swap
/// in a virtual clock so the loop can be driven without sleeping.
pub trait Clock {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}
