#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use embridge::Bridge;
use embridge::sim::SimMessenger;

/// Counts invocations and releases of the closure it is moved into.
#[derive(Clone, Default)]
pub struct Tracker {
    calls: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to move into a closure; dropping it counts as a release.
    pub fn token(&self) -> ReleaseToken {
        ReleaseToken {
            releases: self.releases.clone(),
        }
    }

    pub fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

pub struct ReleaseToken {
    releases: Arc<AtomicUsize>,
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn host() -> (Arc<SimMessenger>, Bridge) {
    (Arc::new(SimMessenger::new()), Bridge::new())
}
