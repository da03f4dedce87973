use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, trace};
use parking_lot::Mutex;

use super::messenger::SimMessenger;
use crate::host::{
    EngineRef, HostEngine, HostRegistrar, HostView, NO_PENDING_TASK,
    RegistrarDestroyedFn, RegistrarRef, ViewRef,
};

// Fake handle addresses. Never dereferenced, only compared.
static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(1);

fn next_handle_addr() -> usize {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed) << 4
}

/// Engine that pumps a [`SimMessenger`]: posted inbound messages are
/// delivered to their routes and pending replies are answered with an echo
/// of the message they belong to.
pub struct SimEngine {
    handle: EngineRef,
    messenger: Arc<SimMessenger>,
    view: Option<ViewRef>,
    pumps: u64,
}

impl SimEngine {
    pub fn new(messenger: Arc<SimMessenger>) -> Self {
        Self {
            handle: EngineRef::from_addr(next_handle_addr())
                .expect("handle addresses are non-zero"),
            messenger,
            view: None,
            pumps: 0,
        }
    }

    pub fn as_raw(&self) -> EngineRef {
        self.handle
    }

    pub fn messenger(&self) -> &Arc<SimMessenger> {
        &self.messenger
    }

    pub fn view(&self) -> Option<ViewRef> {
        self.view
    }

    pub fn pumps(&self) -> u64 {
        self.pumps
    }
}

impl HostEngine for SimEngine {
    fn set_view(&mut self, view: ViewRef) {
        debug!("{:?} attached to {:?}", self.handle, view);
        self.view = Some(view);
    }

    fn process_messages(&mut self) -> u64 {
        self.pumps += 1;

        // Each pop releases the queue lock before the callback runs, so
        // handlers may post or send from inside a delivery.
        while let Some((channel, data)) = self.messenger.take_posted() {
            self.messenger.deliver(&channel, &data);
        }

        while let Some(pending) = self.messenger.take_pending_reply() {
            trace!("sim: echoing reply on '{}'", pending.channel());
            let echo = pending.message().to_vec();
            pending.complete(Some(echo.as_slice()));
        }

        if self.messenger.has_posted()
            || self.messenger.pending_reply_count() > 0
        {
            0
        } else {
            NO_PENDING_TASK
        }
    }
}

/// View that runs for a fixed number of frames at a fixed rate.
pub struct SimView {
    handle: ViewRef,
    frames_remaining: u64,
    frame_rate: f32,
}

impl SimView {
    pub fn new(frames: u64, frame_rate: f32) -> Self {
        Self {
            handle: ViewRef::from_addr(next_handle_addr())
                .expect("handle addresses are non-zero"),
            frames_remaining: frames,
            frame_rate,
        }
    }

    pub fn frames_remaining(&self) -> u64 {
        self.frames_remaining
    }

    pub fn set_frame_rate(&mut self, frame_rate: f32) {
        self.frame_rate = frame_rate;
    }
}

impl HostView for SimView {
    fn dispatch_event(&mut self) -> bool {
        if self.frames_remaining == 0 {
            return false;
        }
        self.frames_remaining -= 1;
        true
    }

    fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    fn as_raw(&self) -> ViewRef {
        self.handle
    }
}

/// Registrar whose teardown is triggered by hand with
/// [`SimRegistrar::destroy`].
pub struct SimRegistrar {
    handle: RegistrarRef,
    callback: Mutex<Option<RegistrarDestroyedFn>>,
}

impl Default for SimRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRegistrar {
    pub fn new() -> Self {
        Self {
            handle: RegistrarRef::from_addr(next_handle_addr())
                .expect("handle addresses are non-zero"),
            callback: Mutex::new(None),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Fires the armed teardown callback. Returns `false` if nothing was
    /// armed; the slot is disarmed before the callback runs, so a second
    /// call is a no-op unless the callback re-armed it.
    pub fn destroy(&self) -> bool {
        let callback = self.callback.lock().take();

        match callback {
            Some(callback) => {
                unsafe { callback(self.handle.as_ptr()) };
                true
            }
            None => false,
        }
    }
}

unsafe impl HostRegistrar for SimRegistrar {
    fn handle(&self) -> RegistrarRef {
        self.handle
    }

    fn set_destruction_callback(&self, callback: Option<RegistrarDestroyedFn>) {
        *self.callback.lock() = callback;
    }
}
