//! Panic containment for trampolines.
//!
//! Trampolines are `extern "C"` functions called by the host engine, so a
//! panic escaping a user closure would abort the process. Every closure
//! invocation that happens on the far side of the ABI goes through
//! [`guard_void`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use log::error;

pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Runs `f`, logging and swallowing any panic. Returns `false` if `f`
/// panicked.
pub fn guard_void(op: &str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            error!("panic in `{}` callback: {}", op, panic_message(payload));
            false
        }
    }
}
