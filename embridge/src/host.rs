//! The host engine's C callback surface.
//!
//! Everything the bridge knows about the engine is in this file: opaque
//! handle types, the `#[repr(C)]` message record, the plain function
//! pointer types the engine calls back through, and the traits an engine
//! binding implements. The bridge never dereferences a handle; it only
//! passes handles back to the engine or uses them as identities.

use std::ffi::{CStr, c_char, c_void};
use std::fmt;
use std::ptr::NonNull;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $raw:ident, $handle:ident) => {
        /// Opaque engine-side type. Only ever seen behind a pointer.
        #[repr(C)]
        pub struct $raw {
            _private: [u8; 0],
        }

        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $handle(NonNull<$raw>);

        // Handles are identities handed out by the engine; the bridge never
        // reads through them, so moving them between threads is sound.
        unsafe impl Send for $handle {}
        unsafe impl Sync for $handle {}

        impl $handle {
            pub fn from_raw(raw: *mut $raw) -> Option<Self> {
                NonNull::new(raw).map(Self)
            }

            pub fn from_non_null(ptr: NonNull<$raw>) -> Self {
                Self(ptr)
            }

            pub fn as_ptr(self) -> *mut $raw {
                self.0.as_ptr()
            }

            /// Builds a handle from an address, for engines that identify
            /// objects by integer ids rather than real pointers.
            pub fn from_addr(addr: usize) -> Option<Self> {
                Self::from_raw(std::ptr::without_provenance_mut(addr))
            }

            pub fn addr(self) -> usize {
                self.0.as_ptr().addr()
            }
        }

        impl fmt::Debug for $handle {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($handle), self.addr())
            }
        }
    };
}

opaque_handle!(
    /// Handle to the engine's binary messenger.
    RawMessenger,
    MessengerRef
);
opaque_handle!(
    /// Handle to a plugin registrar. Used as a registry key.
    RawRegistrar,
    RegistrarRef
);
opaque_handle!(RawEngine, EngineRef);
opaque_handle!(RawView, ViewRef);
opaque_handle!(RawResponseHandle, RawResponseRef);

/// Inbound message record as laid out by the engine.
#[repr(C)]
#[derive(Debug)]
pub struct RawMessage {
    pub struct_size: usize,
    pub channel: *const c_char,
    pub message: *const u8,
    pub message_size: usize,
    pub response_handle: *const RawResponseHandle,
}

/// Called by the engine with the reply to an outbound message.
pub type BinaryReplyFn = unsafe extern "C" fn(
    data: *const u8,
    data_size: usize,
    user_data: *mut c_void,
);

/// Called by the engine exactly once when it is done with a reply's
/// `user_data`, whether or not the reply itself fired.
pub type ReplyCleanupFn = unsafe extern "C" fn(user_data: *mut c_void);

/// Called by the engine for each inbound message on a routed channel.
pub type MessageCallbackFn = unsafe extern "C" fn(
    messenger: *mut RawMessenger,
    message: *const RawMessage,
    user_data: *mut c_void,
);

/// The engine's registrar teardown slot. Carries no user data.
pub type RegistrarDestroyedFn =
    unsafe extern "C" fn(registrar: *mut RawRegistrar);

/// Binding to the engine's messenger API.
///
/// # Safety
///
/// Implementors must honour the engine calling convention the bridge relies
/// on:
///
/// - `send_with_reply` returning `false` means nothing was retained and
///   neither `reply` nor `cleanup` will ever be called.
/// - `send_with_reply` returning `true` with a `reply` means `reply` is
///   called at most once, and then `cleanup` (when given) exactly once,
///   after which `user_data` is never touched again.
/// - After `set_callback(channel, None, _)` returns, no new invocation of
///   the previously routed callback for `channel` starts.
/// - A routed callback is called with this messenger's `as_raw()` handle.
pub unsafe trait HostMessenger: Send + Sync {
    fn send_with_reply(
        &self,
        channel: &CStr,
        message: &[u8],
        reply: Option<BinaryReplyFn>,
        user_data: *mut c_void,
        cleanup: Option<ReplyCleanupFn>,
    ) -> bool;

    fn set_callback(
        &self,
        channel: &CStr,
        callback: Option<MessageCallbackFn>,
        user_data: *mut c_void,
    );

    fn send_response(&self, handle: RawResponseRef, data: &[u8]);

    /// `false` once the owning engine has shut down.
    fn is_available(&self) -> bool {
        true
    }

    fn as_raw(&self) -> MessengerRef;
}

/// Binding to a plugin registrar.
///
/// # Safety
///
/// The callback armed through `set_destruction_callback` must be invoked at
/// most once per registrar, with that registrar's own handle.
pub unsafe trait HostRegistrar: Send + Sync {
    fn handle(&self) -> RegistrarRef;

    fn set_destruction_callback(&self, callback: Option<RegistrarDestroyedFn>);
}

/// Sentinel returned by [`HostEngine::process_messages`] when the engine has
/// no pending task.
pub const NO_PENDING_TASK: u64 = u64::MAX;

pub trait HostEngine {
    fn set_view(&mut self, view: ViewRef);

    /// Runs due engine tasks and returns nanoseconds until the next one, or
    /// [`NO_PENDING_TASK`].
    fn process_messages(&mut self) -> u64;
}

pub trait HostView {
    /// Dispatches one batch of platform input. `false` means the platform
    /// asked the view to shut down.
    fn dispatch_event(&mut self) -> bool;

    fn frame_rate(&self) -> f32;

    fn as_raw(&self) -> ViewRef;
}

/// One step of the platform's own main loop (timers, UI queue).
pub trait NativeMainLoop {
    fn step(&mut self);
}

impl<F: FnMut()> NativeMainLoop for F {
    fn step(&mut self) {
        self()
    }
}

/// Reads an engine-owned byte buffer. Null or zero-length buffers are
/// `None`.
///
/// # Safety
///
/// `data` must be null or valid for `size` bytes for `'a`.
pub(crate) unsafe fn bytes_from_raw<'a>(
    data: *const u8,
    size: usize,
) -> Option<&'a [u8]> {
    if data.is_null() || size == 0 {
        return None;
    }
    Some(unsafe { std::slice::from_raw_parts(data, size) })
}
