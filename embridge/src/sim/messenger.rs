use std::collections::VecDeque;
use std::ffi::{CStr, CString, c_void};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{trace, warn};
use parking_lot::Mutex;

use crate::framework::util::{HashMap, HashSet};
use crate::host::{
    BinaryReplyFn, HostMessenger, MessageCallbackFn, MessengerRef,
    RawMessage, RawResponseRef, ReplyCleanupFn,
};

// `user_data` is kept as an address so the messenger stays Send + Sync.
#[derive(Clone, Copy)]
struct Route {
    callback: MessageCallbackFn,
    user_data: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: String,
    pub data: Vec<u8>,
    pub expects_reply: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentResponse {
    pub handle: usize,
    pub data: Vec<u8>,
}

/// A reply the simulated engine still owes. Dropping it runs the cleanup
/// callback, the way a real engine releases `user_data` once it is done.
pub struct PendingReply {
    channel: String,
    message: Vec<u8>,
    reply: BinaryReplyFn,
    cleanup: Option<ReplyCleanupFn>,
    user_data: usize,
}

impl PendingReply {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Calls the reply callback. Calling it more than once breaks the
    /// engine contract; the bridge must tolerate it anyway.
    pub fn invoke(&self, data: Option<&[u8]>) {
        let (ptr, len) = match data {
            Some(data) => (data.as_ptr(), data.len()),
            None => (ptr::null(), 0),
        };
        unsafe { (self.reply)(ptr, len, self.user_data as *mut c_void) };
    }

    pub fn complete(self, data: Option<&[u8]>) {
        self.invoke(data);
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup {
            unsafe { cleanup(self.user_data as *mut c_void) };
        }
    }
}

/// In-process stand-in for the engine's binary messenger.
///
/// Routes [`SimMessenger::deliver`]ed messages to whatever callback the
/// bridge installed, records outbound traffic, and keeps reply callbacks
/// pending until a test or [`super::SimEngine`] completes them.
#[derive(Default)]
pub struct SimMessenger {
    routes: Mutex<HashMap<String, Route>>,
    pending_replies: Mutex<VecDeque<PendingReply>>,
    inbound: Mutex<VecDeque<(String, Vec<u8>)>>,
    sent: Mutex<Vec<SentMessage>>,
    responses: Mutex<Vec<SentResponse>>,
    open_responses: Mutex<HashSet<usize>>,
    next_response: AtomicUsize,
    fail_sends: AtomicBool,
    unavailable: AtomicBool,
}

impl SimMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    pub fn is_routed(&self, channel: &str) -> bool {
        self.routes.lock().contains_key(channel)
    }

    pub fn routed_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> =
            self.routes.lock().keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn responses(&self) -> Vec<SentResponse> {
        self.responses.lock().clone()
    }

    pub fn pending_reply_count(&self) -> usize {
        self.pending_replies.lock().len()
    }

    pub fn take_pending_reply(&self) -> Option<PendingReply> {
        self.pending_replies.lock().pop_front()
    }

    /// Queues a message for delivery on the next engine pump.
    pub fn post(&self, channel: &str, data: &[u8]) {
        self.inbound
            .lock()
            .push_back((channel.to_string(), data.to_vec()));
    }

    pub fn take_posted(&self) -> Option<(String, Vec<u8>)> {
        self.inbound.lock().pop_front()
    }

    pub fn has_posted(&self) -> bool {
        !self.inbound.lock().is_empty()
    }

    /// Delivers a message to the routed callback right away, on the calling
    /// thread. Returns the response handle id it was delivered with, or
    /// `None` if nothing is routed for `channel`.
    pub fn deliver(&self, channel: &str, data: &[u8]) -> Option<usize> {
        let route = self.routes.lock().get(channel).copied();
        let Some(route) = route else {
            trace!("sim: nothing routed on '{}'", channel);
            return None;
        };

        let Ok(channel_c) = CString::new(channel) else {
            warn!("sim: channel '{}' contains a NUL byte", channel);
            return None;
        };

        let handle = self.next_response.fetch_add(1, Ordering::Relaxed) + 1;
        self.open_responses.lock().insert(handle);

        let record = RawMessage {
            struct_size: size_of::<RawMessage>(),
            channel: channel_c.as_ptr(),
            message: if data.is_empty() {
                ptr::null()
            } else {
                data.as_ptr()
            },
            message_size: data.len(),
            response_handle: ptr::without_provenance(handle),
        };

        unsafe {
            (route.callback)(
                self.as_raw().as_ptr(),
                &record,
                route.user_data as *mut c_void,
            )
        };

        Some(handle)
    }

    /// Response handles handed out but not yet answered.
    pub fn open_response_count(&self) -> usize {
        self.open_responses.lock().len()
    }
}

unsafe impl HostMessenger for SimMessenger {
    fn send_with_reply(
        &self,
        channel: &CStr,
        message: &[u8],
        reply: Option<BinaryReplyFn>,
        user_data: *mut c_void,
        cleanup: Option<ReplyCleanupFn>,
    ) -> bool {
        if self.fail_sends.load(Ordering::Acquire) {
            return false;
        }

        let channel = channel.to_string_lossy().into_owned();

        self.sent.lock().push(SentMessage {
            channel: channel.clone(),
            data: message.to_vec(),
            expects_reply: reply.is_some(),
        });

        if let Some(reply) = reply {
            self.pending_replies.lock().push_back(PendingReply {
                channel,
                message: message.to_vec(),
                reply,
                cleanup,
                user_data: user_data as usize,
            });
        }

        true
    }

    fn set_callback(
        &self,
        channel: &CStr,
        callback: Option<MessageCallbackFn>,
        user_data: *mut c_void,
    ) {
        let channel = channel.to_string_lossy().into_owned();
        let mut routes = self.routes.lock();

        match callback {
            Some(callback) => {
                routes.insert(
                    channel,
                    Route {
                        callback,
                        user_data: user_data as usize,
                    },
                );
            }
            None => {
                routes.remove(&channel);
            }
        }
    }

    fn send_response(&self, handle: RawResponseRef, data: &[u8]) {
        let handle = handle.addr();

        if !self.open_responses.lock().remove(&handle) {
            warn!("sim: response handle {} already answered", handle);
            return;
        }

        self.responses.lock().push(SentResponse {
            handle,
            data: data.to_vec(),
        });
    }

    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::Acquire)
    }

    fn as_raw(&self) -> MessengerRef {
        MessengerRef::from_non_null(NonNull::from(self).cast())
    }
}
