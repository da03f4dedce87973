//! One-shot reply bridging.
//!
//! A reply closure crosses the ABI as a boxed [`ReplySlot`]. The engine gets
//! the slot's address as `user_data` together with [`reply_thunk`] and
//! [`reply_cleanup_thunk`]. The reply thunk takes the closure out of the slot
//! before calling it, so a repeated reply finds an empty slot instead of a
//! released closure. The cleanup thunk frees the slot and with it any closure
//! that never fired.

use std::ffi::{CString, c_void};
use std::ptr;
use std::sync::mpsc::{self, Receiver};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::framework::error::{BridgeError, Result};
use crate::framework::ffi_guard::guard_void;
use crate::host::{HostMessenger, bytes_from_raw};
use crate::message::ResponseHandle;

/// Reply sink for an outbound message. Receives `None` when the engine
/// replied with no data (for example when nothing listens on the channel).
pub type BinaryReply = Box<dyn FnOnce(Option<&[u8]>) + Send + 'static>;

pub type ReplyReceiver = Receiver<Option<Vec<u8>>>;

struct ReplySlot {
    channel: String,
    reply: Mutex<Option<BinaryReply>>,
}

impl ReplySlot {
    fn new(channel: &str, reply: BinaryReply) -> Self {
        Self {
            channel: channel.to_string(),
            reply: Mutex::new(Some(reply)),
        }
    }

    fn fire(&self, data: Option<&[u8]>) {
        let reply = self.reply.lock().take();

        match reply {
            Some(reply) => {
                trace!("reply received on channel '{}'", self.channel);
                guard_void("reply", move || reply(data));
            }
            None => {
                warn!(
                    "ignoring duplicate reply on channel '{}'",
                    self.channel
                );
            }
        }
    }
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        if self.reply.get_mut().is_some() {
            debug!(
                "releasing reply on channel '{}' without invoking it",
                self.channel
            );
        }
    }
}

unsafe extern "C" fn reply_thunk(
    data: *const u8,
    data_size: usize,
    user_data: *mut c_void,
) {
    let Some(slot) = (unsafe { user_data.cast::<ReplySlot>().as_ref() }) else {
        warn!("reply invoked without a reply slot");
        return;
    };
    let data = unsafe { bytes_from_raw(data, data_size) };
    slot.fire(data);
}

unsafe extern "C" fn reply_cleanup_thunk(user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(user_data.cast::<ReplySlot>()) });
}

/// Validates a channel name and converts it for the engine.
pub(crate) fn channel_name(channel: &str) -> Result<CString> {
    if channel.is_empty() {
        return Err(BridgeError::InvalidChannel(
            channel.to_string(),
            "channel name is empty",
        ));
    }

    CString::new(channel).map_err(|_| {
        BridgeError::InvalidChannel(
            channel.to_string(),
            "channel name contains a NUL byte",
        )
    })
}

/// Sends `message` on `channel`, handing `reply` to the engine as a one-shot
/// callback. With no `reply` the engine is told there is no reply sink.
///
/// If the engine rejects the send, the reply closure is released here
/// without being invoked and [`BridgeError::SendFailed`] is returned.
pub fn send_with_reply<M>(
    messenger: &M,
    channel: &str,
    message: &[u8],
    reply: Option<BinaryReply>,
) -> Result<()>
where
    M: HostMessenger + ?Sized,
{
    let channel_c = channel_name(channel)?;

    if !messenger.is_available() {
        return Err(BridgeError::MessengerUnavailable);
    }

    let Some(reply) = reply else {
        let sent = messenger.send_with_reply(
            &channel_c,
            message,
            None,
            ptr::null_mut(),
            None,
        );
        return sent_or_failed(sent, channel);
    };

    let slot = Box::into_raw(Box::new(ReplySlot::new(channel, reply)));

    let sent = messenger.send_with_reply(
        &channel_c,
        message,
        Some(reply_thunk),
        slot.cast(),
        Some(reply_cleanup_thunk),
    );

    if !sent {
        // The engine retained nothing; the slot is still ours.
        drop(unsafe { Box::from_raw(slot) });
    }

    sent_or_failed(sent, channel)
}

/// Fire-and-forget send.
pub fn send<M>(messenger: &M, channel: &str, message: &[u8]) -> Result<()>
where
    M: HostMessenger + ?Sized,
{
    send_with_reply(messenger, channel, message, None)
}

/// Sends `message` and delivers the reply through a channel receiver.
/// The receiver disconnects without a value if the engine drops the reply.
pub fn request<M>(
    messenger: &M,
    channel: &str,
    message: &[u8],
) -> Result<ReplyReceiver>
where
    M: HostMessenger + ?Sized,
{
    let (tx, rx) = mpsc::channel();

    let reply: BinaryReply = Box::new(move |data: Option<&[u8]>| {
        let _ = tx.send(data.map(<[u8]>::to_vec));
    });

    send_with_reply(messenger, channel, message, Some(reply))?;
    Ok(rx)
}

/// Answers an inbound message. Consumes the handle, so each message can be
/// answered once.
pub fn send_response<M>(
    messenger: &M,
    handle: ResponseHandle,
    response: Option<&[u8]>,
) -> Result<()>
where
    M: HostMessenger + ?Sized,
{
    if !messenger.is_available() {
        return Err(BridgeError::MessengerUnavailable);
    }

    messenger.send_response(handle.into_raw(), response.unwrap_or_default());
    Ok(())
}

fn sent_or_failed(sent: bool, channel: &str) -> Result<()> {
    if sent {
        Ok(())
    } else {
        warn!("engine rejected message on channel '{}'", channel);
        Err(BridgeError::SendFailed(channel.to_string()))
    }
}
