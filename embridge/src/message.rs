use std::cell::Cell;
use std::ffi::CStr;
use std::fmt;

use log::warn;

use crate::host::{RawMessage, RawResponseRef, bytes_from_raw};

/// Single-use permission to answer an inbound message. Deliberately neither
/// `Clone` nor `Copy`: sending a response consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct ResponseHandle(RawResponseRef);

impl ResponseHandle {
    pub fn raw(&self) -> RawResponseRef {
        self.0
    }

    pub(crate) fn into_raw(self) -> RawResponseRef {
        self.0
    }
}

/// Borrowed view of an engine message record, valid for the duration of a
/// single handler invocation.
pub struct Message<'a> {
    channel: &'a str,
    data: Option<&'a [u8]>,
    response_handle: Cell<Option<ResponseHandle>>,
}

impl<'a> Message<'a> {
    pub fn new(
        channel: &'a str,
        data: Option<&'a [u8]>,
        response_handle: Option<RawResponseRef>,
    ) -> Self {
        Self {
            channel,
            data,
            response_handle: Cell::new(response_handle.map(ResponseHandle)),
        }
    }

    /// # Safety
    ///
    /// `raw` must be null or point to a record whose channel string and
    /// payload stay valid for `'a`.
    pub unsafe fn from_raw(raw: *const RawMessage) -> Option<Self> {
        let raw = unsafe { raw.as_ref() }?;

        if raw.channel.is_null() {
            warn!("dropping message record without a channel");
            return None;
        }

        let channel = match unsafe { CStr::from_ptr(raw.channel) }.to_str() {
            Ok(channel) => channel,
            Err(err) => {
                warn!("dropping message on non UTF-8 channel: {}", err);
                return None;
            }
        };

        let data = unsafe { bytes_from_raw(raw.message, raw.message_size) };
        let response_handle =
            RawResponseRef::from_raw(raw.response_handle.cast_mut());

        Some(Self::new(channel, data, response_handle))
    }

    pub fn channel(&self) -> &'a str {
        self.channel
    }

    pub fn data(&self) -> Option<&'a [u8]> {
        self.data
    }

    pub fn to_vec(&self) -> Option<Vec<u8>> {
        self.data.map(<[u8]>::to_vec)
    }

    pub fn has_response_handle(&self) -> bool {
        let handle = self.response_handle.take();
        let present = handle.is_some();
        self.response_handle.set(handle);
        present
    }

    /// Takes the response handle. Every call after the first returns `None`.
    pub fn take_response_handle(&self) -> Option<ResponseHandle> {
        self.response_handle.take()
    }
}

impl fmt::Debug for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("channel", &self.channel)
            .field("len", &self.data.map_or(0, <[u8]>::len))
            .field("has_response_handle", &self.has_response_handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;
    use std::ptr;

    use super::*;

    fn raw_record(
        channel: &CStr,
        data: &[u8],
        handle: usize,
    ) -> RawMessage {
        RawMessage {
            struct_size: size_of::<RawMessage>(),
            channel: channel.as_ptr(),
            message: data.as_ptr(),
            message_size: data.len(),
            response_handle: ptr::without_provenance(handle),
        }
    }

    #[test]
    fn reads_engine_record() {
        let channel = CString::new("ping").unwrap();
        let payload = [1u8, 2, 3];
        let raw = raw_record(&channel, &payload, 7);

        let message = unsafe { Message::from_raw(&raw) }.expect("valid record");
        assert_eq!(message.channel(), "ping");
        assert_eq!(message.data(), Some(&payload[..]));
        assert_eq!(
            message.take_response_handle().map(|h| h.raw().addr()),
            Some(7)
        );
    }

    #[test]
    fn response_handle_can_only_be_taken_once() {
        let message =
            Message::new("ping", None, RawResponseRef::from_addr(1));
        assert!(message.has_response_handle());
        assert!(message.take_response_handle().is_some());
        assert!(!message.has_response_handle());
        assert!(message.take_response_handle().is_none());
    }

    #[test]
    fn empty_payload_is_none() {
        let channel = CString::new("ping").unwrap();
        let raw = raw_record(&channel, &[], 0);

        let message = unsafe { Message::from_raw(&raw) }.expect("valid record");
        assert_eq!(message.data(), None);
        assert!(message.take_response_handle().is_none());
    }

    #[test]
    fn rejects_null_records() {
        assert!(unsafe { Message::from_raw(ptr::null()) }.is_none());

        let raw = RawMessage {
            struct_size: size_of::<RawMessage>(),
            channel: ptr::null(),
            message: ptr::null(),
            message_size: 0,
            response_handle: ptr::null(),
        };
        assert!(unsafe { Message::from_raw(&raw) }.is_none());
    }
}
