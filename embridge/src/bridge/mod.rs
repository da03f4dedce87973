pub mod channels;
pub mod registrar;
pub mod reply;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use log::debug;

use self::channels::{ChannelRegistry, MessageHandler};
use self::registrar::{DestructionHandler, DestructionRegistry};
use self::reply::{BinaryReply, ReplyReceiver};
use crate::framework::error::Result;
use crate::host::{
    HostEngine, HostMessenger, HostRegistrar, MessengerRef, RegistrarRef,
    ViewRef,
};
use crate::message::{Message, ResponseHandle};

/// Identifies a handler installed with [`Bridge::set_message_handler`]. `0`
/// means "no handler".
pub type ConnectionId = i64;

/// Owns the closure tables for one engine instance. Every boundary operation
/// goes through a `Bridge`; independent bridges share nothing except the
/// registrar index.
///
/// A bridge must outlive the engine callbacks it installed. Dropping it
/// clears its channel routes and releases every stored closure.
pub struct Bridge {
    channels: ChannelRegistry,
    destruction: DestructionRegistry,
    next_connection: AtomicI64,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    pub fn new() -> Self {
        Self {
            channels: ChannelRegistry::new(),
            destruction: DestructionRegistry::new(),
            next_connection: AtomicI64::new(0),
        }
    }

    pub fn send<M>(
        &self,
        messenger: &M,
        channel: &str,
        message: &[u8],
    ) -> Result<()>
    where
        M: HostMessenger + ?Sized,
    {
        reply::send(messenger, channel, message)
    }

    pub fn send_with_reply<M, F>(
        &self,
        messenger: &M,
        channel: &str,
        message: &[u8],
        reply: Option<F>,
    ) -> Result<()>
    where
        M: HostMessenger + ?Sized,
        F: FnOnce(Option<&[u8]>) + Send + 'static,
    {
        let reply = reply.map(|f| Box::new(f) as BinaryReply);
        reply::send_with_reply(messenger, channel, message, reply)
    }

    pub fn request<M>(
        &self,
        messenger: &M,
        channel: &str,
        message: &[u8],
    ) -> Result<ReplyReceiver>
    where
        M: HostMessenger + ?Sized,
    {
        reply::request(messenger, channel, message)
    }

    pub fn send_response<M>(
        &self,
        messenger: &M,
        handle: ResponseHandle,
        response: Option<&[u8]>,
    ) -> Result<()>
    where
        M: HostMessenger + ?Sized,
    {
        reply::send_response(messenger, handle, response)
    }

    pub fn set_channel_handler<M, F>(
        &self,
        messenger: &Arc<M>,
        channel: &str,
        handler: Option<F>,
    ) -> Result<()>
    where
        M: HostMessenger + 'static,
        F: Fn(MessengerRef, &Message<'_>) + Send + Sync + 'static,
    {
        let handler = handler.map(|f| Arc::new(f) as MessageHandler);
        self.channels.set_channel_handler(messenger, channel, handler)
    }

    pub fn clear_channel_handler<M>(
        &self,
        messenger: &Arc<M>,
        channel: &str,
    ) -> Result<()>
    where
        M: HostMessenger + 'static,
    {
        self.channels.set_channel_handler(messenger, channel, None)
    }

    /// Request/response form of [`Bridge::set_channel_handler`]: whatever
    /// `handler` returns is sent back through the message's response handle.
    pub fn set_message_handler<M, F>(
        &self,
        messenger: &Arc<M>,
        channel: &str,
        handler: Option<F>,
    ) -> Result<ConnectionId>
    where
        M: HostMessenger + 'static,
        F: Fn(Option<&[u8]>) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let Some(handler) = handler else {
            self.channels.set_channel_handler(messenger, channel, None)?;
            return Ok(0);
        };

        let responder = Arc::downgrade(messenger);
        let wrapped: MessageHandler = Arc::new(
            move |_: MessengerRef, message: &Message<'_>| {
                let response = handler(message.data());

                let Some(handle) = message.take_response_handle() else {
                    return;
                };
                let Some(messenger) = responder.upgrade() else {
                    debug!(
                        "messenger gone before responding on '{}'",
                        message.channel()
                    );
                    return;
                };

                let response = response.as_deref();
                if let Err(err) =
                    reply::send_response(&*messenger, handle, response)
                {
                    debug!(
                        "dropping response on '{}': {}",
                        message.channel(),
                        err
                    );
                }
            },
        );

        self.channels
            .set_channel_handler(messenger, channel, Some(wrapped))?;

        Ok(self.next_connection.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn set_destruction_handler<R, F>(&self, registrar: &R, handler: F)
    where
        R: HostRegistrar + ?Sized,
        F: FnOnce(RegistrarRef) + Send + 'static,
    {
        let handler: DestructionHandler = Box::new(handler);
        self.destruction.set_destruction_handler(registrar, handler);
    }

    pub fn set_engine_view<E>(&self, engine: &mut E, view: ViewRef)
    where
        E: HostEngine + ?Sized,
    {
        engine.set_view(view);
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn destruction_handlers(&self) -> &DestructionRegistry {
        &self.destruction
    }
}
