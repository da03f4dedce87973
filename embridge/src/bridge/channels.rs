//! Persistent per-channel message handlers.
//!
//! The engine never sees a handler's address, nor the registry's. Every
//! route is installed with [`message_thunk`] and an integer token; the thunk
//! resolves the token through [`TABLE_INDEX`] and then the handler by the
//! `(messenger, channel)` pair the message arrived on. A token whose
//! registry is gone resolves to nothing, so a delivery racing a dropped
//! bridge is a no-op.
//!
//! Each handler counts the threads currently inside it. Replacing or
//! clearing a handler waits for calls on other threads to return, so once
//! `set_channel_handler` returns the old handler is not running and never
//! runs again. A handler may replace itself; its own call is not waited on.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::thread::{self, ThreadId};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use super::reply::channel_name;
use crate::framework::error::{BridgeError, Result};
use crate::framework::ffi_guard::guard_void;
use crate::framework::util::{HashMap, HashSet};
use crate::host::{HostMessenger, MessengerRef, RawMessage, RawMessenger};
use crate::message::Message;

pub type MessageHandler =
    Arc<dyn Fn(MessengerRef, &Message<'_>) + Send + Sync + 'static>;

struct Entry {
    handler: MessageHandler,
    calls: Mutex<Vec<ThreadId>>,
    idle: Condvar,
}

impl Entry {
    fn new(handler: MessageHandler) -> Self {
        Self {
            handler,
            calls: Mutex::new(Vec::new()),
            idle: Condvar::new(),
        }
    }

    fn end_call(&self, caller: ThreadId) {
        let mut calls = self.calls.lock();
        if let Some(index) = calls.iter().position(|id| *id == caller) {
            calls.swap_remove(index);
        }
        self.idle.notify_all();
    }

    /// Blocks until no thread other than the caller is inside the handler.
    fn wait_idle(&self) {
        let me = thread::current().id();
        let mut calls = self.calls.lock();
        while calls.iter().any(|id| *id != me) {
            self.idle.wait(&mut calls);
        }
    }
}

type ChannelEntries = HashMap<String, Arc<Entry>>;

#[derive(Default)]
struct HandlerTable {
    handlers: Mutex<HashMap<MessengerRef, ChannelEntries>>,
}

impl HandlerTable {
    /// Finds the handler and records the calling thread inside it. Both
    /// happen under the table lock, so a removal either sees the call or
    /// the call misses the handler.
    fn begin_call(
        &self,
        messenger: MessengerRef,
        channel: &str,
        caller: ThreadId,
    ) -> Option<Arc<Entry>> {
        let handlers = self.handlers.lock();
        let entry = handlers.get(&messenger)?.get(channel)?.clone();
        entry.calls.lock().push(caller);
        Some(entry)
    }

    fn insert(
        &self,
        messenger: MessengerRef,
        channel: &str,
        entry: Arc<Entry>,
    ) -> Option<Arc<Entry>> {
        self.handlers
            .lock()
            .entry(messenger)
            .or_default()
            .insert(channel.to_string(), entry)
    }

    fn remove(
        &self,
        messenger: MessengerRef,
        channel: &str,
    ) -> Option<Arc<Entry>> {
        let mut handlers = self.handlers.lock();
        let channels = handlers.get_mut(&messenger)?;
        let removed = channels.remove(channel);
        if channels.is_empty() {
            handlers.remove(&messenger);
        }
        removed
    }
}

type TableIndex = HashMap<usize, Weak<HandlerTable>>;

static TABLE_INDEX: LazyLock<Mutex<TableIndex>> =
    LazyLock::new(|| Mutex::new(HashMap::default()));

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

fn resolve_token(token: usize) -> Option<Arc<HandlerTable>> {
    TABLE_INDEX.lock().get(&token).and_then(Weak::upgrade)
}

struct MessengerRoutes {
    messenger: Arc<dyn HostMessenger>,
    channels: HashSet<String>,
}

pub struct ChannelRegistry {
    token: usize,
    table: Arc<HandlerTable>,
    // Held across engine routing calls. The message thunk never takes it.
    routes: Mutex<HashMap<MessengerRef, MessengerRoutes>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let table = Arc::<HandlerTable>::default();

        TABLE_INDEX.lock().insert(token, Arc::downgrade(&table));

        Self {
            token,
            table,
            routes: Mutex::new(HashMap::default()),
        }
    }

    /// Installs, replaces or (with `None`) removes the handler for
    /// `channel` on `messenger`. Handlers on other messengers are left
    /// alone. A replaced or removed handler is never invoked again, and is
    /// released once calls to it on other threads have returned.
    pub fn set_channel_handler<M>(
        &self,
        messenger: &Arc<M>,
        channel: &str,
        handler: Option<MessageHandler>,
    ) -> Result<()>
    where
        M: HostMessenger + 'static,
    {
        let channel_c = channel_name(channel)?;

        if !messenger.is_available() {
            return Err(BridgeError::MessengerUnavailable);
        }

        let key = messenger.as_raw();
        let mut routes = self.routes.lock();

        let previous = match handler {
            Some(handler) => {
                let entry = Arc::new(Entry::new(handler));
                let previous = self.table.insert(key, channel, entry);

                messenger.set_callback(
                    &channel_c,
                    Some(message_thunk),
                    self.user_data(),
                );

                routes
                    .entry(key)
                    .or_insert_with(|| MessengerRoutes {
                        messenger: messenger.clone(),
                        channels: HashSet::default(),
                    })
                    .channels
                    .insert(channel.to_string());

                debug!(
                    "{} handler on channel '{}' of {:?}",
                    if previous.is_some() { "replaced" } else { "set" },
                    channel,
                    key
                );
                previous
            }
            None => {
                let previous = self.table.remove(key, channel);

                messenger.set_callback(&channel_c, None, ptr::null_mut());

                if let Some(messenger_routes) = routes.get_mut(&key) {
                    messenger_routes.channels.remove(channel);
                    if messenger_routes.channels.is_empty() {
                        routes.remove(&key);
                    }
                }

                debug!("cleared handler on channel '{}' of {:?}", channel, key);
                previous
            }
        };

        drop(routes);

        if let Some(previous) = previous {
            previous.wait_idle();
        }

        Ok(())
    }

    /// Whether any messenger has a handler for `channel`.
    pub fn has_handler(&self, channel: &str) -> bool {
        self.table
            .handlers
            .lock()
            .values()
            .any(|channels| channels.contains_key(channel))
    }

    pub fn has_route(&self, messenger: MessengerRef, channel: &str) -> bool {
        self.table
            .handlers
            .lock()
            .get(&messenger)
            .is_some_and(|channels| channels.contains_key(channel))
    }

    /// Channel names with a handler on at least one messenger.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .table
            .handlers
            .lock()
            .values()
            .flat_map(|channels| channels.keys().cloned())
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }

    fn user_data(&self) -> *mut c_void {
        ptr::without_provenance_mut(self.token)
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        TABLE_INDEX.lock().remove(&self.token);

        let routes = std::mem::take(self.routes.get_mut());

        for (_, messenger_routes) in routes {
            for channel in &messenger_routes.channels {
                if let Ok(channel_c) = channel_name(channel) {
                    messenger_routes.messenger.set_callback(
                        &channel_c,
                        None,
                        ptr::null_mut(),
                    );
                }
            }
        }

        let released = std::mem::take(&mut *self.table.handlers.lock());
        let count: usize =
            released.values().map(|channels| channels.len()).sum();

        for entry in released.values().flat_map(|channels| channels.values()) {
            entry.wait_idle();
        }

        if count > 0 {
            debug!("releasing {} channel handlers", count);
        }
    }
}

unsafe extern "C" fn message_thunk(
    messenger: *mut RawMessenger,
    message: *const RawMessage,
    user_data: *mut c_void,
) {
    let Some(table) = resolve_token(user_data.addr()) else {
        trace!("message for a released channel registry");
        return;
    };
    let Some(messenger) = MessengerRef::from_raw(messenger) else {
        return;
    };
    let Some(message) = (unsafe { Message::from_raw(message) }) else {
        return;
    };

    let caller = thread::current().id();
    let Some(entry) = table.begin_call(messenger, message.channel(), caller)
    else {
        trace!("no handler for message on '{}'", message.channel());
        return;
    };
    drop(table);

    guard_void(message.channel(), || (entry.handler)(messenger, &message));
    entry.end_call(caller);
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::sim::SimMessenger;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_handler(
        calls: &Arc<AtomicUsize>,
        releases: &Arc<AtomicUsize>,
    ) -> MessageHandler {
        let calls = calls.clone();
        let tracked = Tracked(releases.clone());
        Arc::new(move |_: MessengerRef, _: &Message<'_>| {
            let _keep = &tracked;
            calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn replaced_handler_is_released_and_never_called() {
        let messenger = Arc::new(SimMessenger::new());
        let registry = ChannelRegistry::new();
        let (h1_calls, h1_releases) = (Arc::default(), Arc::default());
        let (h2_calls, h2_releases) = (Arc::default(), Arc::default());

        registry
            .set_channel_handler(
                &messenger,
                "ping",
                Some(counting_handler(&h1_calls, &h1_releases)),
            )
            .unwrap();
        registry
            .set_channel_handler(
                &messenger,
                "ping",
                Some(counting_handler(&h2_calls, &h2_releases)),
            )
            .unwrap();

        assert_eq!(h1_releases.load(Ordering::SeqCst), 1);

        messenger.deliver("ping", b"hi").expect("routed");

        assert_eq!(h1_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h2_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h2_releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clearing_unroutes_and_releases() {
        let messenger = Arc::new(SimMessenger::new());
        let registry = ChannelRegistry::new();
        let (calls, releases) = (Arc::default(), Arc::default());

        registry
            .set_channel_handler(
                &messenger,
                "ping",
                Some(counting_handler(&calls, &releases)),
            )
            .unwrap();
        assert!(messenger.is_routed("ping"));
        assert!(registry.has_handler("ping"));

        registry.set_channel_handler(&messenger, "ping", None).unwrap();

        assert!(!messenger.is_routed("ping"));
        assert!(!registry.has_handler("ping"));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(messenger.deliver("ping", b"hi").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clearing_an_unknown_channel_is_harmless() {
        let messenger = Arc::new(SimMessenger::new());
        let registry = ChannelRegistry::new();

        registry
            .set_channel_handler(&messenger, "nothing", None)
            .unwrap();
        assert!(registry.channels().is_empty());
    }

    #[test]
    fn drop_clears_routes_and_releases_handlers() {
        let messenger = Arc::new(SimMessenger::new());
        let releases = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let registry = ChannelRegistry::new();
        for channel in ["a", "b"] {
            registry
                .set_channel_handler(
                    &messenger,
                    channel,
                    Some(counting_handler(&calls, &releases)),
                )
                .unwrap();
        }
        assert_eq!(registry.channels(), ["a", "b"]);

        drop(registry);

        assert!(messenger.routed_channels().is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejects_bad_channels_and_unavailable_messengers() {
        let messenger = Arc::new(SimMessenger::new());
        let registry = ChannelRegistry::new();
        let (calls, releases) = (Arc::default(), Arc::default());

        let result = registry.set_channel_handler(
            &messenger,
            "",
            Some(counting_handler(&calls, &releases)),
        );
        assert!(matches!(result, Err(BridgeError::InvalidChannel(_, _))));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        messenger.set_available(false);
        let result = registry.set_channel_handler(
            &messenger,
            "ping",
            Some(counting_handler(&calls, &releases)),
        );
        assert!(matches!(result, Err(BridgeError::MessengerUnavailable)));
        assert!(!messenger.is_routed("ping"));
        assert!(!registry.has_handler("ping"));
    }

    #[test]
    fn panicking_handler_is_contained() {
        let messenger = Arc::new(SimMessenger::new());
        let registry = ChannelRegistry::new();
        fn explode(_: MessengerRef, _: &Message<'_>) {
            panic!("handler failed");
        }
        let handler: MessageHandler = Arc::new(explode);

        registry
            .set_channel_handler(&messenger, "ping", Some(handler))
            .unwrap();

        assert!(messenger.deliver("ping", b"hi").is_some());
        assert!(messenger.deliver("ping", b"again").is_some());
    }

    #[test]
    fn handler_sees_channel_payload_and_messenger() {
        let messenger = Arc::new(SimMessenger::new());
        let registry = ChannelRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(
            move |from: MessengerRef, message: &Message<'_>| {
                sink.lock().push((
                    from,
                    message.channel().to_string(),
                    message.to_vec(),
                ));
            },
        );
        registry
            .set_channel_handler(&messenger, "ping", Some(handler))
            .unwrap();

        messenger.deliver("ping", &[0x01, 0x02]);
        messenger.deliver("ping", &[]);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, messenger.as_raw());
        assert_eq!(seen[0].1, "ping");
        assert_eq!(seen[0].2, Some(vec![0x01, 0x02]));
        assert_eq!(seen[1].2, None);
    }

    #[test]
    fn handlers_are_scoped_to_their_messenger() {
        let m1 = Arc::new(SimMessenger::new());
        let m2 = Arc::new(SimMessenger::new());
        let registry = ChannelRegistry::new();
        let (h1_calls, h1_releases) = (Arc::default(), Arc::default());
        let (h2_calls, h2_releases) = (Arc::default(), Arc::default());

        registry
            .set_channel_handler(
                &m1,
                "ping",
                Some(counting_handler(&h1_calls, &h1_releases)),
            )
            .unwrap();
        registry
            .set_channel_handler(
                &m2,
                "ping",
                Some(counting_handler(&h2_calls, &h2_releases)),
            )
            .unwrap();

        m1.deliver("ping", b"one");

        assert_eq!(h1_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h2_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h1_releases.load(Ordering::SeqCst), 0);
        assert!(registry.has_route(m1.as_raw(), "ping"));
        assert!(registry.has_route(m2.as_raw(), "ping"));
        assert_eq!(registry.channels(), ["ping"]);

        registry.set_channel_handler(&m2, "ping", None).unwrap();
        assert!(m1.is_routed("ping"));
        assert!(!m2.is_routed("ping"));
        assert_eq!(h2_releases.load(Ordering::SeqCst), 1);

        drop(registry);

        assert!(!m1.is_routed("ping"));
        assert_eq!(h1_releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_token_after_drop_is_ignored() {
        let messenger = Arc::new(SimMessenger::new());
        let registry = ChannelRegistry::new();
        let (calls, releases) = (Arc::default(), Arc::default());

        registry
            .set_channel_handler(
                &messenger,
                "ping",
                Some(counting_handler(&calls, &releases)),
            )
            .unwrap();
        let user_data = registry.user_data();
        drop(registry);

        assert!(resolve_token(user_data.addr()).is_none());

        let channel = CString::new("ping").unwrap();
        let record = RawMessage {
            struct_size: size_of::<RawMessage>(),
            channel: channel.as_ptr(),
            message: ptr::null(),
            message_size: 0,
            response_handle: ptr::null(),
        };
        unsafe {
            message_thunk(messenger.as_raw().as_ptr(), &record, user_data)
        };

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clearing_waits_for_calls_on_other_threads() {
        let messenger = Arc::new(SimMessenger::new());
        let registry = ChannelRegistry::new();
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel();

        let done = finished.clone();
        let started_tx = Mutex::new(started_tx);
        let handler: MessageHandler =
            Arc::new(move |_: MessengerRef, _: &Message<'_>| {
                let _ = started_tx.lock().send(());
                thread::sleep(Duration::from_millis(50));
                done.store(true, Ordering::SeqCst);
            });
        registry
            .set_channel_handler(&messenger, "slow", Some(handler))
            .unwrap();

        thread::scope(|scope| {
            let messenger = &messenger;
            scope.spawn(move || messenger.deliver("slow", b"x"));

            started_rx.recv().unwrap();
            registry.set_channel_handler(messenger, "slow", None).unwrap();

            assert!(finished.load(Ordering::SeqCst));
        });
    }
}
