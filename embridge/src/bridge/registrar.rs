//! Registrar teardown handlers.
//!
//! The engine exposes one destruction slot per engine and calls it with the
//! registrar alone, no user data. Closures live in a table owned by each
//! [`DestructionRegistry`]; the process-wide [`REGISTRAR_INDEX`] only records
//! which table a registrar was armed from, so the thunk can find it.

use std::sync::{Arc, LazyLock, Weak};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::framework::ffi_guard::guard_void;
use crate::framework::util::HashMap;
use crate::host::{HostRegistrar, RawRegistrar, RegistrarRef};

pub type DestructionHandler = Box<dyn FnOnce(RegistrarRef) + Send + 'static>;

#[derive(Default)]
struct DestructionTable {
    handlers: Mutex<HashMap<RegistrarRef, DestructionHandler>>,
}

type RegistrarIndex = HashMap<RegistrarRef, Weak<DestructionTable>>;

static REGISTRAR_INDEX: LazyLock<Mutex<RegistrarIndex>> =
    LazyLock::new(|| Mutex::new(HashMap::default()));

pub struct DestructionRegistry {
    table: Arc<DestructionTable>,
}

impl Default for DestructionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DestructionRegistry {
    pub fn new() -> Self {
        Self {
            table: Arc::default(),
        }
    }

    /// Stores `handler` for the registrar's teardown, replacing (and
    /// releasing) any handler stored earlier for the same registrar, and
    /// arms the engine's destruction slot.
    pub fn set_destruction_handler<R>(
        &self,
        registrar: &R,
        handler: DestructionHandler,
    ) where
        R: HostRegistrar + ?Sized,
    {
        let handle = registrar.handle();

        let previous = self.table.handlers.lock().insert(handle, handler);

        REGISTRAR_INDEX
            .lock()
            .insert(handle, Arc::downgrade(&self.table));

        registrar.set_destruction_callback(Some(registrar_destroyed_thunk));

        if previous.is_some() {
            debug!("replaced destruction handler for {:?}", handle);
        }
    }

    pub fn has_handler(&self, registrar: RegistrarRef) -> bool {
        self.table.handlers.lock().contains_key(&registrar)
    }

    pub fn len(&self) -> usize {
        self.table.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for DestructionRegistry {
    fn drop(&mut self) {
        let table = Arc::downgrade(&self.table);
        REGISTRAR_INDEX
            .lock()
            .retain(|_, armed| !Weak::ptr_eq(armed, &table));

        let released = std::mem::take(&mut *self.table.handlers.lock());
        if !released.is_empty() {
            debug!(
                "releasing {} destruction handlers that never fired",
                released.len()
            );
        }
    }
}

/// Runs the stored handler for `registrar`, if any. The entry is removed and
/// every lock released before the handler runs, so the handler may register
/// again.
pub(crate) fn destroy_registrar(registrar: RegistrarRef) -> bool {
    let armed = REGISTRAR_INDEX.lock().remove(&registrar);

    let Some(table) = armed.and_then(|weak| weak.upgrade()) else {
        trace!("no destruction handler armed for {:?}", registrar);
        return false;
    };

    let handler = table.handlers.lock().remove(&registrar);
    drop(table);

    match handler {
        Some(handler) => {
            debug!("running destruction handler for {:?}", registrar);
            guard_void("registrar destruction", move || handler(registrar));
            true
        }
        None => {
            warn!("destruction handler for {:?} already gone", registrar);
            false
        }
    }
}

unsafe extern "C" fn registrar_destroyed_thunk(registrar: *mut RawRegistrar) {
    if let Some(registrar) = RegistrarRef::from_raw(registrar) {
        destroy_registrar(registrar);
    }
}
