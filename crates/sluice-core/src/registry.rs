//! Name→factory plugin registry for reactor/proactor/encryption drivers
//! (spec §4.L). A small, fixed-capacity, case-insensitive, refcounted
//! table guarded by a spinlock.
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SocketError};

/// Default per-kind slot budget, matching spec §4.L's "~16 slots".
pub const DEFAULT_CAPACITY: usize = 16;

struct Slot<F> {
    name: String,
    factory: Arc<F>,
}

/// A single-kind (reactor, proactor, or encryption) factory table. Keys
/// are matched case-insensitively; `register` fails once `capacity` is
/// reached rather than growing, so table size stays O(1) to scan.
pub struct Registry<F> {
    slots: Mutex<Vec<Slot<F>>>,
    capacity: usize,
}

impl<F> Registry<F> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Registers `factory` under `name`. Fails with `Limit` if the table
    /// is full, or `Invalid` if the name is already registered.
    pub fn register(&self, name: &str, factory: Arc<F>) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.iter().any(|slot| slot.name.eq_ignore_ascii_case(name)) {
            return Err(SocketError::Invalid("driver name already registered"));
        }
        if slots.len() >= self.capacity {
            return Err(SocketError::Limit("plugin registry is at capacity"));
        }
        slots.push(Slot { name: name.to_owned(), factory });
        Ok(())
    }

    /// Removes the entry named `name`, releasing the registry's
    /// reference to its factory. A no-op (not an error) if absent —
    /// callers racing a deregister against a lookup should not need to
    /// special-case "already gone".
    pub fn deregister(&self, name: &str) {
        let mut slots = self.slots.lock();
        slots.retain(|slot| !slot.name.eq_ignore_ascii_case(name));
    }

    /// Looks up the factory registered under `name`, cloning the `Arc` so
    /// the caller can use it after the registry's lock is released.
    pub fn lookup(&self, name: &str) -> Result<Arc<F>> {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|slot| slot.name.eq_ignore_ascii_case(name))
            .map(|slot| slot.factory.clone())
            .ok_or(SocketError::Invalid("no driver registered under that name"))
    }

    pub fn list_names(&self) -> Vec<String> {
        self.slots.lock().iter().map(|slot| slot.name.clone()).collect()
    }
}

impl<F> Default for Registry<F> {
    fn default() -> Self {
        Self::new()
    }
}
