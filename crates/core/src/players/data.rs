//! Per-slot storage for tester state

use ncz_sdk::{PlayerIndex, MAX_PLAYERS};
use parking_lot::Mutex;

/// One `T` per player slot
///
/// Each slot is only ever touched from that player's own callbacks; the
/// lock is never held across a listener call.
pub struct PlayerDataStore<T> {
    slots: Vec<Mutex<T>>,
}

impl<T: Default> Default for PlayerDataStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> PlayerDataStore<T> {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_PLAYERS).map(|_| Mutex::new(T::default())).collect(),
        }
    }

    /// Reset a slot to its zero state
    pub fn reset(&self, index: PlayerIndex) {
        *self.slots[index.get()].lock() = T::default();
    }

    /// Reset every slot
    pub fn reset_all(&self) {
        for slot in &self.slots {
            *slot.lock() = T::default();
        }
    }
}

impl<T> PlayerDataStore<T> {
    /// Run `f` with exclusive access to a slot
    pub fn with<R>(&self, index: PlayerIndex, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.slots[index.get()].lock())
    }
}

impl<T: Clone> PlayerDataStore<T> {
    /// Copy of a slot
    pub fn get(&self, index: PlayerIndex) -> T {
        self.slots[index.get()].lock().clone()
    }

    /// Overwrite a slot
    pub fn set(&self, index: PlayerIndex, value: T) {
        *self.slots[index.get()].lock() = value;
    }
}
