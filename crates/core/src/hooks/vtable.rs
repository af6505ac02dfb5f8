//! VTable hooks via pointer replacement
//!
//! Every redirection written into a host vtable goes through
//! [`VTableHookManager`]; it is the only code that writes to memory owned by
//! the host. Records are keyed by slot address, so a slot can carry at most
//! one hook at a time.

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

use crate::gamedata::GamedataError;

new_key_type! {
    /// Handle for a vtable hook
    pub struct VTableHookKey;
}

/// Error type for hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("VTable slot {0:#x} is already hooked")]
    AlreadyHooked(usize),

    #[error("Invalid hook target: {0}")]
    InvalidTarget(&'static str),

    #[error("Hook not found")]
    NotFound,

    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),

    #[error("Gamedata lookup failed: {0}")]
    Gamedata(#[from] GamedataError),
}

/// One active redirection
#[derive(Debug, Clone)]
pub struct HookRecord {
    /// Debug name
    pub name: String,

    /// Function pointer that was in the slot before we wrote to it
    pub original: *const (),

    /// Address of the vtable slot (owned by the host)
    pub slot: *mut *const (),

    /// Base of the vtable the slot belongs to
    pub table: *mut *const (),

    /// Object the vtable was resolved from, null for direct hooks
    pub instance: *const c_void,

    /// Our replacement function
    pub replacement: *const (),
}

// SAFETY: records are plain addresses; they are only dereferenced by the
// manager while holding its lock
unsafe impl Send for HookRecord {}
unsafe impl Sync for HookRecord {}

/// Owner of every vtable redirection
///
/// Dropping the manager restores every slot it still holds.
#[derive(Default)]
pub struct VTableHookManager {
    hooks: RwLock<SlotMap<VTableHookKey, HookRecord>>,
}

impl VTableHookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook a virtual table entry of a live object
    ///
    /// # Safety
    /// - `instance` must be null or point to a C++ object whose first member is its vtable pointer
    /// - `index` must be a valid index into that vtable
    /// - `replacement` must have a signature compatible with the original
    ///
    /// # Returns
    /// A key to manage the hook, and the original function pointer
    pub unsafe fn install(
        &self,
        name: &str,
        instance: *mut c_void,
        index: usize,
        replacement: *const (),
    ) -> Result<(VTableHookKey, *const ()), HookError> {
        if instance.is_null() {
            return Err(HookError::InvalidTarget("null instance"));
        }

        let table = *(instance as *const *mut *const ());
        self.install_at(name, table, instance, index, replacement)
    }

    /// Hook a virtual table entry by vtable address directly
    ///
    /// # Safety
    /// - `table` must be a valid vtable pointer
    /// - `index` must be a valid index into the vtable
    /// - `replacement` must have a signature compatible with the original
    pub unsafe fn install_direct(
        &self,
        name: &str,
        table: *mut *const (),
        index: usize,
        replacement: *const (),
    ) -> Result<(VTableHookKey, *const ()), HookError> {
        self.install_at(name, table, std::ptr::null(), index, replacement)
    }

    unsafe fn install_at(
        &self,
        name: &str,
        table: *mut *const (),
        instance: *const c_void,
        index: usize,
        replacement: *const (),
    ) -> Result<(VTableHookKey, *const ()), HookError> {
        if table.is_null() {
            return Err(HookError::InvalidTarget("null vtable"));
        }
        if replacement.is_null() {
            return Err(HookError::InvalidTarget("null replacement"));
        }

        let slot = table.add(index);

        // Held across the write so two installs can't both pass the check
        let mut hooks = self.hooks.write();
        if hooks.values().any(|record| record.slot == slot) {
            tracing::warn!(
                "Refusing to hook '{}': slot[{}] at {:x} is already hooked",
                name,
                index,
                slot as usize
            );
            return Err(HookError::AlreadyHooked(slot as usize));
        }

        let original = write_slot(slot, replacement)?;

        tracing::debug!(
            "Created vtable hook '{}': instance={:x}, vtable={:x}, slot[{}]={:x}, original={:x}",
            name,
            instance as usize,
            table as usize,
            index,
            slot as usize,
            original as usize
        );

        let key = hooks.insert(HookRecord {
            name: name.to_string(),
            original,
            slot,
            table,
            instance,
            replacement,
        });

        tracing::info!("Created vtable hook '{}' at index {}", name, index);

        Ok((key, original))
    }

    /// Original function saved for `table[index]`
    pub fn find_original_by_slot(&self, table: *mut *const (), index: usize) -> Option<*const ()> {
        let slot = table.wrapping_add(index);
        self.hooks
            .read()
            .values()
            .find(|record| record.slot == slot)
            .map(|record| record.original)
    }

    /// Original function of a hook placed in `table`
    ///
    /// With several hooks in the same table, which one answers is
    /// unspecified. Use [`find_original_by_slot`](Self::find_original_by_slot)
    /// to pick one.
    pub fn find_original_by_table(&self, table: *mut *const ()) -> Option<*const ()> {
        self.hooks
            .read()
            .values()
            .find(|record| record.table == table)
            .map(|record| record.original)
    }

    /// Original function of the hook installed through `instance`
    pub fn find_original_by_instance(&self, instance: *const c_void) -> Option<*const ()> {
        if instance.is_null() {
            return None;
        }
        self.hooks
            .read()
            .values()
            .find(|record| record.instance == instance)
            .map(|record| record.original)
    }

    /// Get a copy of a hook record
    pub fn record(&self, key: VTableHookKey) -> Option<HookRecord> {
        self.hooks.read().get(key).cloned()
    }

    /// Check if a slot currently carries one of our hooks
    pub fn is_hooked(&self, slot: *mut *const ()) -> bool {
        self.hooks.read().values().any(|record| record.slot == slot)
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Restore the original pointer and forget the hook
    pub fn uninstall(&self, key: VTableHookKey) -> Result<(), HookError> {
        let mut hooks = self.hooks.write();
        let record = hooks.get(key).ok_or(HookError::NotFound)?;

        unsafe { write_slot(record.slot, record.original)? };

        let record = hooks.remove(key).ok_or(HookError::NotFound)?;
        tracing::info!("Removed vtable hook '{}'", record.name);
        Ok(())
    }

    /// Remove the hook sitting in `slot`, if any
    pub fn uninstall_slot(&self, slot: *mut *const ()) -> Result<(), HookError> {
        let key = self
            .hooks
            .read()
            .iter()
            .find(|(_, record)| record.slot == slot)
            .map(|(key, _)| key)
            .ok_or(HookError::NotFound)?;
        self.uninstall(key)
    }

    /// Restore every slot and clear the record set
    ///
    /// Safe to call any number of times. Must run before the code the
    /// replacements point into is unloaded.
    pub fn uninstall_all(&self) {
        let mut hooks = self.hooks.write();
        if hooks.is_empty() {
            return;
        }

        let count = hooks.len();
        for (_, record) in hooks.drain() {
            if let Err(e) = unsafe { write_slot(record.slot, record.original) } {
                tracing::error!("Failed to restore vtable hook '{}': {}", record.name, e);
            }
        }

        tracing::info!("Restored {} vtable hooks", count);
    }
}

impl Drop for VTableHookManager {
    fn drop(&mut self) {
        self.uninstall_all();
    }
}

/// Write one vtable slot, returning what it held
///
/// The page is only made writable if it isn't already, and its previous
/// protection is restored when the guard drops. The store itself is a
/// single aligned pointer write.
unsafe fn write_slot(slot: *mut *const (), value: *const ()) -> Result<*const (), HookError> {
    debug_assert!(slot as usize % std::mem::align_of::<*const ()>() == 0);

    let slot_addr = slot as *const u8;
    let size = std::mem::size_of::<*const ()>();

    let region =
        region::query(slot_addr).map_err(|e| HookError::MemoryProtection(e.to_string()))?;

    let _guard = if region.is_writable() {
        None
    } else {
        Some(
            region::protect_with_handle(slot_addr, size, region::Protection::READ_WRITE)
                .map_err(|e| HookError::MemoryProtection(e.to_string()))?,
        )
    };

    let previous = AtomicPtr::from_ptr(slot as *mut *mut ()).swap(value as *mut (), Ordering::AcqRel);

    Ok(previous as *const ())
}
